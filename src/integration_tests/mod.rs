use crate::{Channel, Connection};
use std::env;
use std::sync::Once;

mod exchange;

static PRINT_WARNING: Once = Once::new();

fn with_test_url<F: FnOnce(&str)>(f: F) {
    match env::var("AMQPSYNC_TEST_URL") {
        Ok(url) => f(&url),
        Err(env::VarError::NotPresent) => PRINT_WARNING.call_once(|| {
            println!("AMQPSYNC_TEST_URL not defined - skipping integration tests");
        }),
        Err(env::VarError::NotUnicode(_)) => {
            panic!("AMQPSYNC_TEST_URL exists but is not valid unicode")
        }
    }
}

fn with_conn<F: FnOnce(&Connection)>(f: F) {
    with_test_url(|url| {
        let _ = env_logger::builder().is_test(true).try_init();
        let conn = Connection::open_url(url).unwrap();
        f(&conn);
        conn.close().unwrap();
    })
}

fn with_chan<F: FnOnce(&Channel)>(f: F) {
    with_conn(|conn| {
        let chan = conn.channel().unwrap();
        f(&chan);
        chan.close().unwrap();
    })
}

fn unique_name(prefix: &str) -> String {
    format!("amqpsync-test-{}-{}", prefix, uuid::Uuid::new_v4())
}

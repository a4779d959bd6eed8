use super::{unique_name, with_chan};
use crate::{AmqpProperties, ExchangeDeclareOptions, ExchangeType, FieldTable};

#[test]
fn publish_empty_to_default_exchange() {
    with_chan(|chan| {
        for _ in 0..2 {
            let accepted = chan
                .basic()
                .publish("", "", "does.not.exist", false, false, &AmqpProperties::default())
                .unwrap();
            assert!(accepted);
        }
    })
}

#[test]
fn declare_and_passive_declare() {
    let name = unique_name("declare");

    with_chan(|chan| {
        let exchange = chan.exchange();
        let options = ExchangeDeclareOptions {
            auto_delete: true,
            ..ExchangeDeclareOptions::default()
        };
        exchange
            .declare(&name, ExchangeType::Direct, options.clone())
            .unwrap();
        // redeclaring with identical options is a no-op
        exchange
            .declare(&name, ExchangeType::Direct, options)
            .unwrap();
        exchange.declare_passive(&name).unwrap();
        chan.basic()
            .publish("", &name, "does.not.exist", false, false, &AmqpProperties::default())
            .unwrap();
        exchange.delete(&name, false).unwrap();
    })
}

#[test]
fn exchange_to_exchange_binding() {
    let source = unique_name("source");
    let destination = unique_name("destination");

    with_chan(|chan| {
        let exchange = chan.exchange();
        for name in &[&source, &destination] {
            exchange
                .declare(name, ExchangeType::Topic, ExchangeDeclareOptions::default())
                .unwrap();
        }
        exchange
            .bind(&destination, &source, "logs.#", FieldTable::new())
            .unwrap();
        exchange
            .unbind(&destination, &source, "logs.#", FieldTable::new())
            .unwrap();
        exchange.delete(&source, false).unwrap();
        exchange.delete(&destination, false).unwrap();
    })
}

#[test]
fn passive_declare_of_missing_exchange_closes_channel() {
    let name = unique_name("missing");

    with_chan(|chan| {
        let err = chan.exchange().declare_passive(&name).unwrap_err();
        assert_eq!(err.reply_code(), Some(404));
        assert!(chan.is_closed());
    })
}

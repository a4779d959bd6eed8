use super::IoStream;
use crate::errors::*;
use log::debug;
use native_tls::HandshakeError;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// TLS sessions cannot be split, so both halves share the session behind a lock. Keep reads
// short so the reader does not starve writers while it holds the lock.
const TLS_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Newtype wrapper around a `native_tls::TlsConnector` used by `Connection::open_tls`.
pub struct TlsConnector(native_tls::TlsConnector);

impl TlsConnector {
    pub(crate) fn connect(&self, domain: &str, stream: TcpStream) -> Result<TlsStream> {
        match self.0.connect(domain, stream) {
            Ok(stream) => {
                debug!("TLS handshake with {} complete", domain);
                Ok(TlsStream(stream))
            }
            Err(HandshakeError::Failure(err)) => TlsHandshakeSnafu {
                message: err.to_string(),
            }
            .fail(),
            Err(HandshakeError::WouldBlock(_)) => TlsHandshakeSnafu {
                message: "handshake interrupted by socket timeout",
            }
            .fail(),
        }
    }
}

impl From<native_tls::TlsConnector> for TlsConnector {
    fn from(inner: native_tls::TlsConnector) -> TlsConnector {
        TlsConnector(inner)
    }
}

pub(crate) struct TlsStream(native_tls::TlsStream<TcpStream>);

impl IoStream for TlsStream {
    type Reader = TlsHalf;
    type Writer = TlsHalf;

    fn into_split(self, poll_interval: Duration) -> io::Result<(TlsHalf, TlsHalf)> {
        let tcp = self.0.get_ref();
        tcp.set_nodelay(true)?;
        tcp.set_read_timeout(Some(Duration::min(poll_interval, TLS_READ_TIMEOUT)))?;
        let shared = Arc::new(Mutex::new(self.0));
        Ok((TlsHalf(Arc::clone(&shared)), TlsHalf(shared)))
    }
}

pub(crate) struct TlsHalf(Arc<Mutex<native_tls::TlsStream<TcpStream>>>);

impl Read for TlsHalf {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().unwrap().read(buf)
    }
}

impl Write for TlsHalf {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

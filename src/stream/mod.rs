use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// A connected byte stream that can be driven by one reader thread and any number of writers.
///
/// `into_split` hands back independent read and write halves. Reads on the read half must give
/// up with `WouldBlock` or `TimedOut` after roughly `poll_interval` so the reader thread can
/// notice the connection closing.
pub trait IoStream: Send + 'static {
    type Reader: Read + Send + 'static;
    type Writer: Write + Send + 'static;

    fn into_split(self, poll_interval: Duration) -> io::Result<(Self::Reader, Self::Writer)>;
}

impl IoStream for TcpStream {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn into_split(self, poll_interval: Duration) -> io::Result<(TcpStream, TcpStream)> {
        self.set_nodelay(true)?;
        self.set_read_timeout(Some(poll_interval))?;
        // socket options are shared, so the read timeout applies to both halves
        let writer = self.try_clone()?;
        Ok((self, writer))
    }
}

#[cfg(feature = "native-tls")]
mod native_tls;

#[cfg(feature = "native-tls")]
pub use self::native_tls::TlsConnector;
#[cfg(feature = "native-tls")]
pub(crate) use self::native_tls::TlsStream;

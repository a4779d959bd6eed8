use crate::State;
use snafu::Snafu;
use std::sync::Arc;
use std::{io, result};

/// A type alias for handling errors throughout amqpsync.
pub type Result<T, E = Error> = result::Result<T, E>;

/// Broad classification of an [`Error`](enum.Error.html).
///
/// Connection errors are fatal to the connection and every channel on it. Channel errors are
/// fatal only to the channel that raised them. Message errors are channel errors raised when the
/// broker returns a `mandatory`/`immediate` publish; the channel stays open. Invalid argument
/// errors are raised locally before any I/O happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Channel,
    Message,
    InvalidArgument,
}

/// Errors that can be produced by amqpsync.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The underlying socket was closed unexpectedly.
    #[snafu(display("underlying socket closed unexpectedly"))]
    UnexpectedSocketClose,

    /// The underlying socket sent data we could not parse.
    #[snafu(display("received malformed data - expected AMQP frame"))]
    ReceivedMalformed,

    /// An I/O error occurred on the underlying socket.
    #[snafu(display("I/O error: {}", source))]
    Io {
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
    },

    /// The TLS handshake failed.
    #[cfg(feature = "native-tls")]
    #[snafu(display("TLS handshake failed: {}", message))]
    TlsHandshake { message: String },

    /// The server does not support the requested auth mechanism.
    #[snafu(display(
        "requested auth mechanism unavailable (available = {}, requested = {})",
        available,
        requested
    ))]
    UnsupportedAuthMechanism {
        available: String,
        requested: String,
    },

    /// The server does not support the requested locale.
    #[snafu(display(
        "requested locale unavailable (available = {}, requested = {})",
        available,
        requested
    ))]
    UnsupportedLocale {
        available: String,
        requested: String,
    },

    /// The requested frame size is smaller than the minimum required by AMQP.
    #[snafu(display("requested frame max is too small (min = {}, requested = {})", min, requested))]
    FrameMaxTooSmall { min: u32, requested: u32 },

    /// The server requested a Secure/Secure-Ok exchange, which is not supported.
    #[snafu(display("SASL secure/secure-ok exchanges are not supported"))]
    SaslSecureNotSupported,

    /// Serializing an outgoing frame failed.
    #[snafu(display("internal serialization error (this is a bug in amqpsync)"))]
    InternalSerializationError,

    /// No frames (data or heartbeats) arrived for two consecutive heartbeat checks.
    #[snafu(display(
        "connection dead, no heartbeat or data received in >= {}s",
        interval_secs
    ))]
    MissedServerHeartbeats { interval_secs: u64 },

    /// The server closed the connection with the given reply code and text.
    #[snafu(display("connection was closed by remote server (code={}): {}", code, message))]
    ServerClosedConnection { code: u16, message: String },

    /// The connection has been closed.
    #[snafu(display("connection was closed"))]
    ConnectionClosed,

    /// The connection did not reach the expected state in time.
    #[snafu(display("connection timed out waiting for state {:?}", waiting_for))]
    ConnectionTimeout { waiting_for: State },

    /// Spawning a background thread failed.
    #[snafu(display("failed to spawn {} thread: {}", thread, source))]
    ForkFailed {
        thread: &'static str,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
    },

    /// A background thread panicked.
    #[snafu(display("{} thread panicked: {}", thread, message))]
    ThreadPanic {
        thread: &'static str,
        message: String,
    },

    /// All channel ids up to the negotiated maximum are in use.
    #[snafu(display("reached the maximum number of channels ({})", channel_max))]
    ExhaustedChannelIds { channel_max: u16 },

    /// The requested channel id is out of range or already in use.
    #[snafu(display("requested channel id {} is unavailable", channel_id))]
    UnavailableChannelId { channel_id: u16 },

    /// The URL passed to `Connection::open_url` is not a valid AMQP URL.
    #[snafu(display("invalid AMQP url: {}", url))]
    InvalidUrl { url: String },

    /// The URL passed to `Connection::open_url` could not be parsed.
    #[snafu(display("could not parse url: {}", source))]
    UrlParse { source: url::ParseError },

    /// The server closed the channel with the given reply code and text.
    #[snafu(display(
        "channel {} was closed by remote server (code={}): {}",
        channel_id,
        code,
        message
    ))]
    ServerClosedChannel {
        channel_id: u16,
        code: u16,
        message: String,
    },

    /// The channel has been closed.
    #[snafu(display("channel {} was closed", channel_id))]
    ChannelClosed { channel_id: u16 },

    /// No reply arrived for an RPC request before its timeout.
    #[snafu(display(
        "rpc request {} on channel {} timed out waiting for [{}]",
        request_id,
        channel_id,
        expected
    ))]
    RpcTimeout {
        channel_id: u16,
        request_id: u64,
        expected: String,
    },

    /// A frame arrived that did not match what the caller was waiting for.
    #[snafu(display(
        "AMQP protocol error on channel {} - expected {} but received {}",
        channel_id,
        expected,
        received
    ))]
    FrameUnexpected {
        channel_id: u16,
        expected: String,
        received: String,
    },

    /// The broker returned a `mandatory` or `immediate` message as undeliverable.
    #[snafu(display(
        "message not delivered: {} ({}) to queue '{}' from exchange '{}'",
        reply_text,
        reply_code,
        routing_key,
        exchange
    ))]
    MessageReturned {
        channel_id: u16,
        reply_code: u16,
        reply_text: String,
        routing_key: String,
        exchange: String,
    },

    /// A locally supplied parameter failed validation.
    #[snafu(display("{} should be {}", parameter, expected))]
    InvalidArgument {
        parameter: &'static str,
        expected: &'static str,
    },
}

impl Error {
    /// The broad category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ServerClosedChannel { .. }
            | Error::ChannelClosed { .. }
            | Error::RpcTimeout { .. }
            | Error::FrameUnexpected { .. } => ErrorCategory::Channel,
            Error::MessageReturned { .. } => ErrorCategory::Message,
            Error::InvalidArgument { .. } | Error::InvalidUrl { .. } | Error::UrlParse { .. } => {
                ErrorCategory::InvalidArgument
            }
            _ => ErrorCategory::Connection,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        self.category() == ErrorCategory::Connection
    }

    /// True for channel errors, including message errors.
    pub fn is_channel_error(&self) -> bool {
        match self.category() {
            ErrorCategory::Channel | ErrorCategory::Message => true,
            ErrorCategory::Connection | ErrorCategory::InvalidArgument => false,
        }
    }

    pub fn is_message_error(&self) -> bool {
        self.category() == ErrorCategory::Message
    }

    /// The AMQP reply code carried by this error, if the broker supplied one.
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            Error::ServerClosedConnection { code, .. } | Error::ServerClosedChannel { code, .. } => {
                Some(*code)
            }
            Error::MessageReturned { reply_code, .. } => Some(*reply_code),
            _ => None,
        }
    }
}

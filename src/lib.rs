//! amqpsync is a blocking AMQP 0-9-1 client.
//!
//! A [`Connection`] multiplexes one TCP (or TLS) socket into any number of [`Channel`]s. Each
//! channel serializes its own synchronous requests, publishes messages, and collects deliveries
//! for its consumers. A background I/O thread reads and routes frames; an optional heartbeat
//! thread keeps idle connections alive and detects dead servers.
//!
//! ```rust,no_run
//! use amqpsync::{AmqpProperties, ConnectionOptions, Connection, QueueDeclareOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let connection = Connection::open(ConnectionOptions::default())?;
//!     let channel = connection.channel()?;
//!     channel.queue().declare("hello", QueueDeclareOptions::default())?;
//!     channel
//!         .basic()
//!         .publish("hello there", "", "hello", false, false, &AmqpProperties::default())?;
//!     if let Some(get) = channel.basic().get("hello", true)? {
//!         println!("got {:?}", std::str::from_utf8(get.content()));
//!     }
//!     connection.close()
//! }
//! ```
//!
//! # Errors
//!
//! Every fallible operation returns [`Error`]. Errors raised by the server or the socket are
//! recorded against the connection or channel they belong to and reported by the next call on
//! it; see [`Error::category`] for how far each one reaches.

mod auth;
mod basic;
mod channel;
mod channel0;
mod channel_slots;
mod connection;
mod connection_options;
mod delivery;
mod errors;
mod exchange;
mod frame;
mod frame_buffer;
mod get;
mod heartbeats;
mod inbound;
mod notification_listeners;
mod queue;
mod rpc;
mod serialize;
mod stateful;
mod stream;
mod transport;
mod tx;

#[cfg(test)]
mod mock_broker;

#[cfg(test)]
mod integration_tests;

pub use auth::Auth;
pub use basic::{Basic, ConsumeOptions};
pub use channel::Channel;
pub use connection::Connection;
pub use connection_options::ConnectionOptions;
pub use delivery::Delivery;
pub use errors::{Error, ErrorCategory, Result};
pub use exchange::{Exchange, ExchangeDeclareOptions, ExchangeType};
pub use frame::FrameKind;
pub use get::Get;
pub use inbound::InboundMessages;
pub use notification_listeners::{ConnectionBlockedNotification, NotificationListener};
pub use queue::{DeclaredQueue, Queue, QueueDeleteOptions, QueueDeclareOptions};
pub use stateful::State;
pub use stream::IoStream;
pub use tx::Tx;

#[cfg(feature = "native-tls")]
pub use stream::TlsConnector;

pub use amq_protocol::frame::AMQPFrame;
pub use amq_protocol::protocol::basic::AMQPProperties as AmqpProperties;
pub use amq_protocol::protocol::AMQPClass;
pub use amq_protocol::types::AMQPValue as AmqpValue;
pub use amq_protocol::types::FieldTable;

#[allow(dead_code)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

use crate::errors::*;
use crate::serialize::short_string;
use crate::{Channel, FieldTable};
use amq_protocol::protocol::exchange::AMQPMethod as AmqpExchange;
use amq_protocol::protocol::exchange::{
    Bind, BindOk, Declare, DeclareOk, Delete, DeleteOk, Unbind, UnbindOk,
};

/// Types of AMQP exchanges.
#[derive(Clone, Debug, PartialEq)]
pub enum ExchangeType {
    /// Route on exact routing key match.
    Direct,

    /// Send to every bound queue, ignoring the routing key.
    Fanout,

    /// Route on pattern matches against the routing key.
    Topic,

    /// Route on message header matches.
    Headers,

    /// A plugin-provided type, such as `x-consistent-hash`.
    Custom(String),
}

impl AsRef<str> for ExchangeType {
    fn as_ref(&self) -> &str {
        use self::ExchangeType::*;
        match self {
            Direct => "direct",
            Fanout => "fanout",
            Topic => "topic",
            Headers => "headers",
            Custom(s) => s,
        }
    }
}

/// Options passed to the server when declaring an exchange.
///
/// The [`default`](#impl-Default) implementation sets all boolean fields to false and has an
/// empty set of arguments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeDeclareOptions {
    /// If true, the exchange will survive server restarts.
    pub durable: bool,

    /// If true, the exchange is deleted once nothing is bound to it.
    pub auto_delete: bool,

    /// If true, the exchange cannot be published to directly; it only receives messages from
    /// other exchanges.
    pub internal: bool,

    /// Extra arguments, such as `alternate-exchange`.
    pub arguments: FieldTable,
}

impl ExchangeDeclareOptions {
    fn into_declare(
        self,
        type_: &ExchangeType,
        name: &str,
        passive: bool,
    ) -> Result<Declare> {
        Ok(Declare {
            ticket: 0,
            exchange: short_string("exchange", name)?,
            type_: short_string("exchange_type", type_.as_ref())?,
            passive,
            durable: self.durable,
            auto_delete: self.auto_delete,
            internal: self.internal,
            nowait: false,
            arguments: self.arguments,
        })
    }
}

/// `exchange` class methods on a [`Channel`](struct.Channel.html).
pub struct Exchange<'a> {
    channel: &'a Channel,
}

impl<'a> Exchange<'a> {
    pub(crate) fn new(channel: &'a Channel) -> Exchange<'a> {
        Exchange { channel }
    }

    pub fn declare(
        &self,
        name: &str,
        type_: ExchangeType,
        options: ExchangeDeclareOptions,
    ) -> Result<()> {
        let declare = options.into_declare(&type_, name, false)?;
        self.send_declare(declare)
    }

    /// Check that an exchange exists without creating it. The server closes the channel with a
    /// 404 if it does not.
    pub fn declare_passive(&self, name: &str) -> Result<()> {
        let declare =
            ExchangeDeclareOptions::default().into_declare(&ExchangeType::Direct, name, true)?;
        self.send_declare(declare)
    }

    fn send_declare(&self, declare: Declare) -> Result<()> {
        self.channel
            .inner()
            .rpc_request_as::<_, DeclareOk>(AmqpExchange::Declare(declare))
            .map(|_| ())
    }

    /// Delete an exchange. With `if_unused`, the server refuses if queues are still bound.
    pub fn delete(&self, name: &str, if_unused: bool) -> Result<()> {
        let delete = Delete {
            ticket: 0,
            exchange: short_string("exchange", name)?,
            if_unused,
            nowait: false,
        };
        self.channel
            .inner()
            .rpc_request_as::<_, DeleteOk>(AmqpExchange::Delete(delete))
            .map(|_| ())
    }

    /// Route messages from `source` to `destination`.
    pub fn bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<()> {
        let bind = Bind {
            ticket: 0,
            destination: short_string("destination", destination)?,
            source: short_string("source", source)?,
            routing_key: short_string("routing_key", routing_key)?,
            nowait: false,
            arguments,
        };
        self.channel
            .inner()
            .rpc_request_as::<_, BindOk>(AmqpExchange::Bind(bind))
            .map(|_| ())
    }

    pub fn unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<()> {
        let unbind = Unbind {
            ticket: 0,
            destination: short_string("destination", destination)?,
            source: short_string("source", source)?,
            routing_key: short_string("routing_key", routing_key)?,
            nowait: false,
            arguments,
        };
        self.channel
            .inner()
            .rpc_request_as::<_, UnbindOk>(AmqpExchange::Unbind(unbind))
            .map(|_| ())
    }
}

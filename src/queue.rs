use crate::errors::*;
use crate::serialize::short_string;
use crate::{Channel, FieldTable};
use amq_protocol::protocol::queue::AMQPMethod as AmqpQueue;
use amq_protocol::protocol::queue::{
    Bind, BindOk, Declare, DeclareOk, Delete, DeleteOk, Purge, PurgeOk, Unbind, UnbindOk,
};

/// Options passed to the server when declaring a queue.
///
/// The [`default`](#impl-Default) implementation sets all boolean fields to false and has an
/// empty set of arguments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueDeclareOptions {
    /// If true, the queue will survive server restarts.
    pub durable: bool,

    /// If true, the queue is only accessible by this connection and is deleted when it closes.
    pub exclusive: bool,

    /// If true, the queue is deleted when its last consumer is cancelled.
    pub auto_delete: bool,

    /// Extra arguments, such as `x-message-ttl` or `x-max-length`.
    pub arguments: FieldTable,
}

/// Options passed to the server when deleting a queue.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct QueueDeleteOptions {
    /// Only delete the queue if it has no consumers.
    pub if_unused: bool,

    /// Only delete the queue if it has no messages.
    pub if_empty: bool,
}

/// The server's answer to a queue declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct DeclaredQueue {
    name: String,
    message_count: u32,
    consumer_count: u32,
}

impl DeclaredQueue {
    /// The queue name; useful when the server generated it.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    pub fn consumer_count(&self) -> u32 {
        self.consumer_count
    }
}

impl From<DeclareOk> for DeclaredQueue {
    fn from(ok: DeclareOk) -> DeclaredQueue {
        DeclaredQueue {
            name: ok.queue,
            message_count: ok.message_count,
            consumer_count: ok.consumer_count,
        }
    }
}

/// `queue` class methods on a [`Channel`](struct.Channel.html).
pub struct Queue<'a> {
    channel: &'a Channel,
}

impl<'a> Queue<'a> {
    pub(crate) fn new(channel: &'a Channel) -> Queue<'a> {
        Queue { channel }
    }

    /// Declare a queue. An empty `name` asks the server to generate one.
    pub fn declare(&self, name: &str, options: QueueDeclareOptions) -> Result<DeclaredQueue> {
        self.declare_impl(name, false, options)
    }

    /// Check that a queue exists without creating it. The server closes the channel with a
    /// 404 if it does not.
    pub fn declare_passive(&self, name: &str) -> Result<DeclaredQueue> {
        self.declare_impl(name, true, QueueDeclareOptions::default())
    }

    fn declare_impl(
        &self,
        name: &str,
        passive: bool,
        options: QueueDeclareOptions,
    ) -> Result<DeclaredQueue> {
        let declare = Declare {
            ticket: 0,
            queue: short_string("queue", name)?,
            passive,
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            nowait: false,
            arguments: options.arguments,
        };
        self.channel
            .inner()
            .rpc_request_as::<_, DeclareOk>(AmqpQueue::Declare(declare))
            .map(DeclaredQueue::from)
    }

    /// Delete a queue, returning the number of messages it held.
    pub fn delete(&self, name: &str, options: QueueDeleteOptions) -> Result<u32> {
        let delete = Delete {
            ticket: 0,
            queue: short_string("queue", name)?,
            if_unused: options.if_unused,
            if_empty: options.if_empty,
            nowait: false,
        };
        self.channel
            .inner()
            .rpc_request_as::<_, DeleteOk>(AmqpQueue::Delete(delete))
            .map(|ok| ok.message_count)
    }

    /// Remove every message from a queue, returning how many were removed.
    pub fn purge(&self, name: &str) -> Result<u32> {
        let purge = Purge {
            ticket: 0,
            queue: short_string("queue", name)?,
            nowait: false,
        };
        self.channel
            .inner()
            .rpc_request_as::<_, PurgeOk>(AmqpQueue::Purge(purge))
            .map(|ok| ok.message_count)
    }

    pub fn bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<()> {
        let bind = Bind {
            ticket: 0,
            queue: short_string("queue", queue)?,
            exchange: short_string("exchange", exchange)?,
            routing_key: short_string("routing_key", routing_key)?,
            nowait: false,
            arguments,
        };
        self.channel
            .inner()
            .rpc_request_as::<_, BindOk>(AmqpQueue::Bind(bind))
            .map(|_| ())
    }

    pub fn unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<()> {
        let unbind = Unbind {
            ticket: 0,
            queue: short_string("queue", queue)?,
            exchange: short_string("exchange", exchange)?,
            routing_key: short_string("routing_key", routing_key)?,
            arguments,
        };
        self.channel
            .inner()
            .rpc_request_as::<_, UnbindOk>(AmqpQueue::Unbind(unbind))
            .map(|_| ())
    }
}

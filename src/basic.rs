use crate::errors::*;
use crate::serialize::short_string;
use crate::{AmqpProperties, Channel, Delivery, FieldTable, Get};
use amq_protocol::protocol::basic::AMQPMethod as AmqpBasic;
use amq_protocol::protocol::basic::{
    Ack, Consume, ConsumeOk, Get as BasicGet, Nack, Publish, Qos, QosOk, Recover, RecoverOk,
    Reject,
};
use log::debug;

/// Options passed to the server when starting a consumer.
///
/// The [`default`](#impl-Default) implementation sets all boolean fields to false, leaves the
/// consumer tag empty (the server picks one), and has an empty set of arguments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConsumeOptions {
    /// Tag identifying the consumer; empty to let the server generate one.
    pub consumer_tag: String,

    /// If true, the server will not send this consumer messages that were published by the
    /// consumer's connection.
    pub no_local: bool,

    /// If true, the server assumes all delivered messages are acknowledged.
    pub no_ack: bool,

    /// If true, requires that this consumer is the only one attached to the queue.
    pub exclusive: bool,

    /// Extra arguments; these are optional in general, but may be needed for some plugins or
    /// server-specific features.
    pub arguments: FieldTable,
}

/// `basic` class methods on a [`Channel`](struct.Channel.html).
pub struct Basic<'a> {
    channel: &'a Channel,
}

impl<'a> Basic<'a> {
    pub(crate) fn new(channel: &'a Channel) -> Basic<'a> {
        Basic { channel }
    }

    /// Publish a message.
    ///
    /// If the channel is in confirm mode this blocks until the broker acknowledges the message
    /// and returns whether it was acked (`true`) or nacked (`false`); otherwise it returns
    /// `true` once the message has been written. With `mandatory` or `immediate` set, an
    /// undeliverable message is reported as
    /// [`Error::MessageReturned`](enum.Error.html#variant.MessageReturned) if the broker
    /// returned it before this call finished, or by a later call on this channel otherwise.
    pub fn publish<T: AsRef<[u8]>>(
        &self,
        content: T,
        exchange: &str,
        routing_key: &str,
        mandatory: bool,
        immediate: bool,
        properties: &AmqpProperties,
    ) -> Result<bool> {
        let publish = Publish {
            ticket: 0,
            exchange: short_string("exchange", exchange)?,
            routing_key: short_string("routing_key", routing_key)?,
            mandatory,
            immediate,
        };
        self.channel
            .inner()
            .publish(publish, content.as_ref(), properties)
    }

    /// Fetch a single message from `queue`, or `None` if it is empty.
    pub fn get(&self, queue: &str, no_ack: bool) -> Result<Option<Get>> {
        self.channel.inner().get(BasicGet {
            ticket: 0,
            queue: short_string("queue", queue)?,
            no_ack,
        })
    }

    /// Start a consumer whose deliveries are passed to `callback` by
    /// [`Channel::process_data_events`](struct.Channel.html#method.process_data_events) and
    /// [`Channel::start_consuming`](struct.Channel.html#method.start_consuming).
    ///
    /// Returns the consumer tag.
    pub fn consume<F>(&self, queue: &str, options: ConsumeOptions, callback: F) -> Result<String>
    where
        F: FnMut(&Channel, Delivery) + Send + 'static,
    {
        self.start_consumer(queue, options, Some(Box::new(callback)))
    }

    /// Start a consumer whose deliveries are read with
    /// [`Channel::build_inbound_messages`](struct.Channel.html#method.build_inbound_messages).
    ///
    /// Returns the consumer tag.
    pub fn consume_inbound(&self, queue: &str, options: ConsumeOptions) -> Result<String> {
        self.start_consumer(queue, options, None)
    }

    fn start_consumer(
        &self,
        queue: &str,
        options: ConsumeOptions,
        callback: Option<crate::channel::ConsumerCallback>,
    ) -> Result<String> {
        let consume = Consume {
            ticket: 0,
            queue: short_string("queue", queue)?,
            consumer_tag: short_string("consumer_tag", &options.consumer_tag)?,
            no_local: options.no_local,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            nowait: false,
            arguments: options.arguments,
        };
        let inner = self.channel.inner();
        let consume_ok = inner.rpc_request_as::<_, ConsumeOk>(AmqpBasic::Consume(consume))?;
        debug!(
            "channel {} started consumer {} on {}",
            self.channel.channel_id(),
            consume_ok.consumer_tag,
            queue
        );
        inner.add_consumer(consume_ok.consumer_tag.clone(), callback);
        Ok(consume_ok.consumer_tag)
    }

    /// Cancel the consumer with the given tag. Deliveries already queued for it are dropped when
    /// processed.
    pub fn cancel(&self, consumer_tag: &str) -> Result<()> {
        self.channel.inner().cancel_consumer(consumer_tag)
    }

    /// Limit the unacknowledged messages (`prefetch_count`) or bytes (`prefetch_size`) the
    /// server will send. Zero means no limit. `global` applies the limit per connection instead
    /// of per consumer.
    pub fn qos(&self, prefetch_size: u32, prefetch_count: u16, global: bool) -> Result<()> {
        self.channel
            .inner()
            .rpc_request_as::<_, QosOk>(AmqpBasic::Qos(Qos {
                prefetch_size,
                prefetch_count,
                global,
            }))
            .map(|_| ())
    }

    /// Ask the server to redeliver unacknowledged messages.
    pub fn recover(&self, requeue: bool) -> Result<()> {
        self.channel
            .inner()
            .rpc_request_as::<_, RecoverOk>(AmqpBasic::Recover(Recover { requeue }))
            .map(|_| ())
    }

    pub fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.channel.inner().write_method(AmqpBasic::Ack(Ack {
            delivery_tag,
            multiple,
        }))
    }

    pub fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        self.channel.inner().write_method(AmqpBasic::Nack(Nack {
            delivery_tag,
            multiple,
            requeue,
        }))
    }

    pub fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel.inner().write_method(AmqpBasic::Reject(Reject {
            delivery_tag,
            requeue,
        }))
    }
}

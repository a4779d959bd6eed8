use crate::{AmqpProperties, Channel, Result};
use amq_protocol::protocol::basic::{Deliver, GetOk};

/// A message received from the server, either pushed to a consumer or fetched with
/// [`Basic::get`](struct.Basic.html#method.get).
#[derive(Clone, Debug)]
pub struct Delivery {
    channel_id: u16,
    consumer_tag: Option<String>,
    delivery_tag: u64,
    redelivered: bool,
    exchange: String,
    routing_key: String,
    content: Vec<u8>,
    properties: AmqpProperties,
}

impl Delivery {
    pub(crate) fn from_deliver(
        channel_id: u16,
        deliver: Deliver,
        content: Vec<u8>,
        properties: AmqpProperties,
    ) -> Delivery {
        Delivery {
            channel_id,
            consumer_tag: Some(deliver.consumer_tag),
            delivery_tag: deliver.delivery_tag,
            redelivered: deliver.redelivered,
            exchange: deliver.exchange,
            routing_key: deliver.routing_key,
            content,
            properties,
        }
    }

    pub(crate) fn from_get_ok(
        channel_id: u16,
        get_ok: GetOk,
        content: Vec<u8>,
        properties: AmqpProperties,
    ) -> (Delivery, u32) {
        let delivery = Delivery {
            channel_id,
            consumer_tag: None,
            delivery_tag: get_ok.delivery_tag,
            redelivered: get_ok.redelivered,
            exchange: get_ok.exchange,
            routing_key: get_ok.routing_key,
            content,
            properties,
        };
        (delivery, get_ok.message_count)
    }

    /// The id of the channel this message arrived on. Acks must be sent on the same channel.
    pub fn channel_id(&self) -> u16 {
        self.channel_id
    }

    /// The tag of the consumer this message was delivered to; `None` for `basic.get`.
    pub fn consumer_tag(&self) -> Option<&str> {
        self.consumer_tag.as_ref().map(String::as_str)
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn properties(&self) -> &AmqpProperties {
        &self.properties
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// Acknowledge this message (and, if `multiple`, every earlier unacknowledged one).
    #[inline]
    pub fn ack(self, channel: &Channel, multiple: bool) -> Result<()> {
        channel.basic().ack(self.delivery_tag, multiple)
    }

    /// Reject this message (and, if `multiple`, every earlier unacknowledged one).
    #[inline]
    pub fn nack(self, channel: &Channel, multiple: bool, requeue: bool) -> Result<()> {
        channel.basic().nack(self.delivery_tag, multiple, requeue)
    }

    /// Reject this message.
    #[inline]
    pub fn reject(self, channel: &Channel, requeue: bool) -> Result<()> {
        channel.basic().reject(self.delivery_tag, requeue)
    }
}

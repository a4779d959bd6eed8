use crate::{AmqpProperties, Channel, Delivery, Result};
use amq_protocol::protocol::basic::GetOk;

/// A message fetched synchronously with [`Basic::get`](struct.Basic.html#method.get).
///
/// Unlike consumer deliveries, a fetched message also reports how many messages were still
/// waiting in the queue.
#[derive(Clone, Debug)]
pub struct Get {
    delivery: Delivery,
    message_count: u32,
}

impl Get {
    pub(crate) fn new(
        channel_id: u16,
        get_ok: GetOk,
        content: Vec<u8>,
        properties: AmqpProperties,
    ) -> Get {
        let (delivery, message_count) =
            Delivery::from_get_ok(channel_id, get_ok, content, properties);
        Get {
            delivery,
            message_count,
        }
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn into_delivery(self) -> Delivery {
        self.delivery
    }

    /// Messages left in the queue when the server answered.
    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    pub fn content(&self) -> &[u8] {
        self.delivery.content()
    }

    #[inline]
    pub fn ack(self, channel: &Channel) -> Result<()> {
        self.delivery.ack(channel, false)
    }

    #[inline]
    pub fn nack(self, channel: &Channel, requeue: bool) -> Result<()> {
        self.delivery.nack(channel, false, requeue)
    }

    #[inline]
    pub fn reject(self, channel: &Channel, requeue: bool) -> Result<()> {
        self.delivery.reject(channel, requeue)
    }
}

use crate::connection::ConnectionInner;
use crate::errors::*;
use crate::frame::{self, FrameKind};
use crate::inbound::Inbound;
use crate::rpc::{RequestId, Rpc};
use crate::serialize::{IntoAmqpClass, OutputBuffer, TryFromAmqpFrame};
use crate::stateful::Stateful;
use crate::{
    AmqpProperties, Basic, Delivery, Exchange, Get, InboundMessages, Queue, State, Tx,
};
use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::basic::AMQPMethod as AmqpBasic;
use amq_protocol::protocol::basic::{Cancel, CancelOk, Publish};
use amq_protocol::protocol::channel::AMQPMethod as AmqpChannel;
use amq_protocol::protocol::channel::{Close, CloseOk, FlowOk, Open, OpenOk};
use amq_protocol::protocol::confirm::AMQPMethod as AmqpConfirm;
use amq_protocol::protocol::confirm::{Select as ConfirmSelect, SelectOk as ConfirmSelectOk};
use amq_protocol::protocol::AMQPClass;
use indexmap::IndexSet;
use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Callback invoked with each delivery for a consumer registered through
/// [`Basic::consume`](struct.Basic.html#method.consume).
pub(crate) type ConsumerCallback = Box<dyn FnMut(&Channel, Delivery) + Send>;

/// Handle to an AMQP channel.
///
/// Channels are created with [`Connection::channel`](struct.Connection.html#method.channel).
/// Every synchronous request on a channel is serialized; use one channel per thread for
/// concurrency. Dropping a `Channel` closes it, ignoring errors.
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Drop for Channel {
    fn drop(&mut self) {
        let _ = self.inner.close();
    }
}

impl Channel {
    pub(crate) fn new(inner: Arc<ChannelInner>) -> Channel {
        Channel { inner }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &ChannelInner {
        &self.inner
    }

    pub fn channel_id(&self) -> u16 {
        self.inner.channel_id
    }

    pub fn state(&self) -> State {
        self.inner.stateful.state()
    }

    pub fn is_open(&self) -> bool {
        self.inner.stateful.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.stateful.is_closed()
    }

    /// Surface any error recorded against this channel or its connection.
    ///
    /// While the channel is open each recorded error is returned once. Once the channel is
    /// closed the error that closed it is returned on every call.
    pub fn check_for_errors(&self) -> Result<()> {
        self.inner.check_for_errors()
    }

    pub fn basic(&self) -> Basic {
        Basic::new(self)
    }

    pub fn queue(&self) -> Queue {
        Queue::new(self)
    }

    pub fn exchange(&self) -> Exchange {
        Exchange::new(self)
    }

    pub fn tx(&self) -> Tx {
        Tx::new(self)
    }

    /// Send a synchronous method and wait for its reply.
    pub fn rpc_request(&self, class: AMQPClass) -> Result<AMQPFrame> {
        self.inner.rpc_request(class)
    }

    /// Send a method that has no reply.
    pub fn write_frame(&self, class: AMQPClass) -> Result<()> {
        self.inner.write_method(class)
    }

    /// Enable publisher confirms. Afterwards [`Basic::publish`](struct.Basic.html#method.publish)
    /// waits for the broker's Ack or Nack.
    pub fn confirm_deliveries(&self) -> Result<()> {
        self.inner
            .rpc_request_as::<_, ConfirmSelectOk>(AmqpConfirm::Select(ConfirmSelect {
                nowait: false,
            }))?;
        self.inner.confirming.store(true, Ordering::SeqCst);
        debug!("channel {} now confirming deliveries", self.inner.channel_id);
        Ok(())
    }

    pub fn is_confirming_deliveries(&self) -> bool {
        self.inner.confirming.load(Ordering::SeqCst)
    }

    /// Iterate over deliveries for consumers started without a callback.
    ///
    /// With `break_on_empty` the iterator ends once no complete delivery is queued; otherwise it
    /// blocks until the channel closes or an error is raised.
    pub fn build_inbound_messages(&self, break_on_empty: bool) -> InboundMessages {
        InboundMessages::new(self, break_on_empty)
    }

    /// Hand every queued delivery to its consumer's callback, then return.
    pub fn process_data_events(&self) -> Result<()> {
        for delivery in self.build_inbound_messages(true) {
            self.dispatch(delivery?);
        }
        Ok(())
    }

    /// Dispatch deliveries to consumer callbacks until every consumer has been cancelled or the
    /// channel closes.
    pub fn start_consuming(&self) -> Result<()> {
        while self.inner.has_consumers() {
            self.process_data_events()?;
            if self.inner.stateful.is_closed() {
                break;
            }
            self.inner.inbound.wait(self.inner.poll_interval);
        }
        Ok(())
    }

    /// Cancel every consumer on this channel.
    pub fn stop_consuming(&self) -> Result<()> {
        for consumer_tag in self.inner.consumer_tags() {
            self.inner.cancel_consumer(&consumer_tag)?;
        }
        Ok(())
    }

    /// Tags of the consumers active on this channel, in the order they were started.
    pub fn consumer_tags(&self) -> Vec<String> {
        self.inner.consumer_tags()
    }

    /// Close the channel, cancelling its consumers.
    pub fn close(self) -> Result<()> {
        self.inner.close()
    }

    fn dispatch(&self, delivery: Delivery) {
        let consumer_tag = delivery.consumer_tag().unwrap_or_default().to_string();
        let callback = self
            .inner
            .callbacks
            .lock()
            .unwrap()
            .remove(&consumer_tag);
        match callback {
            Some(mut callback) => {
                // Not holding the lock lets the callback start or cancel consumers.
                callback(self, delivery);
                self.inner.restore_callback(consumer_tag, callback);
            }
            None => warn!(
                "channel {} has no callback for consumer {:?}; dropping delivery {}",
                self.inner.channel_id,
                consumer_tag,
                delivery.delivery_tag()
            ),
        }
    }
}

pub(crate) struct ChannelInner {
    channel_id: u16,
    connection: Weak<ConnectionInner>,
    stateful: Stateful,
    rpc: Rpc,
    // serializes request/reply exchanges so replies cannot interleave
    rpc_lock: Mutex<()>,
    rpc_timeout: Duration,
    poll_interval: Duration,
    inbound: Inbound,
    consumer_tags: Mutex<IndexSet<String>>,
    callbacks: Mutex<HashMap<String, ConsumerCallback>>,
    confirming: AtomicBool,
}

impl ChannelInner {
    pub(crate) fn new(
        channel_id: u16,
        connection: Weak<ConnectionInner>,
        rpc_timeout: Duration,
        poll_interval: Duration,
    ) -> ChannelInner {
        let stateful = Stateful::new();
        stateful.set_state(State::Opening);
        ChannelInner {
            channel_id,
            connection,
            stateful,
            rpc: Rpc::new(channel_id),
            rpc_lock: Mutex::new(()),
            rpc_timeout,
            poll_interval,
            inbound: Inbound::new(channel_id),
            consumer_tags: Mutex::new(IndexSet::new()),
            callbacks: Mutex::new(HashMap::new()),
            confirming: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> u16 {
        self.channel_id
    }

    #[inline]
    pub(crate) fn inbound(&self) -> &Inbound {
        &self.inbound
    }

    #[inline]
    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.stateful.is_closed()
    }

    /// Mark the channel closed and wake anyone waiting on a reply.
    pub(crate) fn set_closed(&self) {
        self.stateful.set_state(State::Closed);
        self.rpc.remove_all();
    }

    fn connection(&self) -> Result<Arc<ConnectionInner>> {
        match self.connection.upgrade() {
            Some(connection) => Ok(connection),
            None => ConnectionClosedSnafu.fail(),
        }
    }

    pub(crate) fn check_for_errors(&self) -> Result<()> {
        let connection_check = self
            .connection()
            .and_then(|connection| connection.check_for_errors());
        if let Err(err) = connection_check {
            if !self.stateful.is_closed() {
                self.set_closed();
            }
            return Err(err);
        }

        if self.stateful.is_closed() {
            return match self.stateful.first_exception() {
                Some(err) => Err(err),
                None => ChannelClosedSnafu {
                    channel_id: self.channel_id,
                }
                .fail(),
            };
        }
        match self.stateful.pop_exception() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Route a frame delivered by the connection's reader thread.
    pub(crate) fn on_frame(&self, frame: AMQPFrame) {
        let frame = match self.rpc.on_frame(frame) {
            Some(frame) => frame,
            None => return,
        };
        if FrameKind::of(&frame).is_content() {
            self.inbound.push(frame);
            return;
        }
        match frame {
            AMQPFrame::Method(_, AMQPClass::Basic(method)) => self.on_basic_method(method),
            AMQPFrame::Method(_, AMQPClass::Channel(method)) => self.on_channel_method(method),
            other => error!(
                "channel {} received unhandled frame {}",
                self.channel_id,
                FrameKind::of(&other)
            ),
        }
    }

    fn on_basic_method(&self, method: AmqpBasic) {
        match method {
            AmqpBasic::Cancel(cancel) => {
                warn!(
                    "channel {} consumer {} cancelled by server",
                    self.channel_id, cancel.consumer_tag
                );
                self.forget_consumer(&cancel.consumer_tag);
            }
            AmqpBasic::CancelOk(cancel_ok) => self.forget_consumer(&cancel_ok.consumer_tag),
            AmqpBasic::ConsumeOk(consume_ok) => {
                self.consumer_tags
                    .lock()
                    .unwrap()
                    .insert(consume_ok.consumer_tag);
            }
            AmqpBasic::Return(ret) => {
                debug!(
                    "channel {} message returned: {} ({})",
                    self.channel_id, ret.reply_text, ret.reply_code
                );
                self.inbound.discard_returned_content();
                self.stateful.push_exception(Error::MessageReturned {
                    channel_id: self.channel_id,
                    reply_code: ret.reply_code,
                    reply_text: ret.reply_text,
                    routing_key: ret.routing_key,
                    exchange: ret.exchange,
                });
            }
            AmqpBasic::Ack(_) | AmqpBasic::Nack(_) => {
                debug!(
                    "channel {} ignoring confirm nobody is waiting for",
                    self.channel_id
                );
            }
            other => error!(
                "channel {} received unhandled method {}",
                self.channel_id,
                FrameKind::of_class(&AMQPClass::Basic(other))
            ),
        }
    }

    fn on_channel_method(&self, method: AmqpChannel) {
        match method {
            AmqpChannel::Close(close) => {
                warn!(
                    "channel {} closed by server (code={}): {}",
                    self.channel_id, close.reply_code, close.reply_text
                );
                if let Ok(connection) = self.connection() {
                    let _ = connection
                        .write_method(self.channel_id, AmqpChannel::CloseOk(CloseOk {}));
                }
                self.clear_consumers();
                self.inbound.clear();
                self.stateful.push_exception(Error::ServerClosedChannel {
                    channel_id: self.channel_id,
                    code: close.reply_code,
                    message: close.reply_text,
                });
                self.set_closed();
            }
            AmqpChannel::Flow(flow) => {
                debug!("channel {} flow active = {}", self.channel_id, flow.active);
                if let Ok(connection) = self.connection() {
                    let _ = connection.write_method(
                        self.channel_id,
                        AmqpChannel::FlowOk(FlowOk {
                            active: flow.active,
                        }),
                    );
                }
            }
            other => error!(
                "channel {} received unhandled method {}",
                self.channel_id,
                FrameKind::of_class(&AMQPClass::Channel(other))
            ),
        }
    }

    pub(crate) fn lock_rpc(&self) -> MutexGuard<()> {
        self.rpc_lock.lock().unwrap()
    }

    /// Send `class` and block for its reply.
    pub(crate) fn rpc_request(&self, class: AMQPClass) -> Result<AMQPFrame> {
        let valid = frame::valid_responses(&class);
        if valid.is_empty() {
            return InvalidArgumentSnafu {
                parameter: "method",
                expected: "a synchronous AMQP method",
            }
            .fail();
        }
        let _guard = self.lock_rpc();
        self.check_for_errors()?;
        let token = self.rpc.register_request(valid);
        let mut buf = OutputBuffer::empty();
        buf.push_class(self.channel_id, &class)?;
        self.write_for(token, &buf)?;
        self.wait_for(token, false)
    }

    pub(crate) fn rpc_request_as<M, T>(&self, method: M) -> Result<T>
    where
        M: IntoAmqpClass,
        T: TryFromAmqpFrame,
    {
        let frame = self.rpc_request(method.into_class())?;
        T::try_from(self.channel_id, frame)
    }

    /// Write `buf` for a registered request, deregistering it if the write fails.
    fn write_for(&self, token: RequestId, buf: &OutputBuffer) -> Result<()> {
        let written = self
            .connection()
            .and_then(|connection| connection.write(buf));
        if written.is_err() {
            self.rpc.remove(token);
        }
        written
    }

    fn wait_for(&self, token: RequestId, multiple: bool) -> Result<AMQPFrame> {
        self.rpc
            .get_request(token, multiple, self.rpc_timeout, || self.check_for_errors())
    }

    pub(crate) fn write_method<M: IntoAmqpClass>(&self, method: M) -> Result<()> {
        self.check_for_errors()?;
        self.connection()?.write_method(self.channel_id, method)
    }

    pub(crate) fn open(&self) -> Result<()> {
        let open_ok = self.rpc_request_as::<_, OpenOk>(AmqpChannel::Open(Open {
            out_of_band: String::new(),
        }))?;
        trace!("channel {} got open-ok: {:?}", self.channel_id, open_ok);
        self.stateful.set_state(State::Open);
        Ok(())
    }

    /// Publish one message: method, header and body frames go out in a single write.
    ///
    /// Returns whether the broker accepted the message. Without publisher confirms that is
    /// always `true`. A returned `mandatory`/`immediate` message surfaces as
    /// `Error::MessageReturned`.
    pub(crate) fn publish(
        &self,
        publish: Publish,
        content: &[u8],
        properties: &AmqpProperties,
    ) -> Result<bool> {
        let returnable = publish.mandatory || publish.immediate;
        let connection = self.connection()?;
        let mut buf = OutputBuffer::empty();
        buf.push_method(self.channel_id, AmqpBasic::Publish(publish))?;
        buf.push_content(
            self.channel_id,
            properties,
            content,
            connection.max_frame_size(),
        )?;

        let accepted = if self.confirming.load(Ordering::SeqCst) {
            let _guard = self.lock_rpc();
            self.check_for_errors()?;
            let token = self
                .rpc
                .register_request(&[FrameKind::BasicAck, FrameKind::BasicNack]);
            self.write_for(token, &buf)?;
            match self.wait_for(token, false)? {
                AMQPFrame::Method(_, AMQPClass::Basic(AmqpBasic::Ack(_))) => true,
                AMQPFrame::Method(_, AMQPClass::Basic(AmqpBasic::Nack(_))) => false,
                other => return self.unexpected("Basic.Ack or Basic.Nack", &other),
            }
        } else {
            self.check_for_errors()?;
            connection.write(&buf)?;
            true
        };

        if returnable {
            self.check_for_errors()?;
        }
        Ok(accepted)
    }

    /// Fetch one message; `None` if the queue was empty.
    pub(crate) fn get(&self, get: amq_protocol::protocol::basic::Get) -> Result<Option<Get>> {
        let _guard = self.lock_rpc();
        self.check_for_errors()?;
        // header and body frames answer the same request
        let token = self.rpc.register_request(&[
            FrameKind::BasicGetOk,
            FrameKind::BasicGetEmpty,
            FrameKind::ContentHeader,
            FrameKind::ContentBody,
        ]);
        let mut buf = OutputBuffer::empty();
        buf.push_method(self.channel_id, AmqpBasic::Get(get))?;
        self.write_for(token, &buf)?;
        let result = self.collect_get(token);
        self.rpc.remove(token);
        result
    }

    fn collect_get(&self, token: RequestId) -> Result<Option<Get>> {
        let get_ok = match self.wait_for(token, true)? {
            AMQPFrame::Method(_, AMQPClass::Basic(AmqpBasic::GetOk(get_ok))) => get_ok,
            AMQPFrame::Method(_, AMQPClass::Basic(AmqpBasic::GetEmpty(_))) => return Ok(None),
            other => return self.unexpected("Basic.GetOk or Basic.GetEmpty", &other),
        };
        let header = match self.wait_for(token, true)? {
            AMQPFrame::Header(_, _, header) => header,
            other => return self.unexpected("content header", &other),
        };
        let mut content = Vec::with_capacity(header.body_size as usize);
        while (content.len() as u64) < header.body_size {
            match self.wait_for(token, true)? {
                AMQPFrame::Body(_, data) if data.is_empty() => break,
                AMQPFrame::Body(_, data) => content.extend_from_slice(&data),
                other => return self.unexpected("content body", &other),
            }
        }
        Ok(Some(Get::new(
            self.channel_id,
            get_ok,
            content,
            header.properties,
        )))
    }

    fn unexpected<T>(&self, expected: &str, received: &AMQPFrame) -> Result<T> {
        FrameUnexpectedSnafu {
            channel_id: self.channel_id,
            expected,
            received: FrameKind::of(received).name(),
        }
        .fail()
    }

    pub(crate) fn add_consumer(&self, consumer_tag: String, callback: Option<ConsumerCallback>) {
        if let Some(callback) = callback {
            self.callbacks
                .lock()
                .unwrap()
                .insert(consumer_tag.clone(), callback);
        }
        self.consumer_tags.lock().unwrap().insert(consumer_tag);
    }

    pub(crate) fn cancel_consumer(&self, consumer_tag: &str) -> Result<()> {
        if self.stateful.is_closed() {
            self.forget_consumer(consumer_tag);
            return Ok(());
        }
        let cancel_ok = self.rpc_request_as::<_, CancelOk>(AmqpBasic::Cancel(Cancel {
            consumer_tag: consumer_tag.to_string(),
            nowait: false,
        }));
        self.forget_consumer(consumer_tag);
        cancel_ok.map(|_| ())
    }

    fn forget_consumer(&self, consumer_tag: &str) {
        self.consumer_tags.lock().unwrap().shift_remove(consumer_tag);
        self.callbacks.lock().unwrap().remove(consumer_tag);
    }

    fn clear_consumers(&self) {
        self.consumer_tags.lock().unwrap().clear();
        self.callbacks.lock().unwrap().clear();
    }

    // A callback is only put back if its consumer survived the call.
    fn restore_callback(&self, consumer_tag: String, callback: ConsumerCallback) {
        if self.consumer_tags.lock().unwrap().contains(&consumer_tag) {
            self.callbacks
                .lock()
                .unwrap()
                .entry(consumer_tag)
                .or_insert(callback);
        }
    }

    pub(crate) fn consumer_tags(&self) -> Vec<String> {
        self.consumer_tags.lock().unwrap().iter().cloned().collect()
    }

    fn has_consumers(&self) -> bool {
        !self.consumer_tags.lock().unwrap().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn has_callback(&self, consumer_tag: &str) -> bool {
        self.callbacks.lock().unwrap().contains_key(consumer_tag)
    }

    #[cfg(test)]
    pub(crate) fn rpc_is_idle(&self) -> bool {
        self.rpc.is_idle()
    }

    /// Close the channel and give its id back to the connection.
    pub(crate) fn close(&self) -> Result<()> {
        if self.stateful.is_closed() {
            self.release();
            return Ok(());
        }
        debug!("closing channel {}", self.channel_id);
        self.stateful.set_state(State::Closing);
        self.stateful.clear_exceptions();

        let result = self.close_with_server();
        self.clear_consumers();
        self.inbound.clear();
        self.set_closed();
        self.release();
        result
    }

    fn close_with_server(&self) -> Result<()> {
        let connection = match self.connection.upgrade() {
            Some(connection) if connection.stateful.is_open() => connection,
            _ => return Ok(()),
        };
        for consumer_tag in self.consumer_tags() {
            if let Err(err) = self.cancel_consumer(&consumer_tag) {
                debug!(
                    "channel {} failed to cancel consumer {}: {}",
                    self.channel_id, consumer_tag, err
                );
            }
        }
        drop(connection);
        self.rpc_request_as::<_, CloseOk>(AmqpChannel::Close(Close {
            reply_code: 200,
            reply_text: String::new(),
            class_id: 0,
            method_id: 0,
        }))
        .map(|_| ())
    }

    fn release(&self) {
        if let Some(connection) = self.connection.upgrade() {
            connection.release_channel(self);
        }
    }
}

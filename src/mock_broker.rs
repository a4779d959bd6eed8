//! In-process stand-in for an AMQP broker, connected to the client through a pair of crossbeam
//! channels. It implements just enough of the protocol to drive the client end to end: the
//! handshake, channels, queue declaration, publishing (with confirms and returns), `basic.get`
//! and consumers.
//!
//! A few queue names trigger server-initiated events:
//! * declaring `"__close_connection"` makes the broker close the connection with code 320;
//! * a passive declare of an unknown queue closes the channel with code 404;
//! * `"__cancel_consumers"` sends Basic.Cancel for every consumer on the channel first;
//! * `"__flow"` sends Channel.Flow (inactive) first;
//! * `"__unexpected"` sends a Queue.PurgeOk nobody asked for first;
//! * `"__no_reply"` gets no DeclareOk until the channel's next Basic.Qos, which releases it
//!   ahead of the QosOk.

use crate::frame_buffer::FrameBuffer;
use crate::serialize::OutputBuffer;
use crate::{
    AmqpProperties, Connection, ConnectionOptions, FieldTable, FrameKind, IoStream, Result,
};
use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::basic::AMQPMethod as AmqpBasic;
use amq_protocol::protocol::basic::{
    Ack, Cancel, CancelOk, ConsumeOk, Deliver, GetEmpty, GetOk, Publish, QosOk, Return,
};
use amq_protocol::protocol::channel::AMQPMethod as AmqpChannel;
use amq_protocol::protocol::channel::{
    Close as ChannelClose, CloseOk as ChannelCloseOk, Flow,
};
use amq_protocol::protocol::channel::OpenOk as ChannelOpenOk;
use amq_protocol::protocol::confirm::AMQPMethod as AmqpConfirm;
use amq_protocol::protocol::confirm::SelectOk as ConfirmSelectOk;
use amq_protocol::protocol::connection::AMQPMethod as AmqpConnection;
use amq_protocol::protocol::connection::{
    Blocked, Close as ConnectionClose, CloseOk as ConnectionCloseOk, OpenOk as ConnectionOpenOk,
    Start, Tune,
};
use amq_protocol::protocol::queue::AMQPMethod as AmqpQueue;
use amq_protocol::protocol::queue::{Declare, DeclareOk, PurgeOk};
use amq_protocol::protocol::AMQPClass;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use indexmap::IndexMap;
use log::{debug, trace};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const PROTOCOL_HEADER: &[u8] = b"AMQP\x00\x00\x09\x01";

/// One end of an in-memory byte pipe.
pub(crate) struct MemoryStream {
    reader: MemoryReader,
    writer: MemoryWriter,
}

/// A connected pair of streams; bytes written to one are read from the other.
pub(crate) fn pipe() -> (MemoryStream, MemoryStream) {
    let (a_tx, a_rx) = crossbeam_channel::unbounded();
    let (b_tx, b_rx) = crossbeam_channel::unbounded();
    let end = |rx, tx| MemoryStream {
        reader: MemoryReader {
            rx,
            pending: Vec::new(),
            pos: 0,
            poll_interval: Duration::from_millis(10),
        },
        writer: MemoryWriter { tx },
    };
    (end(a_rx, b_tx), end(b_rx, a_tx))
}

impl IoStream for MemoryStream {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn into_split(mut self, poll_interval: Duration) -> io::Result<(MemoryReader, MemoryWriter)> {
        self.reader.poll_interval = poll_interval;
        Ok((self.reader, self.writer))
    }
}

pub(crate) struct MemoryReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
    poll_interval: Duration,
}

impl MemoryReader {
    // Blocks until exactly `n` bytes have arrived.
    fn read_exact_blocking(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut out = vec![0; n];
        let mut filled = 0;
        while filled < n {
            match self.read(&mut out[filled..]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(len) => filled += len,
                Err(ref err) if err.kind() == io::ErrorKind::TimedOut => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.pending.len() {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = usize::min(buf.len(), self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub(crate) struct MemoryWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What the broker proposes in Connection.Tune, plus optional misbehaviour.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BrokerConfig {
    pub(crate) channel_max: u16,
    pub(crate) frame_max: u32,
    pub(crate) heartbeat: u16,
    pub(crate) block_after_open: bool,
}

impl Default for BrokerConfig {
    fn default() -> BrokerConfig {
        BrokerConfig {
            channel_max: 2047,
            frame_max: 4096,
            heartbeat: 0,
            block_after_open: false,
        }
    }
}

pub(crate) struct FakeBroker {
    handle: Option<JoinHandle<()>>,
    received: Arc<Mutex<Vec<FrameKind>>>,
}

impl FakeBroker {
    pub(crate) fn start(config: BrokerConfig, stream: MemoryStream) -> FakeBroker {
        let MemoryStream { reader, writer } = stream;
        let received = Arc::new(Mutex::new(Vec::new()));
        let broker = Broker {
            config,
            writer,
            received: Arc::clone(&received),
            withheld: Vec::new(),
            queues: HashMap::new(),
            consumers: IndexMap::new(),
            channels: HashMap::new(),
            next_consumer: 1,
        };
        let handle = thread::Builder::new()
            .name("fake-broker".to_string())
            .spawn(move || broker.run(reader))
            .unwrap();
        FakeBroker {
            handle: Some(handle),
            received,
        }
    }

    /// Kinds of every method frame the broker has read so far, in arrival order.
    pub(crate) fn received(&self) -> Vec<FrameKind> {
        self.received.lock().unwrap().clone()
    }

    /// Wait for the broker to see the client hang up.
    pub(crate) fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

/// Client options suited to the in-memory transport: short polls and timeouts.
pub(crate) fn client_options() -> ConnectionOptions {
    ConnectionOptions::default()
        .heartbeat(0)
        .poll_interval(Duration::from_millis(10))
        .rpc_timeout(Duration::from_secs(5))
        .channel_rpc_timeout(Duration::from_secs(5))
}

pub(crate) fn connect(config: BrokerConfig, options: ConnectionOptions) -> Result<(Connection, FakeBroker)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (client, server) = pipe();
    let broker = FakeBroker::start(config, server);
    let connection = Connection::open_stream(client, options)?;
    Ok((connection, broker))
}

struct Message {
    exchange: String,
    routing_key: String,
    properties: AmqpProperties,
    content: Vec<u8>,
}

struct PendingPublish {
    publish: Publish,
    properties: AmqpProperties,
    body_size: u64,
    content: Vec<u8>,
}

#[derive(Default)]
struct ChannelState {
    confirming: bool,
    published: u64,
    delivered: u64,
    pending: Option<PendingPublish>,
}

struct Broker {
    config: BrokerConfig,
    writer: MemoryWriter,
    received: Arc<Mutex<Vec<FrameKind>>>,
    // replies held back by "__no_reply", per channel
    withheld: Vec<(u16, AMQPClass)>,
    queues: HashMap<String, VecDeque<Message>>,
    // consumer tag -> (channel, queue)
    consumers: IndexMap<String, (u16, String)>,
    channels: HashMap<u16, ChannelState>,
    next_consumer: u32,
}

// Returned from the frame handler to stop the broker.
struct Hangup;

impl Broker {
    fn run(mut self, mut reader: MemoryReader) {
        match reader.read_exact_blocking(PROTOCOL_HEADER.len()) {
            Ok(ref header) if header.as_slice() == PROTOCOL_HEADER => (),
            other => {
                debug!("fake broker: bad protocol header {:?}", other);
                return;
            }
        }
        self.send_method(
            0,
            AMQPClass::Connection(AmqpConnection::Start(Start {
                version_major: 0,
                version_minor: 9,
                server_properties: FieldTable::new(),
                mechanisms: "PLAIN AMQPLAIN".to_string(),
                locales: "en_US".to_string(),
            })),
        );

        let mut frames = FrameBuffer::new();
        let mut hangup = false;
        while !hangup {
            let result = frames.read_from(&mut reader, |frame| {
                if self.on_frame(frame).is_err() {
                    hangup = true;
                }
                Ok(())
            });
            if result.is_err() {
                break;
            }
        }
        trace!("fake broker exiting");
    }

    fn send(&mut self, buf: OutputBuffer) {
        // the client may already be gone; nothing to do about it here
        let _ = self.writer.write_all(buf.as_bytes());
    }

    fn send_method(&mut self, channel_id: u16, class: AMQPClass) {
        let mut buf = OutputBuffer::empty();
        buf.push_class(channel_id, &class).unwrap();
        self.send(buf);
    }

    fn send_with_content(&mut self, channel_id: u16, class: AMQPClass, message: &Message) {
        let mut buf = OutputBuffer::empty();
        buf.push_class(channel_id, &class).unwrap();
        buf.push_content(
            channel_id,
            &message.properties,
            &message.content,
            self.config.frame_max,
        )
        .unwrap();
        self.send(buf);
    }

    fn on_frame(&mut self, frame: AMQPFrame) -> std::result::Result<(), Hangup> {
        if let AMQPFrame::Method(..) = frame {
            self.received.lock().unwrap().push(FrameKind::of(&frame));
        }
        match frame {
            AMQPFrame::Method(channel_id, class) => self.on_method(channel_id, class),
            AMQPFrame::Header(channel_id, _, header) => {
                if let Some(pending) = self.channel(channel_id).pending.as_mut() {
                    pending.properties = header.properties;
                    pending.body_size = header.body_size;
                }
                self.maybe_finish_publish(channel_id);
                Ok(())
            }
            AMQPFrame::Body(channel_id, data) => {
                if let Some(pending) = self.channel(channel_id).pending.as_mut() {
                    pending.content.extend_from_slice(&data);
                }
                self.maybe_finish_publish(channel_id);
                Ok(())
            }
            AMQPFrame::Heartbeat(_) => Ok(()),
            other => {
                debug!("fake broker ignoring {:?}", other);
                Ok(())
            }
        }
    }

    fn channel(&mut self, channel_id: u16) -> &mut ChannelState {
        self.channels.entry(channel_id).or_default()
    }

    fn on_method(&mut self, channel_id: u16, class: AMQPClass) -> std::result::Result<(), Hangup> {
        match class {
            AMQPClass::Connection(AmqpConnection::StartOk(_)) => {
                let tune = Tune {
                    channel_max: self.config.channel_max,
                    frame_max: self.config.frame_max,
                    heartbeat: self.config.heartbeat,
                };
                self.send_method(0, AMQPClass::Connection(AmqpConnection::Tune(tune)));
            }
            AMQPClass::Connection(AmqpConnection::TuneOk(_)) => (),
            AMQPClass::Connection(AmqpConnection::Open(_)) => {
                self.send_method(
                    0,
                    AMQPClass::Connection(AmqpConnection::OpenOk(ConnectionOpenOk {
                        known_hosts: String::new(),
                    })),
                );
                if self.config.block_after_open {
                    self.send_method(
                        0,
                        AMQPClass::Connection(AmqpConnection::Blocked(Blocked {
                            reason: "low on memory".to_string(),
                        })),
                    );
                }
            }
            AMQPClass::Connection(AmqpConnection::Close(_)) => {
                self.send_method(
                    0,
                    AMQPClass::Connection(AmqpConnection::CloseOk(ConnectionCloseOk {})),
                );
                return Err(Hangup);
            }
            AMQPClass::Connection(AmqpConnection::CloseOk(_)) => return Err(Hangup),
            AMQPClass::Channel(AmqpChannel::Open(_)) => {
                self.channels.insert(channel_id, ChannelState::default());
                self.send_method(
                    channel_id,
                    AMQPClass::Channel(AmqpChannel::OpenOk(ChannelOpenOk {
                        channel_id: String::new(),
                    })),
                );
            }
            AMQPClass::Channel(AmqpChannel::Close(_)) => {
                self.drop_channel(channel_id);
                self.send_method(
                    channel_id,
                    AMQPClass::Channel(AmqpChannel::CloseOk(ChannelCloseOk {})),
                );
            }
            AMQPClass::Channel(AmqpChannel::CloseOk(_)) => self.drop_channel(channel_id),
            AMQPClass::Queue(AmqpQueue::Declare(declare)) => {
                self.on_queue_declare(channel_id, declare)
            }
            AMQPClass::Confirm(AmqpConfirm::Select(_)) => {
                self.channel(channel_id).confirming = true;
                self.send_method(
                    channel_id,
                    AMQPClass::Confirm(AmqpConfirm::SelectOk(ConfirmSelectOk {})),
                );
            }
            AMQPClass::Basic(method) => self.on_basic(channel_id, method),
            other => debug!("fake broker ignoring method {:?}", other),
        }
        Ok(())
    }

    fn drop_channel(&mut self, channel_id: u16) {
        self.channels.remove(&channel_id);
        self.consumers.retain(|_, (channel, _)| *channel != channel_id);
    }

    fn on_queue_declare(&mut self, channel_id: u16, declare: Declare) {
        if declare.queue == "__close_connection" {
            self.send_method(
                0,
                AMQPClass::Connection(AmqpConnection::Close(ConnectionClose {
                    reply_code: 320,
                    reply_text: "CONNECTION_FORCED - broker forced connection closure"
                        .to_string(),
                    class_id: 0,
                    method_id: 0,
                })),
            );
            return;
        }
        if declare.passive && !self.queues.contains_key(&declare.queue) {
            self.drop_channel(channel_id);
            self.send_method(
                channel_id,
                AMQPClass::Channel(AmqpChannel::Close(ChannelClose {
                    reply_code: 404,
                    reply_text: format!("NOT_FOUND - no queue '{}'", declare.queue),
                    class_id: 50,
                    method_id: 10,
                })),
            );
            return;
        }
        match declare.queue.as_str() {
            "__cancel_consumers" => {
                let tags = self
                    .consumers
                    .iter()
                    .filter(|(_, (channel, _))| *channel == channel_id)
                    .map(|(tag, _)| tag.clone())
                    .collect::<Vec<_>>();
                for consumer_tag in tags {
                    self.consumers.shift_remove(&consumer_tag);
                    self.send_method(
                        channel_id,
                        AMQPClass::Basic(AmqpBasic::Cancel(Cancel {
                            consumer_tag,
                            nowait: true,
                        })),
                    );
                }
            }
            "__flow" => self.send_method(
                channel_id,
                AMQPClass::Channel(AmqpChannel::Flow(Flow { active: false })),
            ),
            "__unexpected" => self.send_method(
                channel_id,
                AMQPClass::Queue(AmqpQueue::PurgeOk(PurgeOk { message_count: 7 })),
            ),
            "__no_reply" => {
                let reply = AMQPClass::Queue(AmqpQueue::DeclareOk(DeclareOk {
                    queue: declare.queue,
                    message_count: 0,
                    consumer_count: 0,
                }));
                self.withheld.push((channel_id, reply));
                return;
            }
            _ => (),
        }
        let queue = self.queues.entry(declare.queue.clone()).or_default();
        let message_count = queue.len() as u32;
        let consumer_count = self
            .consumers
            .values()
            .filter(|(_, name)| *name == declare.queue)
            .count() as u32;
        self.send_method(
            channel_id,
            AMQPClass::Queue(AmqpQueue::DeclareOk(DeclareOk {
                queue: declare.queue,
                message_count,
                consumer_count,
            })),
        );
    }

    fn on_basic(&mut self, channel_id: u16, method: AmqpBasic) {
        match method {
            AmqpBasic::Publish(publish) => {
                self.channel(channel_id).pending = Some(PendingPublish {
                    publish,
                    properties: AmqpProperties::default(),
                    body_size: u64::max_value(),
                    content: Vec::new(),
                });
            }
            AmqpBasic::Get(get) => {
                let message = self
                    .queues
                    .get_mut(&get.queue)
                    .and_then(|queue| queue.pop_front());
                match message {
                    Some(message) => {
                        let message_count = self.queues[&get.queue].len() as u32;
                        let delivery_tag = self.next_delivery_tag(channel_id);
                        let get_ok = GetOk {
                            delivery_tag,
                            redelivered: false,
                            exchange: message.exchange.clone(),
                            routing_key: message.routing_key.clone(),
                            message_count,
                        };
                        self.send_with_content(
                            channel_id,
                            AMQPClass::Basic(AmqpBasic::GetOk(get_ok)),
                            &message,
                        );
                    }
                    None => self.send_method(
                        channel_id,
                        AMQPClass::Basic(AmqpBasic::GetEmpty(GetEmpty {
                            cluster_id: String::new(),
                        })),
                    ),
                }
            }
            AmqpBasic::Consume(consume) => {
                let consumer_tag = if consume.consumer_tag.is_empty() {
                    let tag = format!("ctag-{}", self.next_consumer);
                    self.next_consumer += 1;
                    tag
                } else {
                    consume.consumer_tag
                };
                self.consumers
                    .insert(consumer_tag.clone(), (channel_id, consume.queue.clone()));
                self.send_method(
                    channel_id,
                    AMQPClass::Basic(AmqpBasic::ConsumeOk(ConsumeOk { consumer_tag })),
                );
                self.drain_to_consumers(&consume.queue);
            }
            AmqpBasic::Cancel(cancel) => {
                self.consumers.shift_remove(&cancel.consumer_tag);
                self.send_method(
                    channel_id,
                    AMQPClass::Basic(AmqpBasic::CancelOk(CancelOk {
                        consumer_tag: cancel.consumer_tag,
                    })),
                );
            }
            AmqpBasic::Qos(_) => {
                let (late, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.withheld)
                    .into_iter()
                    .partition(|(channel, _)| *channel == channel_id);
                self.withheld = kept;
                for (_, reply) in late {
                    self.send_method(channel_id, reply);
                }
                self.send_method(channel_id, AMQPClass::Basic(AmqpBasic::QosOk(QosOk {})))
            }
            AmqpBasic::Ack(_) | AmqpBasic::Nack(_) | AmqpBasic::Reject(_) => (),
            other => debug!("fake broker ignoring basic method {:?}", other),
        }
    }

    fn next_delivery_tag(&mut self, channel_id: u16) -> u64 {
        let channel = self.channel(channel_id);
        channel.delivered += 1;
        channel.delivered
    }

    fn maybe_finish_publish(&mut self, channel_id: u16) {
        let complete = match &self.channel(channel_id).pending {
            Some(pending) => pending.content.len() as u64 >= pending.body_size,
            None => false,
        };
        if !complete {
            return;
        }
        let pending = match self.channel(channel_id).pending.take() {
            Some(pending) => pending,
            None => return,
        };
        let message = Message {
            exchange: pending.publish.exchange,
            routing_key: pending.publish.routing_key,
            properties: pending.properties,
            content: pending.content,
        };

        // only the default exchange routes anywhere
        let routed = message.exchange.is_empty() && self.queues.contains_key(&message.routing_key);
        if routed {
            let queue = message.routing_key.clone();
            if let Some(messages) = self.queues.get_mut(&queue) {
                messages.push_back(message);
            }
            self.drain_to_consumers(&queue);
        } else if pending.publish.mandatory {
            let ret = Return {
                reply_code: 312,
                reply_text: "NO_ROUTE".to_string(),
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
            };
            self.send_with_content(channel_id, AMQPClass::Basic(AmqpBasic::Return(ret)), &message);
        }

        let channel = self.channel(channel_id);
        channel.published += 1;
        if channel.confirming {
            let delivery_tag = channel.published;
            self.send_method(
                channel_id,
                AMQPClass::Basic(AmqpBasic::Ack(Ack {
                    delivery_tag,
                    multiple: false,
                })),
            );
        }
    }

    fn drain_to_consumers(&mut self, queue: &str) {
        let consumer = self
            .consumers
            .iter()
            .find(|(_, (_, name))| name.as_str() == queue)
            .map(|(tag, (channel_id, _))| (tag.clone(), *channel_id));
        let (consumer_tag, channel_id) = match consumer {
            Some(consumer) => consumer,
            None => return,
        };
        loop {
            let message = match self.queues.get_mut(queue).and_then(|q| q.pop_front()) {
                Some(message) => message,
                None => return,
            };
            let delivery_tag = self.next_delivery_tag(channel_id);
            let deliver = Deliver {
                consumer_tag: consumer_tag.clone(),
                delivery_tag,
                redelivered: false,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
            };
            self.send_with_content(
                channel_id,
                AMQPClass::Basic(AmqpBasic::Deliver(deliver)),
                &message,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConsumeOptions, Error, QueueDeclareOptions};
    use std::time::Instant;

    fn open(config: BrokerConfig) -> (Connection, FakeBroker) {
        connect(config, client_options()).unwrap()
    }

    fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut done: F) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn handshake_negotiates_limits() {
        let config = BrokerConfig {
            channel_max: 64,
            frame_max: 8192,
            ..BrokerConfig::default()
        };
        let (connection, broker) = open(config);
        assert!(connection.is_open());
        assert_eq!(connection.max_allowed_channels(), 64);
        assert_eq!(connection.max_frame_size(), 8192);
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn declare_publish_get() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        let queue = channel
            .queue()
            .declare("hello", QueueDeclareOptions::default())
            .unwrap();
        assert_eq!(queue.name(), "hello");

        let accepted = channel
            .basic()
            .publish("hello", "", "hello", false, false, &AmqpProperties::default())
            .unwrap();
        assert!(accepted);

        let get = channel.basic().get("hello", false).unwrap().unwrap();
        assert_eq!(get.content(), b"hello");
        assert_eq!(get.message_count(), 0);
        get.ack(&channel).unwrap();
        assert!(channel.basic().get("hello", false).unwrap().is_none());

        channel.close().unwrap();
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn large_message_is_split_into_body_frames() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        channel
            .queue()
            .declare("big", QueueDeclareOptions::default())
            .unwrap();
        let content = (0..20_000).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        channel
            .basic()
            .publish(&content, "", "big", false, false, &AmqpProperties::default())
            .unwrap();
        let get = channel.basic().get("big", true).unwrap().unwrap();
        assert_eq!(get.content(), content.as_slice());
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn returned_mandatory_publish_keeps_channel_open() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        channel.confirm_deliveries().unwrap();

        let err = channel
            .basic()
            .publish("lost", "", "nowhere", true, false, &AmqpProperties::default())
            .unwrap_err();
        match err {
            Error::MessageReturned {
                reply_code,
                ref routing_key,
                ..
            } => {
                assert_eq!(reply_code, 312);
                assert_eq!(routing_key, "nowhere");
            }
            ref other => panic!("unexpected error {:?}", other),
        }
        assert!(err.is_message_error());
        assert!(channel.is_open());

        // the returned body never shows up as a delivery, and the channel still works
        channel
            .queue()
            .declare("after-return", QueueDeclareOptions::default())
            .unwrap();
        assert_eq!(channel.build_inbound_messages(true).count(), 0);
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn consumer_callbacks_run_in_delivery_order() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        channel
            .queue()
            .declare("work", QueueDeclareOptions::default())
            .unwrap();
        for i in 0..5 {
            channel
                .basic()
                .publish(
                    format!("job-{}", i),
                    "",
                    "work",
                    false,
                    false,
                    &AmqpProperties::default(),
                )
                .unwrap();
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&received);
        channel
            .basic()
            .consume("work", ConsumeOptions::default(), move |channel, delivery| {
                let body = String::from_utf8_lossy(delivery.content()).into_owned();
                let tag = delivery.consumer_tag().unwrap().to_string();
                delivery.ack(channel, false).unwrap();
                let mut seen = seen.lock().unwrap();
                seen.push(body);
                if seen.len() == 5 {
                    channel.basic().cancel(&tag).unwrap();
                }
            })
            .unwrap();
        channel.start_consuming().unwrap();

        let expected = (0..5).map(|i| format!("job-{}", i)).collect::<Vec<_>>();
        assert_eq!(*received.lock().unwrap(), expected);
        assert!(channel.consumer_tags().is_empty());
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn inbound_messages_without_callback() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        channel
            .queue()
            .declare("plain", QueueDeclareOptions::default())
            .unwrap();
        let tag = channel
            .basic()
            .consume_inbound("plain", ConsumeOptions::default())
            .unwrap();
        assert_eq!(channel.consumer_tags(), vec![tag]);
        for body in &["a", "b"] {
            channel
                .basic()
                .publish(*body, "", "plain", false, false, &AmqpProperties::default())
                .unwrap();
        }
        let bodies = channel
            .build_inbound_messages(false)
            .take(2)
            .map(|delivery| delivery.unwrap().into_content())
            .collect::<Vec<_>>();
        assert_eq!(bodies, vec![b"a".to_vec(), b"b".to_vec()]);
        channel.stop_consuming().unwrap();
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn server_channel_close_is_sticky() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        let err = channel.queue().declare_passive("missing").unwrap_err();
        assert_eq!(err.reply_code(), Some(404));
        assert!(err.is_channel_error());

        assert!(channel.is_closed());
        match channel.check_for_errors() {
            Err(Error::ServerClosedChannel { code: 404, .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        // reported again while the channel stays closed
        assert!(channel.check_for_errors().is_err());

        // the connection is unaffected
        assert!(connection.check_for_errors().is_ok());
        let other = connection.channel().unwrap();
        other
            .queue()
            .declare("fine", QueueDeclareOptions::default())
            .unwrap();
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn server_connection_close_fails_every_channel() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        let err = channel
            .queue()
            .declare("__close_connection", QueueDeclareOptions::default())
            .unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.reply_code(), Some(320));

        assert!(connection.is_closed());
        assert!(channel.is_closed());
        // connection errors are never consumed
        for _ in 0..2 {
            match connection.check_for_errors() {
                Err(Error::ServerClosedConnection { code: 320, .. }) => (),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(connection.channel().is_err());
        drop(channel);
        drop(connection);
        broker.join();
    }

    #[test]
    fn channel_ids_are_limited_by_negotiated_max() {
        let config = BrokerConfig {
            channel_max: 2,
            ..BrokerConfig::default()
        };
        let (connection, broker) = open(config);
        let first = connection.channel().unwrap();
        let second = connection.channel().unwrap();
        assert_eq!((first.channel_id(), second.channel_id()), (1, 2));
        match connection.channel() {
            Err(Error::ExhaustedChannelIds { channel_max: 2 }) => (),
            other => panic!("unexpected {:?}", other.map(|c| c.channel_id())),
        }
        match connection.channel_with_id(2) {
            Err(Error::UnavailableChannelId { channel_id: 2 }) => (),
            other => panic!("unexpected {:?}", other.map(|c| c.channel_id())),
        }

        first.close().unwrap();
        let third = connection.channel().unwrap();
        assert_eq!(third.channel_id(), 1);
        drop((second, third));
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn blocked_notification_sets_flag() {
        let config = BrokerConfig {
            block_after_open: true,
            ..BrokerConfig::default()
        };
        let (connection, broker) = open(config);
        assert!(wait_until(Duration::from_secs(5), || connection.is_blocked()));
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn silent_server_trips_heartbeat_monitor() {
        let config = BrokerConfig {
            heartbeat: 1,
            ..BrokerConfig::default()
        };
        let (connection, _broker) = open_with_heartbeat(config);
        let dead = wait_until(Duration::from_secs(10), || connection.is_closed());
        assert!(dead);
        match connection.check_for_errors() {
            Err(Error::MissedServerHeartbeats { .. }) => (),
            other => panic!("unexpected {:?}", other),
        }
        match connection.channel() {
            Err(Error::MissedServerHeartbeats { .. }) => (),
            other => panic!("unexpected {:?}", other.map(|c| c.channel_id())),
        }
    }

    #[test]
    fn server_cancel_forgets_consumer() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        channel
            .queue()
            .declare("jobs", QueueDeclareOptions::default())
            .unwrap();
        let tag = channel
            .basic()
            .consume("jobs", ConsumeOptions::default(), |_, _| ())
            .unwrap();
        assert!(channel.inner().has_callback(&tag));

        channel
            .queue()
            .declare("__cancel_consumers", QueueDeclareOptions::default())
            .unwrap();
        assert!(channel.consumer_tags().is_empty());
        assert!(!channel.inner().has_callback(&tag));
        // nothing left to consume, so this returns straight away
        channel.start_consuming().unwrap();
        assert!(channel.is_open());
        assert!(channel.check_for_errors().is_ok());
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn flow_is_acknowledged() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        channel
            .queue()
            .declare("__flow", QueueDeclareOptions::default())
            .unwrap();
        assert!(wait_until(Duration::from_secs(5), || broker
            .received()
            .contains(&FrameKind::ChannelFlowOk)));
        assert!(channel.is_open());
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn unhandled_frame_is_not_fatal() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection.channel().unwrap();
        channel
            .queue()
            .declare("__unexpected", QueueDeclareOptions::default())
            .unwrap();
        assert!(channel.is_open());
        assert!(channel.check_for_errors().is_ok());
        assert!(connection.check_for_errors().is_ok());
        let queue = channel
            .queue()
            .declare("still-usable", QueueDeclareOptions::default())
            .unwrap();
        assert_eq!(queue.name(), "still-usable");
        connection.close().unwrap();
        broker.join();
    }

    #[test]
    fn unanswered_request_times_out_and_late_reply_is_dropped() {
        let (connection, broker) = open(BrokerConfig::default());
        let channel = connection
            .channel_with_rpc_timeout(Duration::from_millis(200))
            .unwrap();
        match channel
            .queue()
            .declare("__no_reply", QueueDeclareOptions::default())
        {
            Err(Error::RpcTimeout {
                channel_id,
                ref expected,
                ..
            }) => {
                assert_eq!(channel_id, channel.channel_id());
                assert!(expected.contains("Queue.DeclareOk"));
            }
            other => panic!("unexpected {:?}", other.map(|q| q.name().to_string())),
        }
        assert!(channel.inner().rpc_is_idle());
        assert!(channel.is_open());

        // the broker releases the stale DeclareOk just ahead of QosOk
        channel.basic().qos(0, 10, false).unwrap();
        assert!(channel.inner().rpc_is_idle());
        assert!(channel.check_for_errors().is_ok());
        let queue = channel
            .queue()
            .declare("after-timeout", QueueDeclareOptions::default())
            .unwrap();
        assert_eq!(queue.name(), "after-timeout");
        connection.close().unwrap();
        broker.join();
    }

    fn open_with_heartbeat(config: BrokerConfig) -> (Connection, FakeBroker) {
        connect(config, client_options().heartbeat(1)).unwrap()
    }
}

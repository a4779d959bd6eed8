use crate::frame::FrameKind;
use crate::{Channel, Delivery, Error, Result};
use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::basic::AMQPMethod as AmqpBasic;
use amq_protocol::protocol::AMQPClass;
use log::{trace, warn};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

// Content that follows a Basic.Return is discarded rather than queued.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Discard {
    Nothing,
    Header,
    Body(u64),
}

struct State {
    frames: VecDeque<AMQPFrame>,
    discard: Discard,
}

/// FIFO of delivery frames (Basic.Deliver, content header, content body) for one channel.
///
/// The reader thread pushes; callers pop fully assembled deliveries. A delivery is only popped
/// once all of its frames are present.
pub(crate) struct Inbound {
    channel_id: u16,
    state: Mutex<State>,
    arrived: Condvar,
}

impl Inbound {
    pub(crate) fn new(channel_id: u16) -> Inbound {
        Inbound {
            channel_id,
            state: Mutex::new(State {
                frames: VecDeque::new(),
                discard: Discard::Nothing,
            }),
            arrived: Condvar::new(),
        }
    }

    /// The next header and body frames belong to a returned message.
    pub(crate) fn discard_returned_content(&self) {
        self.state.lock().unwrap().discard = Discard::Header;
    }

    pub(crate) fn push(&self, frame: AMQPFrame) {
        let mut state = self.state.lock().unwrap();
        match (state.discard, &frame) {
            (Discard::Header, AMQPFrame::Header(_, _, header)) => {
                state.discard = match header.body_size {
                    0 => Discard::Nothing,
                    n => Discard::Body(n),
                };
                trace!("channel {} discarding returned message header", self.channel_id);
                return;
            }
            (Discard::Body(remaining), AMQPFrame::Body(_, data)) => {
                let len = data.len() as u64;
                state.discard = if len == 0 || len >= remaining {
                    Discard::Nothing
                } else {
                    Discard::Body(remaining - len)
                };
                trace!("channel {} discarding returned message body", self.channel_id);
                return;
            }
            (Discard::Nothing, _) => (),
            (_, _) => {
                warn!(
                    "channel {} expected returned message content but got {}",
                    self.channel_id,
                    FrameKind::of(&frame)
                );
                state.discard = Discard::Nothing;
            }
        }
        state.frames.push_back(frame);
        self.arrived.notify_all();
    }

    pub(crate) fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.frames.clear();
        state.discard = Discard::Nothing;
        self.arrived.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().frames.len()
    }

    /// Block for up to `timeout` until a frame is pushed (or the queue is cleared).
    pub(crate) fn wait(&self, timeout: Duration) {
        let state = self.state.lock().unwrap();
        let _ = self.arrived.wait_timeout(state, timeout).unwrap();
    }

    /// Pop the delivery at the head of the queue, if it is complete.
    ///
    /// Frames that cannot start a delivery are logged and dropped so a stray frame cannot wedge
    /// the channel.
    pub(crate) fn try_pop_delivery(&self) -> Option<Delivery> {
        let mut state = self.state.lock().unwrap();
        loop {
            match state.frames.front() {
                None => return None,
                Some(AMQPFrame::Method(_, AMQPClass::Basic(AmqpBasic::Deliver(_)))) => (),
                Some(other) => {
                    warn!(
                        "channel {} dropping out-of-order {} frame",
                        self.channel_id,
                        FrameKind::of(other)
                    );
                    state.frames.pop_front();
                    continue;
                }
            }

            let body_size = match state.frames.get(1) {
                None => return None,
                Some(AMQPFrame::Header(_, _, header)) => header.body_size,
                Some(other) => {
                    warn!(
                        "channel {} expected content header after Basic.Deliver, got {}; \
                         dropping delivery",
                        self.channel_id,
                        FrameKind::of(other)
                    );
                    state.frames.pop_front();
                    continue;
                }
            };

            let body_frames = match count_body_frames(&state.frames, body_size) {
                BodyFrames::Complete(n) => n,
                BodyFrames::Incomplete => return None,
                BodyFrames::Interrupted => {
                    warn!(
                        "channel {} delivery body interrupted by another frame; dropping delivery",
                        self.channel_id
                    );
                    state.frames.pop_front();
                    continue;
                }
            };

            let deliver = state.frames.pop_front();
            let header = state.frames.pop_front();
            let mut content = Vec::with_capacity(body_size as usize);
            for frame in state.frames.drain(..body_frames) {
                if let AMQPFrame::Body(_, data) = frame {
                    content.extend_from_slice(&data);
                }
            }
            return match (deliver, header) {
                (
                    Some(AMQPFrame::Method(_, AMQPClass::Basic(AmqpBasic::Deliver(deliver)))),
                    Some(AMQPFrame::Header(_, _, header)),
                ) => Some(Delivery::from_deliver(
                    self.channel_id,
                    deliver,
                    content,
                    header.properties,
                )),
                // shapes were checked above while holding the same lock
                _ => unreachable!(),
            };
        }
    }
}

enum BodyFrames {
    Complete(usize),
    Incomplete,
    Interrupted,
}

// Counts the body frames after the deliver + header pair at the front of `frames`.
fn count_body_frames(frames: &VecDeque<AMQPFrame>, body_size: u64) -> BodyFrames {
    if body_size == 0 {
        return BodyFrames::Complete(0);
    }
    let mut received = 0u64;
    for (i, frame) in frames.iter().skip(2).enumerate() {
        match frame {
            AMQPFrame::Body(_, data) => {
                received += data.len() as u64;
                // an empty fragment also ends the body
                if data.is_empty() || received >= body_size {
                    return BodyFrames::Complete(i + 1);
                }
            }
            _ => return BodyFrames::Interrupted,
        }
    }
    BodyFrames::Incomplete
}

/// Iterator over assembled deliveries returned by
/// [`Channel::build_inbound_messages`](struct.Channel.html#method.build_inbound_messages).
///
/// Yields an error at most once, then ends. Ends quietly when the channel closes, or when the
/// queue is drained if it was built with `break_on_empty`.
pub struct InboundMessages<'a> {
    channel: &'a Channel,
    break_on_empty: bool,
    done: bool,
}

impl<'a> InboundMessages<'a> {
    pub(crate) fn new(channel: &'a Channel, break_on_empty: bool) -> InboundMessages<'a> {
        InboundMessages {
            channel,
            break_on_empty,
            done: false,
        }
    }
}

impl Iterator for InboundMessages<'_> {
    type Item = Result<Delivery>;

    fn next(&mut self) -> Option<Result<Delivery>> {
        while !self.done {
            let inner = self.channel.inner();
            if let Some(delivery) = inner.inbound().try_pop_delivery() {
                return Some(Ok(delivery));
            }
            if let Err(err) = inner.check_for_errors() {
                self.done = true;
                return match err {
                    Error::ChannelClosed { .. } | Error::ConnectionClosed => None,
                    err => Some(Err(err)),
                };
            }
            if self.break_on_empty {
                self.done = true;
                return None;
            }
            inner.inbound().wait(inner.poll_interval());
        }
        None
    }
}

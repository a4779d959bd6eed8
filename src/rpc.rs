use crate::errors::*;
use crate::frame::FrameKind;
use crate::serialize::TryFromAmqpFrame;
use crate::stateful::IDLE_WAIT;
use amq_protocol::frame::AMQPFrame;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::trace;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Correlation token handed out by [`Rpc::register_request`].
pub(crate) type RequestId = u64;

struct Pending {
    expected: Vec<FrameKind>,
    tx: Sender<AMQPFrame>,
    rx: Receiver<AMQPFrame>,
}

#[derive(Default)]
struct Registry {
    // reply kind -> token currently waiting for it; many kinds may share one token
    names: HashMap<FrameKind, RequestId>,
    pending: HashMap<RequestId, Pending>,
}

/// Matches reply frames to the callers blocked waiting for them.
///
/// Every request registers the frame kinds that may answer it *before* the request is written,
/// so a reply that races ahead of the caller is still buffered for the right token. Frames of
/// kinds nobody registered for are handed back to the dispatcher untouched.
pub(crate) struct Rpc {
    channel_id: u16,
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

impl Rpc {
    pub(crate) fn new(channel_id: u16) -> Rpc {
        Rpc {
            channel_id,
            next_id: AtomicU64::new(1),
            registry: Mutex::new(Registry::default()),
        }
    }

    pub(crate) fn register_request(&self, valid: &[FrameKind]) -> RequestId {
        let token = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut registry = self.registry.lock().unwrap();
        for kind in valid {
            registry.names.insert(*kind, token);
        }
        registry.pending.insert(
            token,
            Pending {
                expected: valid.to_vec(),
                tx,
                rx,
            },
        );
        trace!(
            "channel {} registered request {} for [{}]",
            self.channel_id,
            token,
            FrameKind::join(valid)
        );
        token
    }

    /// Offer an inbound frame to the waiting requests.
    ///
    /// Returns `None` if the frame was buffered for a request, or gives the frame back if no
    /// request is waiting for its kind.
    pub(crate) fn on_frame(&self, frame: AMQPFrame) -> Option<AMQPFrame> {
        let kind = FrameKind::of(&frame);
        let registry = self.registry.lock().unwrap();
        let pending = registry
            .names
            .get(&kind)
            .and_then(|token| registry.pending.get(token));
        match pending {
            Some(pending) => match pending.tx.send(frame) {
                Ok(()) => None,
                Err(err) => Some(err.into_inner()),
            },
            None => Some(frame),
        }
    }

    /// Block until a reply for `token` arrives.
    ///
    /// `check` reports errors on the owning connection or channel; it runs between waits and
    /// its error aborts the request. The token is deregistered once this returns, unless
    /// `multiple` is set and a frame was returned.
    pub(crate) fn get_request<F>(
        &self,
        token: RequestId,
        multiple: bool,
        timeout: Duration,
        mut check: F,
    ) -> Result<AMQPFrame>
    where
        F: FnMut() -> Result<()>,
    {
        let rx = self
            .registry
            .lock()
            .unwrap()
            .pending
            .get(&token)
            .map(|pending| pending.rx.clone());
        let rx = match rx {
            Some(rx) => rx,
            None => {
                check()?;
                return ChannelClosedSnafu {
                    channel_id: self.channel_id,
                }
                .fail();
            }
        };

        let deadline = Instant::now() + timeout;
        loop {
            match rx.try_recv() {
                Ok(frame) => return Ok(self.complete(token, multiple, frame)),
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => return self.abandoned(token, &mut check),
            }

            if let Err(err) = check() {
                self.remove(token);
                return Err(err);
            }

            let now = Instant::now();
            if now >= deadline {
                let expected = self.expected(token);
                self.remove(token);
                return RpcTimeoutSnafu {
                    channel_id: self.channel_id,
                    request_id: token,
                    expected,
                }
                .fail();
            }

            match rx.recv_timeout(Duration::min(IDLE_WAIT, deadline - now)) {
                Ok(frame) => return Ok(self.complete(token, multiple, frame)),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return self.abandoned(token, &mut check),
            }
        }
    }

    /// [`get_request`](#method.get_request) for a single reply of a known method type.
    pub(crate) fn get_request_as<T, F>(
        &self,
        token: RequestId,
        timeout: Duration,
        check: F,
    ) -> Result<T>
    where
        T: TryFromAmqpFrame,
        F: FnMut() -> Result<()>,
    {
        let frame = self.get_request(token, false, timeout, check)?;
        T::try_from(self.channel_id, frame)
    }

    /// Deregister `token`. Unknown tokens are ignored.
    pub(crate) fn remove(&self, token: RequestId) {
        let mut registry = self.registry.lock().unwrap();
        if registry.pending.remove(&token).is_some() {
            trace!("channel {} removed request {}", self.channel_id, token);
        }
        registry.names.retain(|_, waiting| *waiting != token);
    }

    /// Drop every pending request. Blocked callers wake and report the owner's error.
    pub(crate) fn remove_all(&self) {
        let mut registry = self.registry.lock().unwrap();
        registry.names.clear();
        registry.pending.clear();
    }

    fn complete(&self, token: RequestId, multiple: bool, frame: AMQPFrame) -> AMQPFrame {
        if !multiple {
            self.remove(token);
        }
        frame
    }

    fn abandoned<F>(&self, token: RequestId, check: &mut F) -> Result<AMQPFrame>
    where
        F: FnMut() -> Result<()>,
    {
        self.remove(token);
        check()?;
        ChannelClosedSnafu {
            channel_id: self.channel_id,
        }
        .fail()
    }

    fn expected(&self, token: RequestId) -> String {
        self.registry
            .lock()
            .unwrap()
            .pending
            .get(&token)
            .map(|pending| FrameKind::join(&pending.expected))
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        let registry = self.registry.lock().unwrap();
        registry.names.is_empty() && registry.pending.is_empty()
    }
}

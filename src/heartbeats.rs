use crate::errors::*;
use log::{debug, trace, warn};
use mio::{Events, Poll, PollOpt, Ready, Token};
use mio_extras::channel as mio_channel;
use mio_extras::timer::{Builder, Timer};
use snafu::ResultExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const MAX_MISSED_SERVER_HEARTBEATS: u32 = 2;

// Slack added on top of the negotiated interval so a broker sending heartbeats at exactly the
// interval is never counted as silent.
const INTERVAL_MARGIN: Duration = Duration::from_secs(1);

const TIMER: Token = Token(0);
const STOP: Token = Token(1);

fn secs_rounded_up(duration: Duration) -> u64 {
    if duration.subsec_nanos() > 0 {
        duration.as_secs() + 1
    } else {
        duration.as_secs()
    }
}

/// Read/write counters shared between the transport and the heartbeat monitor.
#[derive(Debug, Default)]
pub(crate) struct Activity {
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Activity {
    #[inline]
    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    // (reads, writes) since the last call
    fn take(&self) -> (u64, u64) {
        (
            self.reads.swap(0, Ordering::Relaxed),
            self.writes.swap(0, Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) enum HeartbeatState {
    StillRunning,
    Expired,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct LifeSigns {
    pub(crate) send_heartbeat: bool,
    pub(crate) state: HeartbeatState,
}

/// Decides, once per timer period, whether we owe the server a heartbeat and whether the server
/// has gone quiet for too long.
#[derive(Debug)]
pub(crate) struct HeartbeatChecker {
    activity: Arc<Activity>,
    missed: u32,
}

impl HeartbeatChecker {
    pub(crate) fn new(activity: Arc<Activity>) -> HeartbeatChecker {
        HeartbeatChecker {
            activity,
            missed: 0,
        }
    }

    pub(crate) fn check_for_life_signs(&mut self) -> LifeSigns {
        let (reads, writes) = self.activity.take();
        trace!(
            "heartbeat check: {} reads, {} writes since last check",
            reads,
            writes
        );
        let send_heartbeat = writes == 0;
        if reads == 0 {
            self.missed += 1;
        } else {
            self.missed = 0;
        }
        let state = if self.missed >= MAX_MISSED_SERVER_HEARTBEATS {
            HeartbeatState::Expired
        } else {
            HeartbeatState::StillRunning
        };
        LifeSigns {
            send_heartbeat,
            state,
        }
    }
}

/// What the monitor needs from the connection it watches.
pub(crate) trait HeartbeatOwner: Send + Sync {
    fn send_heartbeat(&self) -> Result<()>;

    /// Called once, from the monitor thread, when the server has been silent too long.
    fn heartbeat_expired(&self, err: Error);
}

/// Handle to the `amqpsync-heartbeat` thread.
pub(crate) struct HeartbeatMonitor {
    stop: mio_channel::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    /// Start monitoring a connection that negotiated a heartbeat of `interval` seconds.
    pub(crate) fn start<O>(interval: u16, activity: Arc<Activity>, owner: Weak<O>) -> Result<Self>
    where
        O: HeartbeatOwner + 'static,
    {
        let period = Duration::from_secs(u64::from(interval)) + INTERVAL_MARGIN;
        Self::with_period(period, activity, owner)
    }

    pub(crate) fn with_period<O>(
        period: Duration,
        activity: Arc<Activity>,
        owner: Weak<O>,
    ) -> Result<Self>
    where
        O: HeartbeatOwner + 'static,
    {
        let (stop, stop_rx) = mio_channel::channel();
        let poll = Poll::new().context(IoSnafu)?;
        let mut timer = Builder::default()
            .tick_duration(Duration::from_millis(10))
            .build();
        poll.register(&timer, TIMER, Ready::readable(), PollOpt::edge())
            .context(IoSnafu)?;
        poll.register(&stop_rx, STOP, Ready::readable(), PollOpt::edge())
            .context(IoSnafu)?;
        timer.set_timeout(period, ());

        let dead_after = secs_rounded_up(period * MAX_MISSED_SERVER_HEARTBEATS);
        let checker = HeartbeatChecker::new(activity);
        let handle = thread::Builder::new()
            .name("amqpsync-heartbeat".to_string())
            .spawn(move || {
                let run = MonitorThread {
                    poll,
                    timer,
                    period,
                    dead_after,
                    checker,
                    _stop_rx: stop_rx,
                };
                run.run(owner)
            })
            .context(ForkFailedSnafu {
                thread: "amqpsync-heartbeat",
            })?;
        debug!("started heartbeat monitor with period {:?}", period);

        Ok(HeartbeatMonitor {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the monitor thread to exit. Never blocks, so it is safe from any thread.
    pub(crate) fn signal_stop(&self) {
        // the receiver is gone once the thread has exited on its own
        let _ = self.stop.send(());
    }

    /// Stop the monitor and wait for its thread, unless called from that thread.
    pub(crate) fn stop(&mut self) {
        self.signal_stop();
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return,
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("heartbeat thread panicked");
        }
    }
}

// never joins: the last reference may be released on one of the connection's own threads
impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

struct MonitorThread {
    poll: Poll,
    timer: Timer<()>,
    period: Duration,
    dead_after: u64,
    checker: HeartbeatChecker,
    // kept alive so STOP stays registered
    _stop_rx: mio_channel::Receiver<()>,
}

impl MonitorThread {
    fn run<O: HeartbeatOwner>(mut self, owner: Weak<O>) {
        let mut events = Events::with_capacity(4);
        loop {
            if let Err(err) = self.poll.poll(&mut events, None) {
                warn!("heartbeat poll failed: {}", err);
                return;
            }
            for event in events.iter() {
                match event.token() {
                    STOP => {
                        trace!("heartbeat monitor stopping");
                        return;
                    }
                    TIMER => {
                        while self.timer.poll().is_some() {
                            if !self.fire(&owner) {
                                return;
                            }
                        }
                    }
                    _ => unreachable!(),
                }
            }
        }
    }

    // returns false once the monitor should exit
    fn fire<O: HeartbeatOwner>(&mut self, owner: &Weak<O>) -> bool {
        let owner = match owner.upgrade() {
            Some(owner) => owner,
            None => return false,
        };
        let signs = self.checker.check_for_life_signs();
        if signs.send_heartbeat {
            trace!("sending heartbeat");
            if let Err(err) = owner.send_heartbeat() {
                debug!("failed to send heartbeat: {}", err);
            }
        }
        match signs.state {
            HeartbeatState::StillRunning => {
                self.timer.set_timeout(self.period, ());
                true
            }
            HeartbeatState::Expired => {
                warn!(
                    "no heartbeat or data from server for >= {}s; marking connection dead",
                    self.dead_after
                );
                owner.heartbeat_expired(Error::MissedServerHeartbeats {
                    interval_secs: self.dead_after,
                });
                false
            }
        }
    }
}

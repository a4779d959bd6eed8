use crate::errors::*;
use crate::frame_buffer::FrameBuffer;
use crate::heartbeats::Activity;
use crate::serialize::OutputBuffer;
use crate::stream::IoStream;
use amq_protocol::frame::AMQPFrame;
use log::{debug, trace};
use snafu::ResultExt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

/// Receives everything the reader thread decodes.
pub(crate) trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: AMQPFrame);

    /// The stream failed or closed; the reader thread exits after this returns.
    fn on_read_error(&self, err: Error);
}

/// Exclusive owner of the socket.
///
/// Only the `amqpsync-io` thread reads; any thread may write, one at a time, through
/// [`write`](#method.write). A buffer handed to `write` goes out in one piece, so multi-frame
/// sequences never interleave with other writers.
pub(crate) struct Transport {
    writer: Mutex<Box<dyn Write + Send>>,
    activity: Arc<Activity>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Read half waiting for [`Transport::start_reader`].
pub(crate) struct PendingReader(Box<dyn Read + Send>);

impl Transport {
    pub(crate) fn new<S: IoStream>(
        stream: S,
        poll_interval: Duration,
    ) -> Result<(Transport, PendingReader)> {
        let (reader, writer) = stream.into_split(poll_interval).context(IoSnafu)?;
        let transport = Transport {
            writer: Mutex::new(Box::new(writer)),
            activity: Arc::new(Activity::default()),
            running: Arc::new(AtomicBool::new(true)),
            reader: Mutex::new(None),
        };
        Ok((transport, PendingReader(Box::new(reader))))
    }

    pub(crate) fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn start_reader<K>(&self, reader: PendingReader, sink: Weak<K>) -> Result<()>
    where
        K: FrameSink + 'static,
    {
        let running = Arc::clone(&self.running);
        let activity = Arc::clone(&self.activity);
        let handle = Builder::new()
            .name("amqpsync-io".to_string())
            .spawn(move || read_loop(reader.0, sink, running, activity))
            .context(ForkFailedSnafu {
                thread: "amqpsync-io",
            })?;
        *self.reader.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub(crate) fn write(&self, buf: &OutputBuffer) -> Result<()> {
        if !self.is_running() {
            return ConnectionClosedSnafu.fail();
        }
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(buf.as_bytes()).context(IoSnafu)?;
        writer.flush().context(IoSnafu)?;
        self.activity.record_write();
        trace!("wrote {} bytes", buf.len());
        Ok(())
    }

    /// Ask the reader thread to exit after its current read. Never blocks.
    pub(crate) fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop the reader thread and wait for it, unless called from the reader thread itself.
    /// Must not be called from the heartbeat thread.
    pub(crate) fn stop(&self) {
        self.signal_stop();
        let handle = match self.reader.lock().unwrap().take() {
            Some(handle) => handle,
            None => return,
        };
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            debug!("I/O thread panicked during shutdown");
        }
    }
}

fn read_loop<K: FrameSink>(
    mut reader: Box<dyn Read + Send>,
    sink: Weak<K>,
    running: Arc<AtomicBool>,
    activity: Arc<Activity>,
) {
    let mut frames = FrameBuffer::new();
    while running.load(Ordering::SeqCst) {
        let sink = match sink.upgrade() {
            Some(sink) => sink,
            None => break,
        };
        let result = frames.read_from(&mut reader, |frame| {
            activity.record_read();
            sink.on_frame(frame);
            Ok(())
        });
        if let Err(err) = result {
            debug!("I/O thread stopping: {}", err);
            // errors after a requested stop are expected (the peer hangs up on close)
            if running.swap(false, Ordering::SeqCst) {
                sink.on_read_error(err);
            }
            break;
        }
    }
    trace!("I/O thread exiting");
}

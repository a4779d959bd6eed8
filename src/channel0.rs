use crate::connection::ConnectionInner;
use crate::errors::*;
use crate::frame::FrameKind;
use crate::rpc::Rpc;
use crate::serialize::OutputBuffer;
use crate::{ConnectionBlockedNotification, State};
use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::connection::{
    AMQPMethod as AmqpConnection, Close, CloseOk, Start, Tune,
};
use amq_protocol::protocol::AMQPClass;
use log::{debug, error, info, trace};

pub(crate) const REPLY_SUCCESS: u16 = 200;

/// Connection-level control channel: handshake, connection close, blocked notifications and
/// heartbeats.
pub(crate) struct Channel0 {
    rpc: Rpc,
}

impl Channel0 {
    pub(crate) fn new() -> Channel0 {
        Channel0 { rpc: Rpc::new(0) }
    }

    /// Kick off the handshake; the server answers with Connection.Start.
    pub(crate) fn send_protocol_header(&self, conn: &ConnectionInner) -> Result<()> {
        debug!("sending protocol header");
        conn.write(&OutputBuffer::with_protocol_header())
    }

    pub(crate) fn on_frame(&self, conn: &ConnectionInner, frame: AMQPFrame) {
        let frame = match self.rpc.on_frame(frame) {
            Some(frame) => frame,
            None => return,
        };
        match frame {
            AMQPFrame::Heartbeat(_) => trace!("received heartbeat"),
            AMQPFrame::Method(_, AMQPClass::Connection(method)) => {
                self.on_connection_method(conn, method)
            }
            other => error!("unhandled frame on channel 0: {}", FrameKind::of(&other)),
        }
    }

    fn on_connection_method(&self, conn: &ConnectionInner, method: AmqpConnection) {
        match method {
            AmqpConnection::Start(start) => self.on_start(conn, start),
            AmqpConnection::Secure(_) => fail_handshake(conn, Error::SaslSecureNotSupported),
            AmqpConnection::Tune(tune) => self.on_tune(conn, tune),
            AmqpConnection::OpenOk(_) => {
                debug!("received Connection.OpenOk");
                conn.stateful.set_state(State::Open);
            }
            AmqpConnection::Close(close) => self.on_close(conn, close),
            AmqpConnection::Blocked(blocked) => {
                conn.set_blocked(ConnectionBlockedNotification::Blocked(blocked.reason))
            }
            AmqpConnection::Unblocked(_) => {
                conn.set_blocked(ConnectionBlockedNotification::Unblocked)
            }
            other => error!(
                "unhandled method on channel 0: {}",
                FrameKind::of_class(&AMQPClass::Connection(other))
            ),
        }
    }

    fn on_start(&self, conn: &ConnectionInner, start: Start) {
        debug!(
            "received Connection.Start (version {}.{}, mechanisms {:?})",
            start.version_major, start.version_minor, start.mechanisms
        );
        let result = conn
            .options()
            .make_start_ok(start)
            .and_then(|(start_ok, server_properties)| {
                conn.set_server_properties(server_properties);
                conn.write_method(0, AmqpConnection::StartOk(start_ok))
            });
        if let Err(err) = result {
            fail_handshake(conn, err);
        }
    }

    fn on_tune(&self, conn: &ConnectionInner, tune: Tune) {
        debug!("received Connection.Tune {:?}", tune);
        let result = conn.options().make_tune_ok(tune).and_then(|tune_ok| {
            conn.apply_tuning(&tune_ok);
            let mut buf = OutputBuffer::empty();
            buf.push_method(0, AmqpConnection::TuneOk(tune_ok))?;
            buf.push_method(0, AmqpConnection::Open(conn.options().make_open()))?;
            conn.write(&buf)
        });
        if let Err(err) = result {
            fail_handshake(conn, err);
        }
    }

    fn on_close(&self, conn: &ConnectionInner, close: Close) {
        let _ = conn.write_method(0, AmqpConnection::CloseOk(CloseOk {}));
        if close.reply_code == REPLY_SUCCESS {
            info!("server closed connection: {}", close.reply_text);
            conn.force_closed();
        } else {
            conn.fail(Error::ServerClosedConnection {
                code: close.reply_code,
                message: close.reply_text,
            });
        }
    }

    /// Send Connection.Close and wait for Connection.CloseOk.
    pub(crate) fn close_connection(&self, conn: &ConnectionInner) -> Result<()> {
        let close = Close {
            reply_code: REPLY_SUCCESS,
            reply_text: "Normal shutdown".to_string(),
            class_id: 0,
            method_id: 0,
        };
        let token = self.rpc.register_request(&[FrameKind::ConnectionCloseOk]);
        if let Err(err) = conn.write_method(0, AmqpConnection::Close(close)) {
            self.rpc.remove(token);
            return Err(err);
        }
        let timeout = conn.options().rpc_timeout;
        self.rpc
            .get_request_as::<CloseOk, _>(token, timeout, || conn.check_for_errors())
            .map(|_| ())
    }

    /// Wake anyone still waiting on a channel 0 reply.
    pub(crate) fn abandon_requests(&self) {
        self.rpc.remove_all();
    }
}

fn fail_handshake(conn: &ConnectionInner, err: Error) {
    error!("connection handshake failed: {}", err);
    conn.fail(err);
}

use crate::errors::*;
use crate::Channel;
use amq_protocol::protocol::tx::AMQPMethod as AmqpTx;
use amq_protocol::protocol::tx::{Commit, CommitOk, Rollback, RollbackOk, Select, SelectOk};

/// `tx` class methods on a [`Channel`](struct.Channel.html).
///
/// After [`select`](#method.select), publishes and acks on the channel only take effect when
/// committed.
pub struct Tx<'a> {
    channel: &'a Channel,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(channel: &'a Channel) -> Tx<'a> {
        Tx { channel }
    }

    pub fn select(&self) -> Result<()> {
        self.channel
            .inner()
            .rpc_request_as::<_, SelectOk>(AmqpTx::Select(Select {}))
            .map(|_| ())
    }

    pub fn commit(&self) -> Result<()> {
        self.channel
            .inner()
            .rpc_request_as::<_, CommitOk>(AmqpTx::Commit(Commit {}))
            .map(|_| ())
    }

    pub fn rollback(&self) -> Result<()> {
        self.channel
            .inner()
            .rpc_request_as::<_, RollbackOk>(AmqpTx::Rollback(Rollback {}))
            .map(|_| ())
    }
}

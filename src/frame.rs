use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::basic::AMQPMethod as AmqpBasic;
use amq_protocol::protocol::channel::AMQPMethod as AmqpChannel;
use amq_protocol::protocol::confirm::AMQPMethod as AmqpConfirm;
use amq_protocol::protocol::connection::AMQPMethod as AmqpConnection;
use amq_protocol::protocol::exchange::AMQPMethod as AmqpExchange;
use amq_protocol::protocol::queue::AMQPMethod as AmqpQueue;
use amq_protocol::protocol::tx::AMQPMethod as AmqpTx;
use amq_protocol::protocol::AMQPClass;
use std::fmt;

/// Discriminant for decoded frames.
///
/// Dispatch and RPC correlation key on this instead of inspecting the nested
/// `AMQPFrame`/`AMQPClass` enums at every call site. Only frames the client ever waits for or
/// reacts to get their own variant; everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    ConnectionStart,
    ConnectionSecure,
    ConnectionTune,
    ConnectionOpenOk,
    ConnectionClose,
    ConnectionCloseOk,
    ConnectionBlocked,
    ConnectionUnblocked,
    ChannelOpenOk,
    ChannelFlow,
    ChannelFlowOk,
    ChannelClose,
    ChannelCloseOk,
    ExchangeDeclareOk,
    ExchangeDeleteOk,
    ExchangeBindOk,
    ExchangeUnbindOk,
    QueueDeclareOk,
    QueueBindOk,
    QueuePurgeOk,
    QueueDeleteOk,
    QueueUnbindOk,
    BasicQosOk,
    BasicConsumeOk,
    BasicCancel,
    BasicCancelOk,
    BasicReturn,
    BasicDeliver,
    BasicGetOk,
    BasicGetEmpty,
    BasicAck,
    BasicNack,
    BasicRecoverOk,
    ConfirmSelectOk,
    TxSelectOk,
    TxCommitOk,
    TxRollbackOk,
    ContentHeader,
    ContentBody,
    Heartbeat,
    Other,
}

impl FrameKind {
    pub fn of(frame: &AMQPFrame) -> FrameKind {
        match frame {
            AMQPFrame::Method(_, class) => FrameKind::of_class(class),
            AMQPFrame::Header(..) => FrameKind::ContentHeader,
            AMQPFrame::Body(..) => FrameKind::ContentBody,
            AMQPFrame::Heartbeat(_) => FrameKind::Heartbeat,
            _ => FrameKind::Other,
        }
    }

    pub fn of_class(class: &AMQPClass) -> FrameKind {
        match class {
            AMQPClass::Connection(method) => match method {
                AmqpConnection::Start(_) => FrameKind::ConnectionStart,
                AmqpConnection::Secure(_) => FrameKind::ConnectionSecure,
                AmqpConnection::Tune(_) => FrameKind::ConnectionTune,
                AmqpConnection::OpenOk(_) => FrameKind::ConnectionOpenOk,
                AmqpConnection::Close(_) => FrameKind::ConnectionClose,
                AmqpConnection::CloseOk(_) => FrameKind::ConnectionCloseOk,
                AmqpConnection::Blocked(_) => FrameKind::ConnectionBlocked,
                AmqpConnection::Unblocked(_) => FrameKind::ConnectionUnblocked,
                _ => FrameKind::Other,
            },
            AMQPClass::Channel(method) => match method {
                AmqpChannel::OpenOk(_) => FrameKind::ChannelOpenOk,
                AmqpChannel::Flow(_) => FrameKind::ChannelFlow,
                AmqpChannel::FlowOk(_) => FrameKind::ChannelFlowOk,
                AmqpChannel::Close(_) => FrameKind::ChannelClose,
                AmqpChannel::CloseOk(_) => FrameKind::ChannelCloseOk,
                _ => FrameKind::Other,
            },
            AMQPClass::Exchange(method) => match method {
                AmqpExchange::DeclareOk(_) => FrameKind::ExchangeDeclareOk,
                AmqpExchange::DeleteOk(_) => FrameKind::ExchangeDeleteOk,
                AmqpExchange::BindOk(_) => FrameKind::ExchangeBindOk,
                AmqpExchange::UnbindOk(_) => FrameKind::ExchangeUnbindOk,
                _ => FrameKind::Other,
            },
            AMQPClass::Queue(method) => match method {
                AmqpQueue::DeclareOk(_) => FrameKind::QueueDeclareOk,
                AmqpQueue::BindOk(_) => FrameKind::QueueBindOk,
                AmqpQueue::PurgeOk(_) => FrameKind::QueuePurgeOk,
                AmqpQueue::DeleteOk(_) => FrameKind::QueueDeleteOk,
                AmqpQueue::UnbindOk(_) => FrameKind::QueueUnbindOk,
                _ => FrameKind::Other,
            },
            AMQPClass::Basic(method) => match method {
                AmqpBasic::QosOk(_) => FrameKind::BasicQosOk,
                AmqpBasic::ConsumeOk(_) => FrameKind::BasicConsumeOk,
                AmqpBasic::Cancel(_) => FrameKind::BasicCancel,
                AmqpBasic::CancelOk(_) => FrameKind::BasicCancelOk,
                AmqpBasic::Return(_) => FrameKind::BasicReturn,
                AmqpBasic::Deliver(_) => FrameKind::BasicDeliver,
                AmqpBasic::GetOk(_) => FrameKind::BasicGetOk,
                AmqpBasic::GetEmpty(_) => FrameKind::BasicGetEmpty,
                AmqpBasic::Ack(_) => FrameKind::BasicAck,
                AmqpBasic::Nack(_) => FrameKind::BasicNack,
                AmqpBasic::RecoverOk(_) => FrameKind::BasicRecoverOk,
                _ => FrameKind::Other,
            },
            AMQPClass::Confirm(method) => match method {
                AmqpConfirm::SelectOk(_) => FrameKind::ConfirmSelectOk,
                _ => FrameKind::Other,
            },
            AMQPClass::Tx(method) => match method {
                AmqpTx::SelectOk(_) => FrameKind::TxSelectOk,
                AmqpTx::CommitOk(_) => FrameKind::TxCommitOk,
                AmqpTx::RollbackOk(_) => FrameKind::TxRollbackOk,
                _ => FrameKind::Other,
            },
            _ => FrameKind::Other,
        }
    }

    /// Whether this frame is part of an inbound delivery (method, header or body).
    #[inline]
    pub fn is_content(self) -> bool {
        match self {
            FrameKind::BasicDeliver | FrameKind::ContentHeader | FrameKind::ContentBody => true,
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        use self::FrameKind::*;
        match self {
            ConnectionStart => "Connection.Start",
            ConnectionSecure => "Connection.Secure",
            ConnectionTune => "Connection.Tune",
            ConnectionOpenOk => "Connection.OpenOk",
            ConnectionClose => "Connection.Close",
            ConnectionCloseOk => "Connection.CloseOk",
            ConnectionBlocked => "Connection.Blocked",
            ConnectionUnblocked => "Connection.Unblocked",
            ChannelOpenOk => "Channel.OpenOk",
            ChannelFlow => "Channel.Flow",
            ChannelFlowOk => "Channel.FlowOk",
            ChannelClose => "Channel.Close",
            ChannelCloseOk => "Channel.CloseOk",
            ExchangeDeclareOk => "Exchange.DeclareOk",
            ExchangeDeleteOk => "Exchange.DeleteOk",
            ExchangeBindOk => "Exchange.BindOk",
            ExchangeUnbindOk => "Exchange.UnbindOk",
            QueueDeclareOk => "Queue.DeclareOk",
            QueueBindOk => "Queue.BindOk",
            QueuePurgeOk => "Queue.PurgeOk",
            QueueDeleteOk => "Queue.DeleteOk",
            QueueUnbindOk => "Queue.UnbindOk",
            BasicQosOk => "Basic.QosOk",
            BasicConsumeOk => "Basic.ConsumeOk",
            BasicCancel => "Basic.Cancel",
            BasicCancelOk => "Basic.CancelOk",
            BasicReturn => "Basic.Return",
            BasicDeliver => "Basic.Deliver",
            BasicGetOk => "Basic.GetOk",
            BasicGetEmpty => "Basic.GetEmpty",
            BasicAck => "Basic.Ack",
            BasicNack => "Basic.Nack",
            BasicRecoverOk => "Basic.RecoverOk",
            ConfirmSelectOk => "Confirm.SelectOk",
            TxSelectOk => "Tx.SelectOk",
            TxCommitOk => "Tx.CommitOk",
            TxRollbackOk => "Tx.RollbackOk",
            ContentHeader => "ContentHeader",
            ContentBody => "ContentBody",
            Heartbeat => "Heartbeat",
            Other => "Other",
        }
    }

    pub(crate) fn join(kinds: &[FrameKind]) -> String {
        kinds
            .iter()
            .map(|kind| kind.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The channel a frame was sent on, if it carries one.
pub(crate) fn channel_id(frame: &AMQPFrame) -> Option<u16> {
    match frame {
        AMQPFrame::Method(channel_id, _)
        | AMQPFrame::Header(channel_id, _, _)
        | AMQPFrame::Body(channel_id, _)
        | AMQPFrame::Heartbeat(channel_id) => Some(*channel_id),
        _ => None,
    }
}

/// The frames that complete a synchronous request.
///
/// `Basic.Publish` maps to the publisher-confirm replies; it is only sent through the RPC engine
/// when the channel is in confirm mode. Requests with no reply map to an empty list.
pub(crate) fn valid_responses(class: &AMQPClass) -> &'static [FrameKind] {
    match class {
        AMQPClass::Connection(AmqpConnection::Open(_)) => &[FrameKind::ConnectionOpenOk],
        AMQPClass::Connection(AmqpConnection::Close(_)) => &[FrameKind::ConnectionCloseOk],
        AMQPClass::Channel(AmqpChannel::Open(_)) => &[FrameKind::ChannelOpenOk],
        AMQPClass::Channel(AmqpChannel::Close(_)) => &[FrameKind::ChannelCloseOk],
        AMQPClass::Channel(AmqpChannel::Flow(_)) => &[FrameKind::ChannelFlowOk],
        AMQPClass::Exchange(AmqpExchange::Declare(_)) => &[FrameKind::ExchangeDeclareOk],
        AMQPClass::Exchange(AmqpExchange::Delete(_)) => &[FrameKind::ExchangeDeleteOk],
        AMQPClass::Exchange(AmqpExchange::Bind(_)) => &[FrameKind::ExchangeBindOk],
        AMQPClass::Exchange(AmqpExchange::Unbind(_)) => &[FrameKind::ExchangeUnbindOk],
        AMQPClass::Queue(AmqpQueue::Declare(_)) => &[FrameKind::QueueDeclareOk],
        AMQPClass::Queue(AmqpQueue::Bind(_)) => &[FrameKind::QueueBindOk],
        AMQPClass::Queue(AmqpQueue::Purge(_)) => &[FrameKind::QueuePurgeOk],
        AMQPClass::Queue(AmqpQueue::Delete(_)) => &[FrameKind::QueueDeleteOk],
        AMQPClass::Queue(AmqpQueue::Unbind(_)) => &[FrameKind::QueueUnbindOk],
        AMQPClass::Basic(AmqpBasic::Qos(_)) => &[FrameKind::BasicQosOk],
        AMQPClass::Basic(AmqpBasic::Consume(_)) => &[FrameKind::BasicConsumeOk],
        AMQPClass::Basic(AmqpBasic::Cancel(_)) => &[FrameKind::BasicCancelOk],
        AMQPClass::Basic(AmqpBasic::Get(_)) => &[FrameKind::BasicGetOk, FrameKind::BasicGetEmpty],
        AMQPClass::Basic(AmqpBasic::Recover(_)) => &[FrameKind::BasicRecoverOk],
        AMQPClass::Basic(AmqpBasic::Publish(_)) => &[FrameKind::BasicAck, FrameKind::BasicNack],
        AMQPClass::Confirm(AmqpConfirm::Select(_)) => &[FrameKind::ConfirmSelectOk],
        AMQPClass::Tx(AmqpTx::Select(_)) => &[FrameKind::TxSelectOk],
        AMQPClass::Tx(AmqpTx::Commit(_)) => &[FrameKind::TxCommitOk],
        AMQPClass::Tx(AmqpTx::Rollback(_)) => &[FrameKind::TxRollbackOk],
        _ => &[],
    }
}

use crate::errors::*;
use crate::frame::FrameKind;
use amq_protocol::frame::generation::{
    gen_content_body_frame, gen_content_header_frame, gen_heartbeat_frame, gen_method_frame,
};
use amq_protocol::frame::AMQPFrame;
use amq_protocol::protocol::basic::AMQPMethod as AmqpBasic;
use amq_protocol::protocol::basic::AMQPProperties;
use amq_protocol::protocol::channel::AMQPMethod as AmqpChannel;
use amq_protocol::protocol::confirm::AMQPMethod as AmqpConfirm;
use amq_protocol::protocol::connection::AMQPMethod as AmqpConnection;
use amq_protocol::protocol::exchange::AMQPMethod as AmqpExchange;
use amq_protocol::protocol::queue::AMQPMethod as AmqpQueue;
use amq_protocol::protocol::tx::AMQPMethod as AmqpTx;
use amq_protocol::protocol::AMQPClass;
use cookie_factory::GenError;
use std::result::Result as StdResult;

/// Class id of `basic`; content headers for published messages carry it.
pub(crate) const BASIC_CLASS_ID: u16 = 60;

// 7 byte frame header plus the frame-end octet.
pub(crate) const FRAME_OVERHEAD: usize = 8;

/// Validate an AMQP short string (at most 255 bytes) before it reaches the codec.
pub(crate) fn short_string(parameter: &'static str, value: &str) -> Result<String> {
    if value.len() > 255 {
        return InvalidArgumentSnafu {
            parameter,
            expected: "a short string (at most 255 bytes)",
        }
        .fail();
    }
    Ok(value.to_string())
}

pub(crate) trait TryFromAmqpClass: Sized {
    const KIND: FrameKind;

    /// Unwrap the method, handing the class back if it is some other method.
    fn try_from(class: AMQPClass) -> StdResult<Self, AMQPClass>;
}

macro_rules! impl_try_from_class {
    ($type:ty, $class:path, $method:path, $kind:expr) => {
        impl TryFromAmqpClass for $type {
            const KIND: FrameKind = $kind;

            fn try_from(class: AMQPClass) -> StdResult<Self, AMQPClass> {
                match class {
                    $class($method(val)) => Ok(val),
                    other => Err(other),
                }
            }
        }
    };
}

impl_try_from_class!(
    amq_protocol::protocol::connection::Start,
    AMQPClass::Connection,
    AmqpConnection::Start,
    FrameKind::ConnectionStart
);
impl_try_from_class!(
    amq_protocol::protocol::connection::Secure,
    AMQPClass::Connection,
    AmqpConnection::Secure,
    FrameKind::ConnectionSecure
);
impl_try_from_class!(
    amq_protocol::protocol::connection::Tune,
    AMQPClass::Connection,
    AmqpConnection::Tune,
    FrameKind::ConnectionTune
);
impl_try_from_class!(
    amq_protocol::protocol::connection::OpenOk,
    AMQPClass::Connection,
    AmqpConnection::OpenOk,
    FrameKind::ConnectionOpenOk
);
impl_try_from_class!(
    amq_protocol::protocol::connection::Close,
    AMQPClass::Connection,
    AmqpConnection::Close,
    FrameKind::ConnectionClose
);
impl_try_from_class!(
    amq_protocol::protocol::connection::CloseOk,
    AMQPClass::Connection,
    AmqpConnection::CloseOk,
    FrameKind::ConnectionCloseOk
);

impl_try_from_class!(
    amq_protocol::protocol::channel::OpenOk,
    AMQPClass::Channel,
    AmqpChannel::OpenOk,
    FrameKind::ChannelOpenOk
);
impl_try_from_class!(
    amq_protocol::protocol::channel::FlowOk,
    AMQPClass::Channel,
    AmqpChannel::FlowOk,
    FrameKind::ChannelFlowOk
);
impl_try_from_class!(
    amq_protocol::protocol::channel::CloseOk,
    AMQPClass::Channel,
    AmqpChannel::CloseOk,
    FrameKind::ChannelCloseOk
);

impl_try_from_class!(
    amq_protocol::protocol::exchange::DeclareOk,
    AMQPClass::Exchange,
    AmqpExchange::DeclareOk,
    FrameKind::ExchangeDeclareOk
);
impl_try_from_class!(
    amq_protocol::protocol::exchange::DeleteOk,
    AMQPClass::Exchange,
    AmqpExchange::DeleteOk,
    FrameKind::ExchangeDeleteOk
);
impl_try_from_class!(
    amq_protocol::protocol::exchange::BindOk,
    AMQPClass::Exchange,
    AmqpExchange::BindOk,
    FrameKind::ExchangeBindOk
);
impl_try_from_class!(
    amq_protocol::protocol::exchange::UnbindOk,
    AMQPClass::Exchange,
    AmqpExchange::UnbindOk,
    FrameKind::ExchangeUnbindOk
);

impl_try_from_class!(
    amq_protocol::protocol::queue::DeclareOk,
    AMQPClass::Queue,
    AmqpQueue::DeclareOk,
    FrameKind::QueueDeclareOk
);
impl_try_from_class!(
    amq_protocol::protocol::queue::BindOk,
    AMQPClass::Queue,
    AmqpQueue::BindOk,
    FrameKind::QueueBindOk
);
impl_try_from_class!(
    amq_protocol::protocol::queue::PurgeOk,
    AMQPClass::Queue,
    AmqpQueue::PurgeOk,
    FrameKind::QueuePurgeOk
);
impl_try_from_class!(
    amq_protocol::protocol::queue::DeleteOk,
    AMQPClass::Queue,
    AmqpQueue::DeleteOk,
    FrameKind::QueueDeleteOk
);
impl_try_from_class!(
    amq_protocol::protocol::queue::UnbindOk,
    AMQPClass::Queue,
    AmqpQueue::UnbindOk,
    FrameKind::QueueUnbindOk
);

impl_try_from_class!(
    amq_protocol::protocol::basic::QosOk,
    AMQPClass::Basic,
    AmqpBasic::QosOk,
    FrameKind::BasicQosOk
);
impl_try_from_class!(
    amq_protocol::protocol::basic::ConsumeOk,
    AMQPClass::Basic,
    AmqpBasic::ConsumeOk,
    FrameKind::BasicConsumeOk
);
impl_try_from_class!(
    amq_protocol::protocol::basic::CancelOk,
    AMQPClass::Basic,
    AmqpBasic::CancelOk,
    FrameKind::BasicCancelOk
);
impl_try_from_class!(
    amq_protocol::protocol::basic::RecoverOk,
    AMQPClass::Basic,
    AmqpBasic::RecoverOk,
    FrameKind::BasicRecoverOk
);

impl_try_from_class!(
    amq_protocol::protocol::confirm::SelectOk,
    AMQPClass::Confirm,
    AmqpConfirm::SelectOk,
    FrameKind::ConfirmSelectOk
);

impl_try_from_class!(
    amq_protocol::protocol::tx::SelectOk,
    AMQPClass::Tx,
    AmqpTx::SelectOk,
    FrameKind::TxSelectOk
);
impl_try_from_class!(
    amq_protocol::protocol::tx::CommitOk,
    AMQPClass::Tx,
    AmqpTx::CommitOk,
    FrameKind::TxCommitOk
);
impl_try_from_class!(
    amq_protocol::protocol::tx::RollbackOk,
    AMQPClass::Tx,
    AmqpTx::RollbackOk,
    FrameKind::TxRollbackOk
);

pub(crate) trait TryFromAmqpFrame: Sized {
    fn try_from(channel_id: u16, frame: AMQPFrame) -> Result<Self>;
}

impl<T: TryFromAmqpClass> TryFromAmqpFrame for T {
    fn try_from(expected_id: u16, frame: AMQPFrame) -> Result<Self> {
        let received = FrameKind::of(&frame);
        match frame {
            AMQPFrame::Method(channel_id, class) if channel_id == expected_id => {
                <T as TryFromAmqpClass>::try_from(class).map_err(|class| {
                    FrameUnexpectedSnafu {
                        channel_id: expected_id,
                        expected: T::KIND.name(),
                        received: describe_class(&class),
                    }
                    .build()
                })
            }
            AMQPFrame::Method(channel_id, _) => FrameUnexpectedSnafu {
                channel_id: expected_id,
                expected: T::KIND.name(),
                received: format!("{} on channel {}", received, channel_id),
            }
            .fail(),
            _ => FrameUnexpectedSnafu {
                channel_id: expected_id,
                expected: T::KIND.name(),
                received: received.name(),
            }
            .fail(),
        }
    }
}

fn describe_class(class: &AMQPClass) -> String {
    match FrameKind::of_class(class) {
        FrameKind::Other => format!("{:?}", class),
        kind => kind.name().to_string(),
    }
}

pub(crate) trait IntoAmqpClass {
    fn into_class(self) -> AMQPClass;
}

impl IntoAmqpClass for AMQPClass {
    fn into_class(self) -> AMQPClass {
        self
    }
}

macro_rules! impl_into_class {
    ($method:ty, $class:path) => {
        impl IntoAmqpClass for $method {
            fn into_class(self) -> AMQPClass {
                $class(self)
            }
        }
    };
}

impl_into_class!(AmqpConnection, AMQPClass::Connection);
impl_into_class!(AmqpChannel, AMQPClass::Channel);
impl_into_class!(AmqpExchange, AMQPClass::Exchange);
impl_into_class!(AmqpQueue, AMQPClass::Queue);
impl_into_class!(AmqpBasic, AMQPClass::Basic);
impl_into_class!(AmqpConfirm, AMQPClass::Confirm);
impl_into_class!(AmqpTx, AMQPClass::Tx);

/// Serialized frames waiting to be written as a single unit.
#[derive(Debug)]
pub(crate) struct OutputBuffer(Vec<u8>);

impl OutputBuffer {
    pub(crate) fn with_protocol_header() -> OutputBuffer {
        OutputBuffer(Vec::from("AMQP\x00\x00\x09\x01".as_bytes()))
    }

    pub(crate) fn empty() -> OutputBuffer {
        OutputBuffer(Vec::new())
    }

    pub(crate) fn push_heartbeat(&mut self) -> Result<()> {
        serialize(&mut self.0, |buf, pos| gen_heartbeat_frame((buf, pos)))
    }

    pub(crate) fn push_method<M>(&mut self, channel_id: u16, method: M) -> Result<()>
    where
        M: IntoAmqpClass,
    {
        let class = method.into_class();
        self.push_class(channel_id, &class)
    }

    pub(crate) fn push_class(&mut self, channel_id: u16, class: &AMQPClass) -> Result<()> {
        serialize(&mut self.0, |buf, pos| {
            gen_method_frame((buf, pos), channel_id, class)
        })
    }

    pub(crate) fn push_content_header(
        &mut self,
        channel_id: u16,
        class_id: u16,
        length: usize,
        properties: &AMQPProperties,
    ) -> Result<()> {
        let length = length as u64;
        serialize(&mut self.0, |buf, pos| {
            gen_content_header_frame((buf, pos), channel_id, class_id, length, properties)
        })
    }

    pub(crate) fn push_content_body(&mut self, channel_id: u16, content: &[u8]) -> Result<()> {
        serialize(&mut self.0, |buf, pos| {
            gen_content_body_frame((buf, pos), channel_id, content)
        })
    }

    /// Push a content header followed by as many body frames as `frame_max` requires.
    ///
    /// An empty body produces no body frames.
    pub(crate) fn push_content(
        &mut self,
        channel_id: u16,
        properties: &AMQPProperties,
        content: &[u8],
        frame_max: u32,
    ) -> Result<()> {
        self.push_content_header(channel_id, BASIC_CLASS_ID, content.len(), properties)?;
        let chunk_size = usize::max(1, (frame_max as usize).saturating_sub(FRAME_OVERHEAD));
        for chunk in content.chunks(chunk_size) {
            self.push_content_body(channel_id, chunk)?;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn serialize<F: Fn(&mut [u8], usize) -> StdResult<(&mut [u8], usize), GenError>>(
    buf: &mut Vec<u8>,
    f: F,
) -> Result<()> {
    let pos = buf.len();
    loop {
        let result = f(buf, pos).map(|(_, end)| end);
        let resize_to = match result {
            Ok(end) => {
                buf.truncate(end);
                return Ok(());
            }
            Err(GenError::BufferTooSmall(n)) => n,
            Err(_) => return InternalSerializationSnafu.fail(),
        };
        buf.resize(resize_to, 0);
    }
}

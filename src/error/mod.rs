pub mod broker;
pub mod processor;
pub mod receiver;

pub use broker::{BrokerError, SenderError};
pub use processor::ProcessorError;
pub use receiver::ReceiverError;

use thiserror::Error;

/// Обобщающий тип ошибок шины. Каждая подсистема сохраняет свой
/// собственный enum, `BusError` агрегирует их для колбэков и
/// внешних интерфейсов.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error(transparent)]
    Receiver(#[from] ReceiverError),

    #[error(transparent)]
    Sender(#[from] SenderError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

pub type BusResult<T> = Result<T, BusError>;

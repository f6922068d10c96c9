use thiserror::Error;

/// Ошибка машины состояний обработчика (Processor).
///
/// Нарушения `Idle`/`Running` — это ошибка программиста, всегда
/// фатальная для вызова, но не для самого обработчика.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    #[error("processor for '{0}' is already running")]
    AlreadyRunning(String),

    #[error("processor for '{0}' has no message callback registered")]
    CallbackNotSet(String),
}

use thiserror::Error;

/// Ошибка отправителя (Sender).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SenderError {
    /// Запланированное сообщение отсутствует в реестре: либо уже
    /// сработало, либо никогда не планировалось.
    #[error("no scheduled message with sequence number {0}")]
    ScheduleNotFound(i64),

    #[error("channel '{0}' is closed")]
    ChannelClosed(String),
}

/// Ошибка брокера: конфигурация каналов, разрешение типов и
/// вызов обработчиков.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Зарегистрированная запись канала некорректна. Обнаруживается
    /// в `init()` и фатальна до старта обработки.
    #[error("channel options not found for '{0}'")]
    ChannelOptionsNotFound(String),

    /// Не удалось получить обработчик канала из реестра.
    #[error("channel processor not found for '{0}'")]
    ChannelProcessorNotFound(String),

    /// Для известного типа не зарегистрировано ни одного обработчика.
    /// Фатально для сообщения, но не для цикла потребления.
    #[error("no handler registered for message type '{0}'")]
    HandlerNotFound(String),

    /// Сообщение не несёт пригодного тега типа, и raw-обработчик
    /// отсутствует. Сообщение отбрасывается.
    #[error("unable to resolve a message type for message '{0}'")]
    TypeResolutionFailed(String),

    /// Строгий режим: тег в сообщении не совпал с ожидаемым.
    #[error("expected message type '{expected}', got '{actual}'")]
    MessageTypeMismatch { expected: String, actual: String },

    #[error("failed to deserialize message body: {0}")]
    Deserialize(String),

    #[error("handler failed: {0}")]
    Handler(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Deserialize(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_error_display() {
        assert_eq!(
            SenderError::ScheduleNotFound(3).to_string(),
            "no scheduled message with sequence number 3"
        );
    }

    #[test]
    fn test_broker_error_display() {
        assert_eq!(
            BrokerError::HandlerNotFound("order-created".into()).to_string(),
            "no handler registered for message type 'order-created'"
        );
        assert_eq!(
            BrokerError::MessageTypeMismatch {
                expected: "a".into(),
                actual: "b".into(),
            }
            .to_string(),
            "expected message type 'a', got 'b'"
        );
    }

    #[test]
    fn test_serde_json_conversion() {
        let err = serde_json::from_str::<i64>("not a number").unwrap_err();
        let converted: BrokerError = err.into();
        match converted {
            BrokerError::Deserialize(_) => {}
            other => panic!("Expected Deserialize, got {other:?}"),
        }
    }
}

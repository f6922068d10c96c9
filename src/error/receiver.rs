use thiserror::Error;

/// Ошибка хранилища отложенных сообщений.
///
/// Получение всегда разрушающее: повторный запрос того же
/// sequence number возвращает `NotFound`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiverError {
    #[error("no deferred message with sequence number {0}")]
    NotFound(i64),

    #[error("message with sequence number {0} is already deferred")]
    AlreadyDeferred(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_error_display() {
        assert_eq!(
            ReceiverError::NotFound(42).to_string(),
            "no deferred message with sequence number 42"
        );
        assert_eq!(
            ReceiverError::AlreadyDeferred(7).to_string(),
            "message with sequence number 7 is already deferred"
        );
    }
}

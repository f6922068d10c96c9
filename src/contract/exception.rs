use async_trait::async_trait;

use tracing::warn;

use crate::error::BusError;

/// Внешний обработчик исключений шины.
///
/// Возвращает `true`, если ошибка обработана. Необработанную ошибку
/// брокер считает фатальной для сообщения и фиксирует в логе на
/// уровне error; повторы, если нужны, реализует сам обработчик
/// повторной публикацией.
#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    async fn handle_exception(&self, broker: &str, channel: &str, error: &BusError) -> bool;
}

/// Обработчик по умолчанию: пишет ошибку в лог и считает её
/// обработанной.
#[derive(Debug, Default)]
pub struct LogExceptionHandler;

#[async_trait]
impl ExceptionHandler for LogExceptionHandler {
    async fn handle_exception(&self, broker: &str, channel: &str, error: &BusError) -> bool {
        warn!(broker, channel, error = %error, "message processing failed");
        true
    }
}

use async_trait::async_trait;

use crate::{bus::Envelope, error::BusResult};

/// Контекст доставки типизированного сообщения: десериализованное
/// тело плюс исходный конверт с метаданными.
pub struct MessageContext<T> {
    pub message: T,
    pub envelope: Envelope,
}

impl<T> MessageContext<T> {
    pub fn new(message: T, envelope: Envelope) -> Self {
        Self { message, envelope }
    }
}

/// Типизированный обработчик сообщений типа `T`.
///
/// Несколько обработчиков одного типа вызываются последовательно,
/// в порядке регистрации — параллельного fan-out по обработчикам нет.
#[async_trait]
pub trait Handler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, context: MessageContext<T>) -> BusResult<()>;
}

/// Нетипизированный запасной обработчик: получает сырой конверт,
/// когда тип сообщения определить не удалось.
#[async_trait]
pub trait RawHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> BusResult<()>;
}

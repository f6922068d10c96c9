use std::time::Duration;

/// Приёмник метрик шины. Вызовы fire-and-forget: реализация не должна
/// ни блокировать, ни ронять основной путь.
pub trait BusMetrics: Send + Sync {
    fn message_published(&self, channel: &str);
    fn message_consumed(&self, channel: &str, elapsed: Duration);
    fn message_dropped(&self, channel: &str);
}

/// Реализация-заглушка, используется когда сборщик метрик не подключён.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl BusMetrics for NoopMetrics {
    fn message_published(&self, _channel: &str) {}
    fn message_consumed(&self, _channel: &str, _elapsed: Duration) {}
    fn message_dropped(&self, _channel: &str) {}
}

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::debug;

use crate::{
    contract::{BusMetrics, NoopMetrics},
    error::{BrokerError, BusResult},
};

use super::{
    channel::ChannelSlot,
    fanout::{match_all, SubscriptionFilter},
    processor::Processor,
    receiver::BusReceiver,
    sender::BusSender,
};

/// Путь подписки внутри топика, например `orders/audit`.
pub fn subscription_path(topic: &str, subscription: &str) -> String {
    format!("{topic}/{subscription}")
}

/// Реестр каналов — фабрика клиентских ручек.
///
/// Владеет очередью каждого канала и единственный создаёт отправители,
/// обработчики и приёмники, кэшируя их по имени: повторный запрос
/// возвращает ту же ручку. Первый запрос имени лениво создаёт очередь,
/// а для подписки ещё и регистрирует цель у fan-out writer'а
/// родительского топика. Создание не может завершиться ошибкой.
///
/// Кэши — единственное разделяемое изменяемое состояние ядра; все они
/// живут в конкурентных map'ах со вставкой insert-if-absent: побеждает
/// первый писатель, перезаписи нет.
pub struct ChannelRegistry {
    channels: DashMap<Arc<str>, Arc<ChannelSlot>>,
    senders: DashMap<Arc<str>, Arc<BusSender>>,
    processors: DashMap<Arc<str>, Arc<Processor>>,
    receivers: DashMap<Arc<str>, Arc<BusReceiver>>,
    metrics: Arc<dyn BusMetrics>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(NoopMetrics))
    }

    pub fn with_metrics(metrics: Arc<dyn BusMetrics>) -> Self {
        Self {
            channels: DashMap::new(),
            senders: DashMap::new(),
            processors: DashMap::new(),
            receivers: DashMap::new(),
            metrics,
        }
    }

    fn slot(&self, name: &str) -> Arc<ChannelSlot> {
        if let Some(slot) = self.channels.get(name) {
            return slot.clone();
        }
        let key: Arc<str> = Arc::from(name);
        self.channels
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(channel = %key, "channel created");
                Arc::new(ChannelSlot::new(key.clone()))
            })
            .clone()
    }

    /// Отправитель для канала. Идемпотентно: одна ручка на имя.
    pub fn sender(&self, channel: &str) -> Arc<BusSender> {
        if let Some(sender) = self.senders.get(channel) {
            return sender.clone();
        }
        let slot = self.slot(channel);
        let key = slot.name().clone();
        self.senders
            .entry(key)
            .or_insert_with(|| Arc::new(BusSender::new(slot, self.metrics.clone())))
            .clone()
    }

    /// Обработчик очереди. Забирает читающую половину канала при
    /// первом создании; дальше — кэш.
    pub fn processor(&self, channel: &str) -> BusResult<Arc<Processor>> {
        if let Some(processor) = self.processors.get(channel) {
            return Ok(processor.clone());
        }
        let slot = self.slot(channel);
        self.create_processor(slot)
    }

    /// Обработчик подписки топика. Предикат по умолчанию — «всегда
    /// истинно». Первый запрос создаёт очередь подписки и регистрирует
    /// её у fan-out writer'а топика.
    pub fn subscription_processor(
        &self,
        topic: &str,
        subscription: &str,
        filter: Option<SubscriptionFilter>,
    ) -> BusResult<Arc<Processor>> {
        let path = subscription_path(topic, subscription);
        if let Some(processor) = self.processors.get(path.as_str()) {
            return Ok(processor.clone());
        }

        let writer = self.slot(topic).fanout();
        let sub_slot = self.slot(&path);
        writer.register(
            sub_slot.name().clone(),
            filter.unwrap_or_else(match_all),
            sub_slot.queue_tx(),
        );
        self.create_processor(sub_slot)
    }

    fn create_processor(&self, slot: Arc<ChannelSlot>) -> BusResult<Arc<Processor>> {
        let key = slot.name().clone();
        match self.processors.entry(key.clone()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(vacant) => {
                let rx = slot.claim_rx().ok_or_else(|| {
                    BrokerError::ChannelProcessorNotFound(key.to_string())
                })?;
                let processor = Arc::new(Processor::new(key, rx));
                vacant.insert(processor.clone());
                Ok(processor)
            }
        }
    }

    /// Приёмник отложенных сообщений канала. Лениво создаёт и канал,
    /// и приёмник; повторный запрос — кэш.
    pub fn receiver(&self, channel: &str) -> Arc<BusReceiver> {
        if let Some(receiver) = self.receivers.get(channel) {
            return receiver.clone();
        }
        let slot = self.slot(channel);
        let key = slot.name().clone();
        self.receivers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(BusReceiver::new(key)))
            .clone()
    }

    /// Приёмник отложенных сообщений подписки.
    pub fn subscription_receiver(&self, topic: &str, subscription: &str) -> Arc<BusReceiver> {
        self.receiver(&subscription_path(topic, subscription))
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_topic(&self, channel: &str) -> bool {
        self.channels
            .get(channel)
            .map(|slot| slot.is_topic())
            .unwrap_or(false)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::bus::envelope::Envelope;

    use super::*;

    /// Тест проверяет идемпотентность кэшей: повторные запросы
    /// возвращают те же самые ручки.
    #[tokio::test]
    async fn test_lookups_are_idempotent() {
        let registry = ChannelRegistry::new();
        let s1 = registry.sender("orders");
        let s2 = registry.sender("orders");
        assert!(Arc::ptr_eq(&s1, &s2));

        let p1 = registry.processor("orders").unwrap();
        let p2 = registry.processor("orders").unwrap();
        assert!(Arc::ptr_eq(&p1, &p2));

        let r1 = registry.receiver("orders");
        let r2 = registry.receiver("orders");
        assert!(Arc::ptr_eq(&r1, &r2));

        assert_eq!(registry.channel_count(), 1);
    }

    /// Тест проверяет сквозной путь очереди: сообщение от отправителя
    /// доходит до колбэка обработчика того же канала.
    #[tokio::test]
    async fn test_queue_send_to_processor() {
        let registry = ChannelRegistry::new();
        let sender = registry.sender("billing");
        let processor = registry.processor("billing").unwrap();

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        processor.set_message_handler(move |env: Envelope| {
            let seen_tx = seen_tx.clone();
            async move {
                seen_tx.send(env).unwrap();
                Ok(())
            }
        });

        let seq = sender.send(Envelope::new("invoice")).unwrap();
        processor.start().await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(got.sequence_number, seq);
        assert_eq!(&got.body[..], b"invoice");

        processor.stop().await.unwrap();
    }

    /// Тест проверяет fan-out топика: подписка с предикатом
    /// «всегда истинно» видит сообщение, с «всегда ложно» — нет.
    #[tokio::test]
    async fn test_topic_fanout_by_subscription_predicate() {
        let registry = ChannelRegistry::new();
        let p_all = registry
            .subscription_processor("events", "all", None)
            .unwrap();
        let p_none = registry
            .subscription_processor("events", "none", Some(Arc::new(|_: &Envelope| false)))
            .unwrap();
        assert!(registry.is_topic("events"));

        let (all_tx, mut all_rx) = mpsc::unbounded_channel();
        p_all.set_message_handler(move |env: Envelope| {
            let all_tx = all_tx.clone();
            async move {
                all_tx.send(env).unwrap();
                Ok(())
            }
        });
        let (none_tx, mut none_rx) = mpsc::unbounded_channel::<Envelope>();
        p_none.set_message_handler(move |env: Envelope| {
            let none_tx = none_tx.clone();
            async move {
                none_tx.send(env).unwrap();
                Ok(())
            }
        });

        p_all.start().await.unwrap();
        p_none.start().await.unwrap();

        registry.sender("events").send(Envelope::new("ping")).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), all_rx.recv())
            .await
            .expect("matching subscription never saw the message")
            .unwrap();
        assert_eq!(&got.body[..], b"ping");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(none_rx.try_recv().is_err());

        p_all.stop().await.unwrap();
        p_none.stop().await.unwrap();
    }

    /// Тест проверяет, что у очереди и подписки раздельные приёмники
    /// отложенных сообщений.
    #[tokio::test]
    async fn test_subscription_receiver_is_distinct() {
        let registry = ChannelRegistry::new();
        let queue_rx = registry.receiver("events");
        let sub_rx = registry.subscription_receiver("events", "audit");
        assert!(!Arc::ptr_eq(&queue_rx, &sub_rx));
        assert_eq!(sub_rx.channel_name(), "events/audit");
    }
}

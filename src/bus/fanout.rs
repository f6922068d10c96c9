use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use super::{channel::EnvelopeTx, envelope::Envelope};

/// Предикат подписки: решает, попадает ли сообщение топика в очередь
/// этой подписки.
pub type SubscriptionFilter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

struct SubscriptionTarget {
    name: Arc<str>,
    filter: SubscriptionFilter,
    tx: EnvelopeTx,
}

/// Fan-out writer топика.
///
/// Очередь топика — не обычная FIFO: запись прогоняет конверт через
/// предикат каждой зарегистрированной подписки и кладёт независимую
/// копию в каждую совпавшую очередь. Подписки проверяются в порядке
/// регистрации; это определяет лишь порядок создания копий — каждая
/// подписка владеет собственной FIFO.
pub struct TopicWriter {
    topic: Arc<str>,
    targets: RwLock<Vec<SubscriptionTarget>>,
}

impl TopicWriter {
    pub(crate) fn new(topic: Arc<str>) -> Self {
        Self {
            topic,
            targets: RwLock::new(Vec::new()),
        }
    }

    /// Регистрирует подписку. Первая регистрация имени побеждает:
    /// повторная с тем же именем игнорируется и возвращает `false`.
    pub(crate) fn register(
        &self,
        name: Arc<str>,
        filter: SubscriptionFilter,
        tx: EnvelopeTx,
    ) -> bool {
        let mut targets = self.targets.write().expect("topic targets lock poisoned");
        if targets.iter().any(|t| t.name == name) {
            return false;
        }
        debug!(topic = %self.topic, subscription = %name, "subscription registered");
        targets.push(SubscriptionTarget { name, filter, tx });
        true
    }

    /// Пишет конверт во все совпавшие подписки.
    ///
    /// `true` только если push удался для *всех* совпавших очередей.
    /// Сообщение без совпадений просто исчезает — это тоже `true`.
    pub fn write(&self, envelope: &Envelope) -> bool {
        let targets = self.targets.read().expect("topic targets lock poisoned");
        let mut delivered_all = true;
        for target in targets.iter() {
            if !(target.filter)(envelope) {
                continue;
            }
            if target.tx.send(envelope.clone()).is_err() {
                warn!(
                    topic = %self.topic,
                    subscription = %target.name,
                    "subscription queue is closed, copy dropped"
                );
                delivered_all = false;
            }
        }
        delivered_all
    }

    pub fn subscription_count(&self) -> usize {
        self.targets.read().expect("topic targets lock poisoned").len()
    }
}

/// Предикат «всегда истинно» — значение по умолчанию для подписки
/// без фильтра.
pub fn match_all() -> SubscriptionFilter {
    Arc::new(|_: &Envelope| true)
}

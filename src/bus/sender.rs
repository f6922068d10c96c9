use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::{select, sync::Notify};
use tracing::{debug, info, warn};

use crate::{
    contract::BusMetrics,
    error::{BusResult, SenderError},
};

use super::{
    channel::ChannelSlot,
    envelope::{Envelope, PROP_SOURCE_CHANNEL},
    sequence::next_sequence,
};

struct ScheduledSend {
    envelope: Envelope,
    cancel: Arc<Notify>,
}

/// Отправитель, привязанный к одному каналу.
///
/// `send` ставит конверт в очередь немедленно либо, при заданном
/// `scheduled_enqueue_time`, откладывает постановку до целевого
/// момента. Отложенные отправки лежат в реестре под своим sequence
/// number; гонка отмены и срабатывания решается одним атомарным
/// удалением из реестра — кто удалил запись, тот и победил.
pub struct BusSender {
    slot: Arc<ChannelSlot>,
    scheduled: Arc<DashMap<i64, ScheduledSend>>,
    metrics: Arc<dyn BusMetrics>,
}

impl BusSender {
    pub(crate) fn new(slot: Arc<ChannelSlot>, metrics: Arc<dyn BusMetrics>) -> Self {
        Self {
            slot,
            scheduled: Arc::new(DashMap::new()),
            metrics,
        }
    }

    pub fn channel_name(&self) -> &str {
        self.slot.name()
    }

    /// Отправляет конверт: назначает sequence number, штампует время
    /// постановки и служебные свойства, затем кладёт в очередь канала.
    /// Очередь неограниченная, вызов не блокирует.
    ///
    /// Конверт с заданным `scheduled_enqueue_time` уходит в реестр
    /// отложенных отправок. Возвращает назначенный sequence number.
    pub fn send(&self, mut envelope: Envelope) -> BusResult<i64> {
        if let Some(when) = envelope.scheduled_enqueue_time {
            return Ok(self.schedule_send(envelope, when));
        }

        let sequence = next_sequence();
        envelope.sequence_number = sequence;
        envelope.enqueued_time_utc = Utc::now();
        self.stamp(&mut envelope);

        if !self.slot.write(envelope) {
            return Err(SenderError::ChannelClosed(self.slot.name().to_string()).into());
        }
        self.metrics.message_published(self.slot.name());
        debug!(channel = %self.slot.name(), sequence, "message enqueued");
        Ok(sequence)
    }

    /// Откладывает постановку конверта в очередь до момента `when`.
    ///
    /// Sequence number назначается сразу — он же ключ для отмены.
    /// Фоновая задача по наступлении срока сперва удаляет запись из
    /// реестра и только затем ставит конверт в очередь; отмена,
    /// успевшая удалить запись раньше, подавляет постановку.
    pub fn schedule_send(&self, mut envelope: Envelope, when: DateTime<Utc>) -> i64 {
        let sequence = next_sequence();
        envelope.sequence_number = sequence;
        envelope.scheduled_enqueue_time = Some(when);
        self.stamp(&mut envelope);

        let cancel = Arc::new(Notify::new());
        // Запись попадает в реестр строго до запуска таймера: таймер с
        // нулевой задержкой не должен застать реестр пустым.
        self.scheduled.insert(
            sequence,
            ScheduledSend {
                envelope,
                cancel: cancel.clone(),
            },
        );

        let delay = (when - Utc::now()).to_std().unwrap_or_default();
        let scheduled = self.scheduled.clone();
        let slot = self.slot.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            select! {
                // Отмена уже удалила запись, постановки не будет.
                _ = cancel.notified() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some((_, entry)) = scheduled.remove(&sequence) {
                        let mut envelope = entry.envelope;
                        envelope.enqueued_time_utc = Utc::now();
                        if slot.write(envelope) {
                            metrics.message_published(slot.name());
                            debug!(channel = %slot.name(), sequence, "scheduled message enqueued");
                        } else {
                            warn!(
                                channel = %slot.name(),
                                sequence,
                                "scheduled message fired into a closed channel"
                            );
                        }
                    }
                }
            }
        });

        info!(channel = %self.slot.name(), sequence, %when, "message scheduled");
        sequence
    }

    /// Отменяет отложенную отправку.
    ///
    /// `ScheduleNotFound`, если записи нет: она либо уже сработала,
    /// либо никогда не планировалась, либо сработала одновременно с
    /// отменой — побеждает последняя наблюдаемая операция.
    pub fn cancel_scheduled(&self, sequence: i64) -> BusResult<()> {
        match self.scheduled.remove(&sequence) {
            Some((_, entry)) => {
                entry.cancel.notify_one();
                info!(channel = %self.slot.name(), sequence, "scheduled message cancelled");
                Ok(())
            }
            None => Err(SenderError::ScheduleNotFound(sequence).into()),
        }
    }

    /// Количество отправок, ожидающих своего срока.
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }

    fn stamp(&self, envelope: &mut Envelope) {
        envelope
            .application_properties
            .insert(PROP_SOURCE_CHANNEL, self.slot.name().to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{contract::NoopMetrics, error::BusError};

    use super::*;

    fn sender_with_rx() -> (BusSender, super::super::channel::EnvelopeRx) {
        let slot = Arc::new(ChannelSlot::new(Arc::from("sched-chan")));
        let rx = slot.claim_rx().unwrap();
        (BusSender::new(slot, Arc::new(NoopMetrics)), rx)
    }

    /// Тест проверяет прямую отправку: назначается sequence number,
    /// штампуются служебные свойства, сообщение читается из очереди.
    #[tokio::test]
    async fn test_send_assigns_sequence_and_stamps() {
        let (sender, mut rx) = sender_with_rx();
        let seq = sender.send(Envelope::new("hello")).unwrap();
        assert!(seq > 0);

        let got = rx.recv().await.unwrap();
        assert_eq!(got.sequence_number, seq);
        assert_eq!(&got.body[..], b"hello");
        assert_eq!(
            got.application_properties.get_str(PROP_SOURCE_CHANNEL),
            Some("sched-chan")
        );
    }

    /// Тест проверяет, что номера двух подряд отправок строго растут.
    #[tokio::test]
    async fn test_send_sequence_monotonic_per_channel() {
        let (sender, mut rx) = sender_with_rx();
        let s1 = sender.send(Envelope::new("1")).unwrap();
        let s2 = sender.send(Envelope::new("2")).unwrap();
        assert!(s1 < s2);
        assert_eq!(rx.recv().await.unwrap().sequence_number, s1);
        assert_eq!(rx.recv().await.unwrap().sequence_number, s2);
    }

    /// Тест проверяет, что конверт с заданным временем постановки
    /// уходит в реестр отложенных, а не в очередь.
    #[tokio::test]
    async fn test_send_with_scheduled_time_defers() {
        let (sender, mut rx) = sender_with_rx();
        let when = Utc::now() + chrono::Duration::seconds(30);
        sender
            .send(Envelope::new("later").with_scheduled_enqueue_time(when))
            .unwrap();

        assert_eq!(sender.scheduled_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    /// Тест проверяет срабатывание отложенной отправки: после срока
    /// сообщение появляется в очереди, реестр пустеет.
    #[tokio::test]
    async fn test_scheduled_send_fires() {
        let (sender, mut rx) = sender_with_rx();
        let seq = sender.schedule_send(
            Envelope::new("delayed"),
            Utc::now() + chrono::Duration::milliseconds(50),
        );

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("scheduled message never fired")
            .unwrap();
        assert_eq!(got.sequence_number, seq);
        assert_eq!(sender.scheduled_count(), 0);
    }

    /// Тест проверяет отмену до срабатывания: сообщение не приходит
    /// в течение секунды, повторная отмена — `ScheduleNotFound`.
    #[tokio::test]
    async fn test_cancel_before_fire() {
        let (sender, mut rx) = sender_with_rx();
        let seq = sender.schedule_send(
            Envelope::new("never"),
            Utc::now() + chrono::Duration::milliseconds(200),
        );

        sender.cancel_scheduled(seq).unwrap();
        assert_eq!(sender.scheduled_count(), 0);

        let res = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(res.is_err(), "cancelled message must not be delivered");

        let err = sender.cancel_scheduled(seq).unwrap_err();
        assert_eq!(
            err,
            BusError::Sender(SenderError::ScheduleNotFound(seq))
        );
    }

    /// Тест проверяет, что отмена после срабатывания возвращает
    /// `ScheduleNotFound`: запись уже изъята таймером.
    #[tokio::test]
    async fn test_cancel_after_fire_not_found() {
        let (sender, mut rx) = sender_with_rx();
        let seq = sender.schedule_send(
            Envelope::new("fast"),
            Utc::now() + chrono::Duration::milliseconds(10),
        );

        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .unwrap();

        let err = sender.cancel_scheduled(seq).unwrap_err();
        assert_eq!(err, BusError::Sender(SenderError::ScheduleNotFound(seq)));
    }

    /// Тест проверяет отмену несуществующего номера.
    #[tokio::test]
    async fn test_cancel_unknown_not_found() {
        let (sender, _rx) = sender_with_rx();
        let err = sender.cancel_scheduled(777).unwrap_err();
        assert_eq!(err, BusError::Sender(SenderError::ScheduleNotFound(777)));
    }
}

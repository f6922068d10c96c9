use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::debug;

use crate::error::{BusResult, ReceiverError};

use super::envelope::{Envelope, Properties};

/// Хранилище отложенных сообщений канала или подписки.
///
/// Сообщения лежат под своим sequence number. Получение всегда
/// разрушающее: пара remove-and-return атомарна, повторное получение
/// того же номера — `NotFound`. Дубликат при откладывании — жёсткая
/// ошибка, а не тихая перезапись.
pub struct BusReceiver {
    channel: Arc<str>,
    deferred: DashMap<i64, Envelope>,
}

impl BusReceiver {
    pub(crate) fn new(channel: Arc<str>) -> Self {
        Self {
            channel,
            deferred: DashMap::new(),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.channel
    }

    /// Откладывает сообщение для последующего явного получения.
    ///
    /// `properties_to_modify`, если заданы, вливаются в свойства
    /// конверта перед сохранением. Возвращает ключ — sequence number
    /// конверта.
    pub fn defer_message(
        &self,
        mut envelope: Envelope,
        properties_to_modify: Option<Properties>,
    ) -> BusResult<i64> {
        if let Some(props) = properties_to_modify {
            envelope.application_properties.merge(props);
        }
        let sequence = envelope.sequence_number;
        match self.deferred.entry(sequence) {
            Entry::Occupied(_) => Err(ReceiverError::AlreadyDeferred(sequence).into()),
            Entry::Vacant(slot) => {
                debug!(channel = %self.channel, sequence, "message deferred");
                slot.insert(envelope);
                Ok(sequence)
            }
        }
    }

    /// Атомарно изымает и возвращает отложенное сообщение.
    pub fn receive_deferred(&self, sequence: i64) -> BusResult<Envelope> {
        self.deferred
            .remove(&sequence)
            .map(|(_, envelope)| {
                debug!(channel = %self.channel, sequence, "deferred message received");
                envelope
            })
            .ok_or_else(|| ReceiverError::NotFound(sequence).into())
    }

    /// Пакетное получение. Семантика по ключам та же, что у
    /// `receive_deferred`; при первом отсутствующем номере весь вызов
    /// завершается `NotFound`. Уже изъятые в этом же вызове сообщения
    /// назад не возвращаются — транзакционности нет.
    pub fn receive_deferred_batch(&self, sequences: &[i64]) -> BusResult<Vec<Envelope>> {
        let mut received = Vec::with_capacity(sequences.len());
        for &sequence in sequences {
            received.push(self.receive_deferred(sequence)?);
        }
        Ok(received)
    }

    /// Ленивая форма пакетного получения: каждый `next()` изымает
    /// очередной номер. Брошенный итератор оставляет оставшиеся
    /// номера нетронутыми в хранилище.
    pub fn receive_deferred_iter<'a, I>(
        &'a self,
        sequences: I,
    ) -> impl Iterator<Item = BusResult<Envelope>> + 'a
    where
        I: IntoIterator<Item = i64>,
        I::IntoIter: 'a,
    {
        sequences
            .into_iter()
            .map(move |sequence| self.receive_deferred(sequence))
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn contains(&self, sequence: i64) -> bool {
        self.deferred.contains_key(&sequence)
    }
}

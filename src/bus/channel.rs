use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use tokio::sync::mpsc;

use super::{envelope::Envelope, fanout::TopicWriter};

pub(crate) type EnvelopeTx = mpsc::UnboundedSender<Envelope>;
pub(crate) type EnvelopeRx = mpsc::UnboundedReceiver<Envelope>;

/// Именованный канал: неограниченная FIFO-очередь конвертов.
///
/// Канал создаётся реестром один раз на имя и живёт до конца процесса.
/// Очередь обычная (Queue), пока канал не «повышен» до топика первой
/// регистрацией подписки — тогда запись идёт через fan-out writer,
/// а собственная очередь канала больше не используется.
pub(crate) struct ChannelSlot {
    name: Arc<str>,
    tx: EnvelopeTx,
    /// Читающая половина. Забирается ровно один раз — обработчиком,
    /// владеющим циклом потребления этого канала.
    rx: Mutex<Option<EnvelopeRx>>,
    fanout: OnceCell<Arc<TopicWriter>>,
}

impl ChannelSlot {
    pub(crate) fn new(name: Arc<str>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name,
            tx,
            rx: Mutex::new(Some(rx)),
            fanout: OnceCell::new(),
        }
    }

    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Пишет конверт в канал. Для очереди — прямой push (очередь
    /// неограниченная, push не блокирует), для топика — fan-out по
    /// подпискам. `true`, если все нужные доставки прошли.
    pub(crate) fn write(&self, envelope: Envelope) -> bool {
        match self.fanout.get() {
            Some(writer) => writer.write(&envelope),
            None => self.tx.send(envelope).is_ok(),
        }
    }

    /// Возвращает fan-out writer, при первом обращении превращая
    /// канал в топик.
    pub(crate) fn fanout(&self) -> Arc<TopicWriter> {
        self.fanout
            .get_or_init(|| Arc::new(TopicWriter::new(self.name.clone())))
            .clone()
    }

    pub(crate) fn is_topic(&self) -> bool {
        self.fanout.get().is_some()
    }

    /// Пишущая половина очереди — для регистрации канала как цели
    /// подписки у родительского топика.
    pub(crate) fn queue_tx(&self) -> EnvelopeTx {
        self.tx.clone()
    }

    /// Забирает читающую половину. Второй вызов вернёт `None`:
    /// у канала может быть только один цикл потребления.
    pub(crate) fn claim_rx(&self) -> Option<EnvelopeRx> {
        self.rx.lock().expect("channel rx lock poisoned").take()
    }
}

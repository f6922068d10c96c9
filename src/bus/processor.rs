use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use tokio::{
    select,
    sync::{Mutex, Notify},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::error::{BusError, BusResult, ProcessorError};

use super::{channel::EnvelopeRx, envelope::Envelope};

pub type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Колбэк на сообщение. Ошибка из него уходит в error-колбэк,
/// цикл потребления она не останавливает.
pub type MessageCallback = Arc<dyn Fn(Envelope) -> BoxedFuture<BusResult<()>> + Send + Sync>;

/// Колбэк на ошибку обработки.
pub type ErrorCallback = Arc<dyn Fn(BusError) -> BoxedFuture<()> + Send + Sync>;

enum Lifecycle {
    Idle,
    Running {
        shutdown: Arc<Notify>,
        task: JoinHandle<()>,
    },
}

/// Обработчик канала: владеет циклом потребления одной очереди.
///
/// Состояния — `Idle` и `Running`. `start`/`stop` взаимно исключены
/// одним async-мьютексом: повторный `start` в `Running` — ошибка,
/// `stop` в `Idle` — no-op. У каждого канала не больше одного живого
/// цикла потребления: читающая половина очереди одна и принадлежит
/// этому обработчику.
pub struct Processor {
    name: Arc<str>,
    rx: Arc<Mutex<EnvelopeRx>>,
    on_message: StdMutex<Option<MessageCallback>>,
    on_error: StdMutex<Option<ErrorCallback>>,
    lifecycle: Mutex<Lifecycle>,
    processing: AtomicBool,
}

impl Processor {
    pub(crate) fn new(name: Arc<str>, rx: EnvelopeRx) -> Self {
        Self {
            name,
            rx: Arc::new(Mutex::new(rx)),
            on_message: StdMutex::new(None),
            on_error: StdMutex::new(None),
            lifecycle: Mutex::new(Lifecycle::Idle),
            processing: AtomicBool::new(false),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.name
    }

    /// Регистрирует колбэк на сообщение. Обязателен до `start`.
    pub fn set_message_callback(&self, callback: MessageCallback) {
        *self.on_message.lock().expect("callback lock poisoned") = Some(callback);
    }

    /// Регистрирует колбэк на ошибку обработки.
    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *self.on_error.lock().expect("callback lock poisoned") = Some(callback);
    }

    /// Удобная обёртка над `set_message_callback` для замыканий,
    /// возвращающих обычные async-блоки.
    pub fn set_message_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BusResult<()>> + Send + 'static,
    {
        self.set_message_callback(Arc::new(move |envelope| Box::pin(handler(envelope))));
    }

    /// Удобная обёртка над `set_error_callback`.
    pub fn set_error_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(BusError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.set_error_callback(Arc::new(move |error| Box::pin(handler(error))));
    }

    /// Идёт ли сейчас обработка.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Relaxed)
    }

    /// Запускает цикл потребления.
    ///
    /// Ошибки: `AlreadyRunning`, если цикл уже идёт; `CallbackNotSet`,
    /// если не зарегистрирован колбэк на сообщение.
    pub async fn start(&self) -> BusResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Running { .. }) {
            return Err(ProcessorError::AlreadyRunning(self.name.to_string()).into());
        }

        let on_message = self
            .on_message
            .lock()
            .expect("callback lock poisoned")
            .clone()
            .ok_or_else(|| ProcessorError::CallbackNotSet(self.name.to_string()))?;
        let on_error = self.on_error.lock().expect("callback lock poisoned").clone();

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(consume_loop(
            self.name.clone(),
            self.rx.clone(),
            on_message,
            on_error,
            shutdown.clone(),
        ));

        self.processing.store(true, Ordering::Relaxed);
        *lifecycle = Lifecycle::Running { shutdown, task };
        info!(channel = %self.name, "processor started");
        Ok(())
    }

    /// Останавливает цикл потребления и дожидается его выхода.
    /// В `Idle` — no-op.
    pub async fn stop(&self) -> BusResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Idle) {
            Lifecycle::Idle => Ok(()),
            Lifecycle::Running { shutdown, task } => {
                // notify_one хранит "разрешение": сигнал, поданный пока
                // цикл занят колбэком, не теряется.
                shutdown.notify_one();
                if let Err(join_err) = task.await {
                    if join_err.is_panic() {
                        warn!(channel = %self.name, "consume loop panicked during stop");
                    }
                }
                self.processing.store(false, Ordering::Relaxed);
                info!(channel = %self.name, "processor stopped");
                Ok(())
            }
        }
    }

    /// Останавливает, если запущен; иначе no-op. Используется при
    /// освобождении ресурсов.
    pub async fn close(&self) -> BusResult<()> {
        self.stop().await
    }
}

async fn consume_loop(
    name: Arc<str>,
    rx: Arc<Mutex<EnvelopeRx>>,
    on_message: MessageCallback,
    on_error: Option<ErrorCallback>,
    shutdown: Arc<Notify>,
) {
    let mut rx = rx.lock().await;
    loop {
        select! {
            _ = shutdown.notified() => {
                debug!(channel = %name, "consume loop observed shutdown");
                break;
            }
            next = rx.recv() => match next {
                Some(envelope) => {
                    let sequence = envelope.sequence_number;
                    if let Err(err) = on_message(envelope).await {
                        match &on_error {
                            Some(on_error) => on_error(err).await,
                            None => error!(
                                channel = %name,
                                sequence,
                                error = %err,
                                "message callback failed"
                            ),
                        }
                    }
                }
                // Все отправители канала исчезли — жить циклу незачем.
                None => {
                    warn!(channel = %name, "channel closed, consume loop exiting");
                    break;
                }
            },
        }
    }
}

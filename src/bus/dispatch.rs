use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::{Duration, Instant},
};

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::{
    config::Settings,
    contract::{
        BusMetrics, ExceptionHandler, Handler, LogExceptionHandler, MessageContext, NoopMetrics,
        RawHandler,
    },
    error::{BrokerError, BusError, BusResult, ProcessorError},
};

use super::{
    envelope::Envelope,
    fanout::SubscriptionFilter,
    processor::{BoxedFuture, Processor},
    registry::{subscription_path, ChannelRegistry},
};

/// Запись зарегистрированного потребителя: канал, опциональная
/// подписка, ожидаемый тег типа и режим его проверки.
#[derive(Clone)]
pub struct ChannelConsumerOptions {
    pub channel: String,
    pub subscription: Option<String>,
    /// Статически сконфигурированный тег типа.
    pub message_type: Option<String>,
    /// Строгий режим: тег в сообщении обязан совпасть с
    /// `message_type`. `None` — взять значение по умолчанию брокера.
    pub strict_type_check: Option<bool>,
    /// Предикат подписки; `None` — «всегда истинно».
    pub filter: Option<SubscriptionFilter>,
}

impl ChannelConsumerOptions {
    pub fn queue(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            subscription: None,
            message_type: None,
            strict_type_check: None,
            filter: None,
        }
    }

    pub fn subscription(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            subscription: Some(subscription.into()),
            ..Self::queue(topic)
        }
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_type_check = Some(strict);
        self
    }

    pub fn with_filter(mut self, filter: SubscriptionFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Полный путь потребителя: имя канала либо `топик/подписка`.
    pub fn path(&self) -> String {
        match &self.subscription {
            Some(sub) => subscription_path(&self.channel, sub),
            None => self.channel.clone(),
        }
    }
}

type ErasedInvoker = Arc<dyn Fn(Envelope) -> BoxedFuture<BusResult<()>> + Send + Sync>;

/// Таблица диспетчеризации, снимок на момент `init`.
///
/// Строится при регистрации: тег типа → замыкания, знающие, как
/// десериализовать тело и вызвать свои обработчики. Никакой
/// интроспекции типов в рантайме.
struct DispatchTable {
    broker: Arc<str>,
    invokers: HashMap<String, Vec<ErasedInvoker>>,
    raw_handlers: Vec<Arc<dyn RawHandler>>,
    exception_handler: Arc<dyn ExceptionHandler>,
    metrics: Arc<dyn BusMetrics>,
    default_strict: bool,
    dropped: AtomicU64,
}

impl DispatchTable {
    /// Разрешает тег типа и вызывает обработчики одного сообщения.
    ///
    /// Обработчики одного тега идут последовательно, в порядке
    /// регистрации. Сообщение без пригодного тега и без
    /// raw-обработчика отбрасывается с метрикой и error-логом —
    /// это не ошибка цикла потребления.
    async fn dispatch(
        &self,
        options: &ChannelConsumerOptions,
        envelope: Envelope,
    ) -> BusResult<()> {
        let channel = options.path();
        let started = Instant::now();
        let strict = options.strict_type_check.unwrap_or(self.default_strict);

        let resolved: Option<String> = if strict {
            let Some(expected) = options.message_type.clone() else {
                return Err(BrokerError::ChannelOptionsNotFound(channel).into());
            };
            match envelope.message_type() {
                Some(actual) if actual == expected => Some(expected),
                actual => {
                    return Err(BrokerError::MessageTypeMismatch {
                        expected,
                        actual: actual.unwrap_or("<missing>").to_string(),
                    }
                    .into())
                }
            }
        } else {
            envelope
                .message_type()
                .map(str::to_owned)
                .or_else(|| options.message_type.clone())
        };

        match resolved {
            Some(message_type) => match self.invokers.get(&message_type) {
                Some(handlers) if !handlers.is_empty() => {
                    for invoke in handlers {
                        invoke(envelope.clone()).await?;
                    }
                    self.metrics.message_consumed(&channel, started.elapsed());
                    Ok(())
                }
                _ => Err(BrokerError::HandlerNotFound(message_type).into()),
            },
            None if !self.raw_handlers.is_empty() => {
                for handler in &self.raw_handlers {
                    handler.handle(envelope.clone()).await?;
                }
                self.metrics.message_consumed(&channel, started.elapsed());
                Ok(())
            }
            None => {
                let err = BrokerError::TypeResolutionFailed(envelope.message_id.clone());
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.message_dropped(&channel);
                error!(
                    broker = %self.broker,
                    channel = %channel,
                    error = %err,
                    "message dropped"
                );
                Ok(())
            }
        }
    }
}

/// Внутрипроцессный брокер.
///
/// `init` получает из реестра обработчик каждой зарегистрированной
/// записи и подключает к нему диспетчеризацию и общий обработчик
/// исключений. `start`/`stop` прогоняют все обработчики; запись,
/// уже находящаяся в целевом состоянии, логируется и пропускается,
/// операция целиком не прерывается.
pub struct MemoryBroker {
    name: Arc<str>,
    registry: Arc<ChannelRegistry>,
    consumers: Vec<ChannelConsumerOptions>,
    invokers: HashMap<String, Vec<ErasedInvoker>>,
    raw_handlers: Vec<Arc<dyn RawHandler>>,
    exception_handler: Arc<dyn ExceptionHandler>,
    metrics: Arc<dyn BusMetrics>,
    default_strict: bool,
    stop_timeout: Duration,
    table: OnceCell<Arc<DispatchTable>>,
    processors: StdMutex<Vec<(Arc<ChannelConsumerOptions>, Arc<Processor>)>>,
}

impl MemoryBroker {
    pub fn new(name: impl Into<String>, registry: Arc<ChannelRegistry>) -> Self {
        Self {
            name: Arc::from(name.into()),
            registry,
            consumers: Vec::new(),
            invokers: HashMap::new(),
            raw_handlers: Vec::new(),
            exception_handler: Arc::new(LogExceptionHandler),
            metrics: Arc::new(NoopMetrics),
            default_strict: false,
            stop_timeout: Duration::from_millis(5_000),
            table: OnceCell::new(),
            processors: StdMutex::new(Vec::new()),
        }
    }

    pub fn from_settings(settings: &Settings, registry: Arc<ChannelRegistry>) -> Self {
        let mut broker = Self::new(settings.bus_name.clone(), registry);
        broker.default_strict = settings.strict_type_check;
        broker.stop_timeout = Duration::from_millis(settings.stop_timeout_ms);
        broker
    }

    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = handler;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn BusMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Регистрирует потребителя канала или подписки.
    pub fn register_consumer(&mut self, options: ChannelConsumerOptions) {
        self.consumers.push(options);
    }

    /// Регистрирует типизированный обработчик под тегом типа.
    ///
    /// Замыкание-инвокер, созданное здесь, и есть ячейка таблицы
    /// диспетчеризации: оно десериализует тело в `T` и вызывает
    /// обработчик. Несколько обработчиков одного тега вызываются
    /// последовательно, в порядке регистрации.
    pub fn register_handler<T, H>(&mut self, message_type: &str, handler: Arc<H>)
    where
        T: DeserializeOwned + Send + 'static,
        H: Handler<T> + 'static,
    {
        let invoke: ErasedInvoker = Arc::new(move |envelope: Envelope| {
            let handler = handler.clone();
            Box::pin(async move {
                let message: T =
                    serde_json::from_slice(&envelope.body).map_err(BrokerError::from)?;
                handler.handle(MessageContext::new(message, envelope)).await
            })
        });
        self.invokers
            .entry(message_type.to_string())
            .or_default()
            .push(invoke);
    }

    /// Регистрирует нетипизированный запасной обработчик.
    pub fn register_raw_handler(&mut self, handler: Arc<dyn RawHandler>) {
        self.raw_handlers.push(handler);
    }

    /// Сколько сообщений отброшено из-за неразрешённого типа.
    pub fn dropped_count(&self) -> u64 {
        self.table
            .get()
            .map(|table| table.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Инициализация: для каждой записи получает обработчик из
    /// реестра и подключает колбэки. Ошибки конфигурации фатальны и
    /// всплывают до старта обработки. Повторный `init` — no-op.
    pub async fn init(&self) -> BusResult<()> {
        let table = self
            .table
            .get_or_init(|| {
                Arc::new(DispatchTable {
                    broker: self.name.clone(),
                    invokers: self.invokers.clone(),
                    raw_handlers: self.raw_handlers.clone(),
                    exception_handler: self.exception_handler.clone(),
                    metrics: self.metrics.clone(),
                    default_strict: self.default_strict,
                    dropped: AtomicU64::new(0),
                })
            })
            .clone();

        let mut wired = self.processors.lock().expect("processor list lock poisoned");
        if !wired.is_empty() {
            return Ok(());
        }

        for options in &self.consumers {
            let path = options.path();
            if options.channel.trim().is_empty() {
                return Err(BrokerError::ChannelOptionsNotFound(path).into());
            }
            let strict = options.strict_type_check.unwrap_or(self.default_strict);
            if strict && options.message_type.is_none() {
                return Err(BrokerError::ChannelOptionsNotFound(path).into());
            }

            let processor = match &options.subscription {
                Some(sub) => self.registry.subscription_processor(
                    &options.channel,
                    sub,
                    options.filter.clone(),
                )?,
                None => self.registry.processor(&options.channel)?,
            };

            let options = Arc::new(options.clone());

            let dispatch_table = table.clone();
            let dispatch_options = options.clone();
            processor.set_message_callback(Arc::new(move |envelope| {
                let table = dispatch_table.clone();
                let options = dispatch_options.clone();
                Box::pin(async move { table.dispatch(&options, envelope).await })
            }));

            let error_table = table.clone();
            let error_path = path.clone();
            let broker_name = self.name.clone();
            processor.set_error_callback(Arc::new(move |err: BusError| {
                let table = error_table.clone();
                let path = error_path.clone();
                let broker = broker_name.clone();
                Box::pin(async move {
                    let handled = table
                        .exception_handler
                        .handle_exception(&broker, &path, &err)
                        .await;
                    if !handled {
                        error!(
                            broker = %broker,
                            channel = %path,
                            error = %err,
                            "unhandled message processing error"
                        );
                    }
                })
            }));

            wired.push((options, processor));
        }

        info!(broker = %self.name, processors = wired.len(), "broker initialized");
        Ok(())
    }

    fn wired_processors(&self) -> Vec<(Arc<ChannelConsumerOptions>, Arc<Processor>)> {
        self.processors
            .lock()
            .expect("processor list lock poisoned")
            .clone()
    }

    /// Запускает все обработчики брокера.
    pub async fn start(&self) -> BusResult<()> {
        for (options, processor) in self.wired_processors() {
            if processor.is_processing() {
                warn!(
                    broker = %self.name,
                    channel = %options.path(),
                    "processor already running, start skipped"
                );
                continue;
            }
            match processor.start().await {
                Ok(()) => {}
                Err(BusError::Processor(ProcessorError::AlreadyRunning(_))) => {
                    warn!(
                        broker = %self.name,
                        channel = %options.path(),
                        "processor already running, start skipped"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        info!(broker = %self.name, "broker started");
        Ok(())
    }

    /// Останавливает все обработчики брокера.
    pub async fn stop(&self) -> BusResult<()> {
        for (options, processor) in self.wired_processors() {
            if !processor.is_processing() {
                warn!(
                    broker = %self.name,
                    channel = %options.path(),
                    "processor already stopped, stop skipped"
                );
                continue;
            }
            match tokio::time::timeout(self.stop_timeout, processor.stop()).await {
                Ok(result) => result?,
                Err(_) => warn!(
                    broker = %self.name,
                    channel = %options.path(),
                    "processor stop timed out"
                ),
            }
        }
        info!(broker = %self.name, "broker stopped");
        Ok(())
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::BusResult;

use super::dispatch::MemoryBroker;

/// Единый жизненный цикл брокера, за которым может стоять как
/// внутрипроцессная реализация, так и адаптер внешней облачной
/// очереди.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    fn name(&self) -> &str;
    async fn init(&self) -> BusResult<()>;
    async fn start(&self) -> BusResult<()>;
    async fn stop(&self) -> BusResult<()>;
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    fn name(&self) -> &str {
        MemoryBroker::name(self)
    }

    async fn init(&self) -> BusResult<()> {
        MemoryBroker::init(self).await
    }

    async fn start(&self) -> BusResult<()> {
        MemoryBroker::start(self).await
    }

    async fn stop(&self) -> BusResult<()> {
        MemoryBroker::stop(self).await
    }
}

/// Шина сообщений: оркестрирует несколько брокеров за единым
/// `init`/`start`/`stop`.
///
/// `init` и `start` прерываются на первой ошибке: шина не должна
/// подниматься с неполным набором каналов. `stop` проходит всех
/// брокеров до конца и возвращает первую встреченную ошибку.
pub struct MessageBus {
    brokers: Vec<Arc<dyn MessageBroker>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            brokers: Vec::new(),
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.brokers.push(broker);
        self
    }

    pub fn add_broker(&mut self, broker: Arc<dyn MessageBroker>) {
        self.brokers.push(broker);
    }

    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }

    pub async fn init(&self) -> BusResult<()> {
        for broker in &self.brokers {
            broker.init().await?;
        }
        info!(brokers = self.brokers.len(), "message bus initialized");
        Ok(())
    }

    pub async fn start(&self) -> BusResult<()> {
        for broker in &self.brokers {
            broker.start().await?;
        }
        info!(brokers = self.brokers.len(), "message bus started");
        Ok(())
    }

    pub async fn stop(&self) -> BusResult<()> {
        let mut first_error = None;
        for broker in &self.brokers {
            if let Err(err) = broker.stop().await {
                error!(broker = %broker.name(), error = %err, "broker stop failed");
                first_error.get_or_insert(err);
            }
        }
        info!(brokers = self.brokers.len(), "message bus stopped");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

//! Ядро внутрипроцессной шины сообщений.
//!
//! Этот модуль реализует каналы с семантикой облачного сервиса
//! очередей и топиков, не требуя внешней инфраструктуры:
//!
//! - `sequence`: процессный монотонный счётчик sequence number.
//! - `envelope`: конверт сообщения и набор его свойств.
//! - `channel` (приватный): очередь канала и её жизненный цикл.
//! - `fanout`: размножение сообщения топика по подпискам.
//! - `registry`: реестр каналов и фабрика клиентских ручек.
//! - `sender`: отправка, отложенная отправка и её отмена.
//! - `receiver`: хранилище отложенных сообщений.
//! - `processor`: цикл потребления с машиной состояний start/stop.
//! - `dispatch`: брокер и таблица типизированной диспетчеризации.
//! - `message_bus`: оркестрация нескольких брокеров.

pub mod dispatch;
pub mod envelope;
pub mod fanout;
pub mod message_bus;
pub mod processor;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod sequence;

mod channel;

// Публичный экспорт основных типов, чтобы упростить доступ к ним
// из внешнего кода.
pub use dispatch::{ChannelConsumerOptions, MemoryBroker};
pub use envelope::{
    Envelope, Properties, PROP_MESSAGE_TYPE, PROP_SOURCE_CHANNEL, PROP_TRACE_PARENT,
};
pub use fanout::{match_all, SubscriptionFilter, TopicWriter};
pub use message_bus::{MessageBroker, MessageBus};
pub use processor::{BoxedFuture, ErrorCallback, MessageCallback, Processor};
pub use receiver::BusReceiver;
pub use registry::{subscription_path, ChannelRegistry};
pub use sender::BusSender;
pub use sequence::{current_sequence, next_sequence};

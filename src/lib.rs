/// In-process message bus core: channels, topics, subscriptions.
pub mod bus;
/// Bus configuration loading.
pub mod config;
/// Collaborator contracts: handlers, metrics, exception handling.
pub mod contract;
/// Common error types: processor, receiver, sender, broker.
pub mod error;
/// Logging initialization (tracing).
pub mod logging;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Channels, envelopes, senders, processors, brokers.
pub use bus::{
    match_all, BusReceiver, BusSender, ChannelConsumerOptions, ChannelRegistry, Envelope,
    MemoryBroker, MessageBroker, MessageBus, Processor, Properties, SubscriptionFilter,
    PROP_MESSAGE_TYPE,
};
/// config
pub use config::Settings;
/// Collaborator contracts.
pub use contract::{
    BusMetrics, ExceptionHandler, Handler, LogExceptionHandler, MessageContext, NoopMetrics,
    RawHandler,
};
/// Operation errors and result types.
pub use error::{
    BrokerError, BusError, BusResult, ProcessorError, ReceiverError, SenderError,
};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig};

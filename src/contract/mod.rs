//! Контракты внешних участников.
//!
//! Ядро шины потребляет эти интерфейсы, реализации живут снаружи:
//!
//! - `handler`: типизированные и сырые обработчики сообщений.
//! - `exception`: внешний обработчик исключений.
//! - `metrics`: приёмник счётчиков и длительностей.

pub mod exception;
pub mod handler;
pub mod metrics;

pub use exception::{ExceptionHandler, LogExceptionHandler};
pub use handler::{Handler, MessageContext, RawHandler};
pub use metrics::{BusMetrics, NoopMetrics};

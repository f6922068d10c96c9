use serde::{Deserialize, Serialize};

use config::{Config, ConfigError, Environment};

/// Настройки шины.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Имя брокера, попадает в логи и в обработчик исключений.
    pub bus_name: String,
    /// Строгая проверка тега типа по умолчанию для всех потребителей.
    pub strict_type_check: bool,
    /// Сколько ждать остановки одного обработчика, миллисекунды.
    pub stop_timeout_ms: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            // Значения по умолчанию
            .set_default("bus_name", "membus")?
            .set_default("strict_type_check", false)?
            .set_default("stop_timeout_ms", 5_000)?
            // Переменные окружения с префиксом MEMBUS_
            .add_source(Environment::with_prefix("MEMBUS"))
            .build()?;

        cfg.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bus_name: "membus".to_string(),
            strict_type_check: false,
            stop_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет значения по умолчанию.
    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.bus_name, "membus");
        assert!(!settings.strict_type_check);
        assert_eq!(settings.stop_timeout_ms, 5_000);
    }

    /// Тест проверяет, что загрузка без переменных окружения
    /// возвращает те же значения, что и `Default`.
    #[test]
    fn test_load_matches_defaults() {
        let loaded = Settings::load().expect("load failed");
        let defaults = Settings::default();
        assert_eq!(loaded.bus_name, defaults.bus_name);
        assert_eq!(loaded.stop_timeout_ms, defaults.stop_timeout_ms);
    }
}

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Ключ свойства с тегом типа сообщения. По нему брокер выбирает
/// типизированный обработчик.
pub const PROP_MESSAGE_TYPE: &str = "mb-message-type";

/// Ключ свойства с именем канала-источника. Добавляется отправителем.
pub const PROP_SOURCE_CHANNEL: &str = "mb-source-channel";

/// Ключ для прокидывания trace-контекста. Шина его только переносит,
/// интерпретация остаётся за внешним сборщиком трассировок.
pub const PROP_TRACE_PARENT: &str = "traceparent";

/// Открытый набор свойств сообщения: строковые ключи, JSON-значения,
/// порядок вставки сохраняется.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: Vec<(String, Value)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Вставляет значение. Существующий ключ обновляется на месте,
    /// сохраняя свою позицию в порядке вставки.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Значение по ключу как `&str`, если оно строковое.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Итерация в порядке вставки.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Переносит все пары из `other`, перезаписывая совпадающие ключи.
    pub fn merge(&mut self, other: Properties) {
        for (k, v) in other.entries {
            self.insert(k, v);
        }
    }
}

impl FromIterator<(String, Value)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

/// Сообщение «на проводе»: бинарное тело плюс метаданные.
///
/// `sequence_number` равен 0 до тех пор, пока сообщение не передано
/// очереди; номер назначает отправитель, ровно один раз.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Непрозрачное тело. Сериализация — забота внешней политики.
    pub body: Bytes,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    /// Уникален в пределах отправки; по умолчанию — сгенерированный id.
    pub message_id: String,
    /// Штампуется отправителем в момент постановки в очередь.
    pub enqueued_time_utc: DateTime<Utc>,
    /// Если задано — отправка откладывается до этого момента.
    pub scheduled_enqueue_time: Option<DateTime<Utc>>,
    pub sequence_number: i64,
    pub application_properties: Properties,
}

impl Envelope {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            content_type: None,
            correlation_id: None,
            message_id: Uuid::new_v4().to_string(),
            enqueued_time_utc: Utc::now(),
            scheduled_enqueue_time: None,
            sequence_number: 0,
            application_properties: Properties::new(),
        }
    }

    /// Сообщение с уже сериализованным JSON-телом и тегом типа.
    pub fn of_type(message_type: &str, body: impl Into<Bytes>) -> Self {
        let mut envelope = Self::new(body);
        envelope.content_type = Some("application/json".to_string());
        envelope.set_message_type(message_type);
        envelope
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Откладывает постановку в очередь до указанного момента.
    pub fn with_scheduled_enqueue_time(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_enqueue_time = Some(when);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.application_properties.insert(key, value);
        self
    }

    /// Тег типа из свойств сообщения.
    pub fn message_type(&self) -> Option<&str> {
        self.application_properties.get_str(PROP_MESSAGE_TYPE)
    }

    pub fn set_message_type(&mut self, message_type: &str) {
        self.application_properties
            .insert(PROP_MESSAGE_TYPE, Value::from(message_type));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет создание конверта с телом из &str и значения
    /// по умолчанию.
    #[test]
    fn test_envelope_defaults() {
        let env = Envelope::new("hello");
        assert_eq!(&env.body[..], b"hello");
        assert_eq!(env.sequence_number, 0);
        assert!(env.scheduled_enqueue_time.is_none());
        assert!(!env.message_id.is_empty());
        assert!(env.application_properties.is_empty());
    }

    /// Тест проверяет, что `of_type` проставляет тег типа и content type.
    #[test]
    fn test_envelope_of_type() {
        let env = Envelope::of_type("order-created", r#"{"id":1}"#);
        assert_eq!(env.message_type(), Some("order-created"));
        assert_eq!(env.content_type.as_deref(), Some("application/json"));
    }

    /// Тест проверяет, что у двух конвертов разные message id.
    #[test]
    fn test_envelope_message_ids_unique() {
        let a = Envelope::new("x");
        let b = Envelope::new("x");
        assert_ne!(a.message_id, b.message_id);
    }

    /// Тест проверяет, что свойства сохраняют порядок вставки,
    /// а обновление ключа не меняет его позицию.
    #[test]
    fn test_properties_preserve_insertion_order() {
        let mut props = Properties::new();
        props.insert("b", 1);
        props.insert("a", 2);
        props.insert("c", 3);
        props.insert("a", 20);

        let keys: Vec<&str> = props.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(props.get("a"), Some(&Value::from(20)));
    }

    /// Тест проверяет удаление и наличие ключей.
    #[test]
    fn test_properties_remove_and_contains() {
        let mut props = Properties::new();
        props.insert("k", "v");
        assert!(props.contains_key("k"));
        assert_eq!(props.remove("k"), Some(Value::from("v")));
        assert!(!props.contains_key("k"));
        assert_eq!(props.remove("k"), None);
    }

    /// Тест проверяет слияние наборов свойств: ключи из `other`
    /// перезаписывают существующие.
    #[test]
    fn test_properties_merge() {
        let mut base = Properties::new();
        base.insert("keep", 1);
        base.insert("replace", "old");

        let incoming: Properties = [
            ("replace".to_string(), Value::from("new")),
            ("added".to_string(), Value::from(true)),
        ]
        .into_iter()
        .collect();

        base.merge(incoming);
        assert_eq!(base.get_str("replace"), Some("new"));
        assert_eq!(base.get("added"), Some(&Value::from(true)));
        assert_eq!(base.len(), 3);
    }

    /// Тест проверяет builder-методы конверта.
    #[test]
    fn test_envelope_builders() {
        let when = Utc::now() + chrono::Duration::seconds(5);
        let env = Envelope::new("p")
            .with_content_type("text/plain")
            .with_correlation_id("corr-1")
            .with_message_id("msg-1")
            .with_scheduled_enqueue_time(when)
            .with_property("custom", 7);

        assert_eq!(env.content_type.as_deref(), Some("text/plain"));
        assert_eq!(env.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(env.message_id, "msg-1");
        assert_eq!(env.scheduled_enqueue_time, Some(when));
        assert_eq!(env.application_properties.get("custom"), Some(&Value::from(7)));
    }
}

use std::sync::atomic::{AtomicI64, Ordering};

use once_cell::sync::Lazy;

/// Глобальный счётчик sequence number. Единственный источник номеров
/// в процессе: номер выдаётся ровно один раз и никогда не переиспользуется.
static SEQUENCE: Lazy<AtomicI64> = Lazy::new(|| AtomicI64::new(0));

/// Выдаёт следующий sequence number.
///
/// Номера строго монотонны в порядке выдачи и попарно различны даже
/// при конкурентных вызовах из разных задач.
#[inline(always)]
pub fn next_sequence() -> i64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1
}

/// Последний выданный номер (0, если ещё ничего не выдавалось).
#[inline(always)]
pub fn current_sequence() -> i64 {
    SEQUENCE.load(Ordering::Relaxed)
}

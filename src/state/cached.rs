//! Explicitly invalidated cache slot.

/// A value that is computed on demand and dropped whenever its inputs change.
///
/// The owner calls [`invalidate`](Self::invalidate) on every mutation of the
/// inputs; nothing recomputes behind its back.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    value: Option<T>,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T> Cached<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot that already holds `value`.
    pub fn filled(value: T) -> Self {
        Self { value: Some(value) }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn set(&mut self, value: T) {
        self.value = Some(value);
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }

    pub fn is_cached(&self) -> bool {
        self.value.is_some()
    }

    /// Cached value, computing and storing it first if the slot is empty.
    ///
    /// A failed computation leaves the slot empty.
    pub fn get_or_try_init<E>(&mut self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        let value = match self.value.take() {
            Some(value) => value,
            None => init()?,
        };
        Ok(self.value.insert(value))
    }
}

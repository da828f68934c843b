use std::sync::Mutex;

/// A poison-tolerant, lazily initialised value with exclusive access.
///
/// Loading a model is far more expensive than running it, so the value is
/// built at most once, on first use, while holding the lock. Concurrent first
/// callers block instead of loading a second copy. A failed init leaves the
/// slot empty and the next caller tries again.
pub struct LazyModel<T> {
    value: Mutex<Option<T>>,
}

impl<T> Default for LazyModel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LazyModel<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    /// Runs `f` on the value, calling `init` first if it does not exist yet.
    pub fn with<R, E>(
        &self,
        init: impl FnOnce() -> Result<T, E>,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, E> {
        let mut guard = self.lock();
        let value = match &mut *guard {
            Some(v) => v,
            slot @ None => slot.insert(init()?),
        };
        Ok(f(value))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        match self.value.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("model cache lock was poisoned; recovering and continuing");
                poisoned.into_inner()
            }
        }
    }
}

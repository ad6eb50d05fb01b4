use std::sync::{Arc, Mutex, PoisonError};

pub mod timestamp;
pub mod uuid_v7;

pub trait FunctionProvider {
    fn uuid_v7(&mut self) -> String;
    fn timestamp(&mut self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFunctionProvider;

impl FunctionProvider for SystemFunctionProvider {
    fn uuid_v7(&mut self) -> String {
        uuid_v7::uuid_v7()
    }

    fn timestamp(&mut self) -> String {
        timestamp::timestamp()
    }
}

const DETERMINISTIC_UUID_COUNTER_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Id and clock source of an engine. In deterministic mode both draw from a
/// single counter, so runs with the same inputs produce identical ids and
/// timestamps.
#[derive(Debug, Clone)]
pub struct RuntimeFunctionProvider {
    deterministic: bool,
    next_sequence: i64,
}

impl RuntimeFunctionProvider {
    pub fn new(deterministic: bool) -> Self {
        Self {
            deterministic,
            next_sequence: 0,
        }
    }

    pub fn next_sequence(&self) -> i64 {
        self.next_sequence
    }

    fn take_sequence(&mut self) -> i64 {
        let current = self.next_sequence;
        self.next_sequence += 1;
        current
    }
}

impl FunctionProvider for RuntimeFunctionProvider {
    fn uuid_v7(&mut self) -> String {
        if self.deterministic {
            let counter = self.take_sequence();
            let counter_bits = (counter as u64) & DETERMINISTIC_UUID_COUNTER_MASK;
            return format!("01920000-0000-7000-8000-{counter_bits:012x}");
        }
        uuid_v7::uuid_v7()
    }

    fn timestamp(&mut self) -> String {
        if self.deterministic {
            let counter = self.take_sequence();
            return timestamp::timestamp_from_millis(counter);
        }
        timestamp::timestamp()
    }
}

pub struct SharedFunctionProvider<P> {
    inner: Arc<Mutex<P>>,
}

impl<P> Clone for SharedFunctionProvider<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> SharedFunctionProvider<P> {
    pub fn new(provider: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(provider)),
        }
    }

    pub fn with_lock<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn with_lock_mut<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl<P: FunctionProvider> SharedFunctionProvider<P> {
    pub fn call_uuid_v7(&self) -> String {
        self.with_lock_mut(|provider| provider.uuid_v7())
    }

    pub fn call_timestamp(&self) -> String {
        self.with_lock_mut(|provider| provider.timestamp())
    }
}

impl<P: FunctionProvider> FunctionProvider for SharedFunctionProvider<P> {
    fn uuid_v7(&mut self) -> String {
        self.call_uuid_v7()
    }

    fn timestamp(&mut self) -> String {
        self.call_timestamp()
    }
}

pub type EngineFunctions = SharedFunctionProvider<RuntimeFunctionProvider>;

#[cfg(test)]
mod tests {
    use super::{FunctionProvider, RuntimeFunctionProvider, SharedFunctionProvider};

    #[test]
    fn deterministic_mode_shares_one_counter() {
        let mut provider = RuntimeFunctionProvider::new(true);
        assert_eq!(provider.uuid_v7(), "01920000-0000-7000-8000-000000000000");
        assert_eq!(provider.timestamp(), "1970-01-01T00:00:00.001Z");
        assert_eq!(provider.uuid_v7(), "01920000-0000-7000-8000-000000000002");
        assert_eq!(provider.next_sequence(), 3);
    }

    #[test]
    fn shared_provider_clones_advance_the_same_state() {
        let shared = SharedFunctionProvider::new(RuntimeFunctionProvider::new(true));
        let other = shared.clone();
        let _ = shared.call_uuid_v7();
        let _ = other.call_uuid_v7();
        assert_eq!(shared.with_lock(|provider| provider.next_sequence()), 2);
    }

    #[test]
    fn system_mode_does_not_consume_sequence() {
        let mut provider = RuntimeFunctionProvider::new(false);
        let _ = provider.uuid_v7();
        let _ = provider.timestamp();
        assert_eq!(provider.next_sequence(), 0);
    }
}

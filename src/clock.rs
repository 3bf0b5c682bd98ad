//! Wall clock abstraction so expiration logic can run against simulated time.

use std::sync::Arc;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> i64;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> i64 {
    chrono::Utc::now().timestamp_millis()
  }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system() -> SharedClock {
  Arc::new(SystemClock)
}

/// Manually driven clock for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
  now: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl ManualClock {
  pub fn at(millis: i64) -> Arc<Self> {
    Arc::new(Self {
      now: std::sync::atomic::AtomicI64::new(millis),
    })
  }

  pub fn set(&self, millis: i64) {
    self.now.store(millis, std::sync::atomic::Ordering::SeqCst);
  }

  pub fn advance(&self, millis: i64) {
    self.now.fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now_millis(&self) -> i64 {
    self.now.load(std::sync::atomic::Ordering::SeqCst)
  }
}

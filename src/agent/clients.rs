//! Open application windows known to the agent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: u64,
  pub url: Url,
  pub focused: bool,
  /// Whether the agent intercepts this window's requests
  pub controlled: bool,
}

#[derive(Default)]
pub struct ClientRegistry {
  windows: Mutex<Vec<WindowClient>>,
  next_id: AtomicU64,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<WindowClient>> {
    self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn next_id(&self) -> u64 {
    self.next_id.fetch_add(1, Ordering::Relaxed) + 1
  }

  /// Track a window opened before the agent took control.
  pub fn register(&self, url: Url) -> u64 {
    let id = self.next_id();
    self.lock().push(WindowClient {
      id,
      url,
      focused: false,
      controlled: false,
    });
    id
  }

  /// Take control of every open window. Returns how many were newly claimed.
  pub fn claim(&self) -> usize {
    let mut windows = self.lock();
    let mut claimed = 0;
    for window in windows.iter_mut().filter(|w| !w.controlled) {
      window.controlled = true;
      claimed += 1;
    }
    debug!(claimed, "clients claimed");
    claimed
  }

  pub fn match_all(&self) -> Vec<WindowClient> {
    self.lock().clone()
  }

  /// Focus window `id`. Returns false when no such window is open.
  pub fn focus(&self, id: u64) -> bool {
    let mut windows = self.lock();
    if !windows.iter().any(|w| w.id == id) {
      return false;
    }
    for window in windows.iter_mut() {
      window.focused = window.id == id;
    }
    true
  }

  /// Open a new focused window at `url`.
  pub fn open_window(&self, url: Url) -> WindowClient {
    let window = WindowClient {
      id: self.next_id(),
      url,
      focused: true,
      controlled: true,
    };
    let mut windows = self.lock();
    for other in windows.iter_mut() {
      other.focused = false;
    }
    windows.push(window.clone());
    window
  }
}

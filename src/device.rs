//! Device-local state kept beside, not inside, the local store.
//!
//! Credentials and push key material live in `device.json`. Export, import
//! and clear of the local store never see this file.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::push::{Permission, PushSubscription};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
  /// Token saved by `login`
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub auth_token: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub push_permission: Option<Permission>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub push_subscription: Option<PushSubscription>,
  /// Subscription private key, base64url
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub push_private_key: Option<String>,
}

#[derive(Debug, Error)]
pub enum DeviceStateError {
  #[error("failed to access {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("malformed device state {path}: {source}")]
  Malformed {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// JSON file holding [`DeviceState`]. Updates are serialized in-process and
/// written through a temporary file and rename.
pub struct DeviceStateFile {
  path: PathBuf,
  lock: Mutex<()>,
}

impl DeviceStateFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Current state; a missing file is the default state.
  pub fn load(&self) -> Result<DeviceState, DeviceStateError> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    self.read()
  }

  /// Apply `updater` to the current state and persist the result.
  pub fn update<R>(
    &self,
    updater: impl FnOnce(&mut DeviceState) -> R,
  ) -> Result<R, DeviceStateError> {
    let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
    let mut state = self.read()?;
    let result = updater(&mut state);
    self.write(&state)?;
    Ok(result)
  }

  fn io_error(&self, source: std::io::Error) -> DeviceStateError {
    DeviceStateError::Io {
      path: self.path.clone(),
      source,
    }
  }

  fn read(&self) -> Result<DeviceState, DeviceStateError> {
    let content = match std::fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DeviceState::default()),
      Err(e) => return Err(self.io_error(e)),
    };
    serde_json::from_str(&content).map_err(|source| DeviceStateError::Malformed {
      path: self.path.clone(),
      source,
    })
  }

  fn write(&self, state: &DeviceState) -> Result<(), DeviceStateError> {
    if let Some(parent) = self.path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
    }
    let content = serde_json::to_string_pretty(state).map_err(|source| {
      DeviceStateError::Malformed {
        path: self.path.clone(),
        source,
      }
    })?;

    let tmp_path = self.path.with_extension("json.tmp");
    std::fs::write(&tmp_path, content).map_err(|e| self.io_error(e))?;
    std::fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))
  }
}

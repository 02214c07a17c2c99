//! Local storage: the client's cache for state that should survive a
//! restart: session token, active break / delay / emergency banners and
//! patient reminders.
//!
//! One JSON file per key under the storage directory. Nothing stored here is
//! a record of truth, so every failure degrades to "missing": unreadable or
//! malformed entries load as `None` (and the bad file is removed), and write
//! failures are logged and swallowed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::Expiring;

pub const KEY_TOKEN: &str = "token";
pub const KEY_DOCTOR_BREAK: &str = "activeDoctorBreak";
pub const KEY_DOCTOR_DELAY: &str = "activeDoctorDelay";
pub const KEY_EMERGENCY: &str = "activeEmergency";
pub const KEY_REMINDERS: &str = "patientReminders";

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse the value under `key`. Missing, unreadable or malformed → `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key)?;
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::debug!(key, error = %e, "Local storage read failed");
                return None;
            }
        };

        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding malformed local storage entry");
                self.clear(key);
                None
            }
        }
    }

    /// Like [`load`](Self::load), but an entry whose end time is not after
    /// `now` is discarded and its key removed.
    pub fn load_ephemeral<T>(&self, key: &str, now: DateTime<Utc>) -> Option<T>
    where
        T: DeserializeOwned + Expiring,
    {
        let value: T = self.load(key)?;
        if value.is_active_at(now) {
            Some(value)
        } else {
            tracing::debug!(key, end = %value.end_time(), "Stored state expired, removing");
            self.clear(key);
            None
        }
    }

    /// Serialize and write `value` under `key`. Errors are logged, not returned.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let Some(path) = self.path_for(key) else {
            return;
        };
        let json = match serde_json::to_vec(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!(key, error = %e, "Local storage serialization failed");
                return;
            }
        };
        if let Err(e) = write_atomic(&self.dir, &path, &json) {
            tracing::warn!(key, error = %e, "Local storage write failed");
        }
    }

    /// Remove `key`. A missing key is not an error.
    pub fn clear(&self, key: &str) {
        let Some(path) = self.path_for(key) else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(key, error = %e, "Local storage remove failed"),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_some_and(|p| p.exists())
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        if !is_valid_key(key) {
            tracing::debug!(key, "Rejected local storage key");
            return None;
        }
        Some(self.dir.join(format!("{key}.json")))
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 64
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

//! Persistent table of pending access expirations.
//!
//! Every granted binding is recorded together with its expiry time so that a
//! restart can reschedule (or immediately execute) the pending revocations.

use crate::mac_address::MacAddress;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

/// Longest grant accepted on either grant path (one year).
pub const MAX_GRANT_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GrantEntry {
    pub mac_address: MacAddress,
    pub duration_secs: u64,
    pub granted_at: SystemTime,
    pub expires_at: SystemTime,
}

impl GrantEntry {
    /// `None` if `duration` exceeds [`MAX_GRANT_DURATION`]
    pub fn new(mac_address: MacAddress, duration: Duration) -> Option<Self> {
        if duration > MAX_GRANT_DURATION {
            return None;
        }

        let granted_at = SystemTime::now();

        Some(GrantEntry {
            mac_address,
            duration_secs: duration.as_secs(),
            granted_at,
            expires_at: granted_at.checked_add(duration)?,
        })
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self, now: SystemTime) -> Duration {
        self.expires_at
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
    }
}

pub struct GrantStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<MacAddress, GrantEntry>>,
}

impl GrantStore {
    /// Open the store at `path`, starting empty if the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<Vec<GrantEntry>>(&contents)
                .context(format!("failed to deserialize grant store: {path:?}"))?
                .into_iter()
                .map(|entry| (entry.mac_address.clone(), entry))
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("no grant store found at {path:?}, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e).context(format!("failed to read grant store: {path:?}")),
        };

        Ok(GrantStore {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn get(&self, mac: &MacAddress) -> Option<GrantEntry> {
        self.entries().get(mac).cloned()
    }

    /// All pending entries ordered by hardware address
    pub fn pending(&self) -> Vec<GrantEntry> {
        self.entries().values().cloned().collect()
    }

    pub fn upsert(&self, entry: GrantEntry) -> Result<()> {
        let mut entries = self.entries();
        entries.insert(entry.mac_address.clone(), entry);
        self.persist(&entries)
    }

    pub fn remove(&self, mac: &MacAddress) -> Result<Option<GrantEntry>> {
        let mut entries = self.entries();
        let removed = entries.remove(mac);

        if removed.is_some() {
            self.persist(&entries)?;
        }

        Ok(removed)
    }

    /// Remove the entry only if it still expires at `expires_at`.
    ///
    /// Returns false when the address was granted again in the meantime.
    pub fn remove_if_expires_at(&self, mac: &MacAddress, expires_at: SystemTime) -> Result<bool> {
        let mut entries = self.entries();

        match entries.get(mac) {
            Some(entry) if entry.expires_at != expires_at => Ok(false),
            Some(_) => {
                entries.remove(mac);
                self.persist(&entries)?;
                Ok(true)
            }
            None => Ok(true),
        }
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<MacAddress, GrantEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<MacAddress, GrantEntry>) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).context(format!("failed to create directory {dir:?}"))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let values: Vec<&GrantEntry> = entries.values().collect();

        serde_json::to_writer_pretty(
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .context(format!("failed to open grant store for write: {tmp_path:?}"))?,
            &values,
        )
        .context(format!("failed to serialize grant store: {tmp_path:?}"))?;

        fs::rename(&tmp_path, &self.path)
            .context(format!("failed to rename {tmp_path:?} to {:?}", self.path))?;

        debug!("grant store persisted with {} entries", values.len());
        Ok(())
    }
}

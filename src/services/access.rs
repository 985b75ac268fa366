//! Temporary access grants
//!
//! A grant adds a `bypassed` hotspot ip-binding for a hardware address and
//! schedules its removal. Scheduled removals are also recorded in the
//! [`GrantStore`] so they survive a restart.

use crate::{
    mac_address::MacAddress,
    routeros_client::{Menu, Record, RouterClient, attributes},
    services::grant_store::{GrantEntry, GrantStore},
};
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{sync::Mutex, time::sleep};

const BYPASSED: &str = "bypassed";

/// Hotspot ip-binding as listed by the router.
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
    pub id: String,
    pub mac_address: String,
}

impl Binding {
    /// Bindings without `.id` or `mac-address` (ip-only bindings) are skipped.
    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Binding {
            id: record.id()?.to_string(),
            mac_address: record.get("mac-address")?.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum GrantOutcome {
    Granted { mac: MacAddress, duration: Duration },
    AlreadyBound { mac: MacAddress },
}

impl GrantOutcome {
    pub fn message(&self) -> String {
        match self {
            GrantOutcome::Granted { mac, .. } => {
                format!("MAC {mac} adicionado com sucesso à VLAN Irrestrita.")
            }
            GrantOutcome::AlreadyBound { mac } => format!("MAC {mac} já está no IP Binding."),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RevokeOutcome {
    Revoked { mac: MacAddress },
    NotFound { mac: MacAddress },
}

impl RevokeOutcome {
    pub fn message(&self) -> String {
        match self {
            RevokeOutcome::Revoked { mac } => format!("MAC {mac} removido com sucesso."),
            RevokeOutcome::NotFound { mac } => format!("MAC {mac} não está no IP Binding."),
        }
    }
}

pub fn binding_comment(duration: Duration) -> String {
    format!(
        "Acesso temporário VLAN Irrestrita ({} segundos)",
        duration.as_secs()
    )
}

/// Service for the access grant lifecycle
///
/// Lookups and changes of ip-bindings (grant, revoke and expiry) run one at a
/// time, so a listing never goes stale before the add or remove based on it.
pub struct AccessGrantService<R> {
    router: Arc<R>,
    store: Arc<GrantStore>,
    binding_lock: Arc<Mutex<()>>,
}

impl<R> Clone for AccessGrantService<R> {
    fn clone(&self) -> Self {
        AccessGrantService {
            router: Arc::clone(&self.router),
            store: Arc::clone(&self.store),
            binding_lock: Arc::clone(&self.binding_lock),
        }
    }
}

impl<R> AccessGrantService<R>
where
    R: RouterClient + Send + Sync + 'static,
{
    pub fn new(router: Arc<R>, store: Arc<GrantStore>) -> Self {
        AccessGrantService {
            router,
            store,
            binding_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    pub fn pending_grants(&self) -> Vec<GrantEntry> {
        self.store.pending()
    }

    /// Bind `mac` as bypassed and schedule its removal after `duration`
    ///
    /// An address that is already bound is left untouched and no second
    /// expiry is scheduled.
    ///
    /// # Returns
    /// The grant outcome, or an error if `duration` is out of range or the
    /// router could not be reached
    pub async fn grant(&self, mac: &MacAddress, duration: Duration) -> Result<GrantOutcome> {
        info!("grant {mac} for {}s", duration.as_secs());

        let entry = GrantEntry::new(mac.clone(), duration)
            .with_context(|| format!("grant duration of {}s out of range", duration.as_secs()))?;

        let _guard = self.binding_lock.lock().await;

        if !self.find_bindings(mac).await?.is_empty() {
            info!("{mac} already bound");
            return Ok(GrantOutcome::AlreadyBound { mac: mac.clone() });
        }

        self.router
            .add(
                Menu::HotspotIpBinding,
                attributes![
                    "mac-address" => mac,
                    "type" => BYPASSED,
                    "comment" => binding_comment(duration),
                ],
            )
            .await
            .context(format!("failed to add ip binding for {mac}"))?;

        if let Err(e) = self.store.upsert(entry.clone()) {
            error!("failed to persist grant for {mac}: {e:#}");
        }

        self.schedule_revocation(entry);

        Ok(GrantOutcome::Granted {
            mac: mac.clone(),
            duration,
        })
    }

    /// Remove the binding of `mac`; an absent binding is not an error
    pub async fn revoke(&self, mac: &MacAddress) -> Result<RevokeOutcome> {
        let _guard = self.binding_lock.lock().await;
        let outcome = self.remove_binding(mac).await?;

        if let Err(e) = self.store.remove(mac) {
            error!("failed to drop pending grant for {mac}: {e:#}");
        }

        Ok(outcome)
    }

    /// Reschedule every revocation recorded in the grant store
    ///
    /// Entries whose expiry already passed are revoked right away.
    ///
    /// # Returns
    /// Number of rescheduled revocations
    pub fn restore_pending(&self) -> usize {
        let pending = self.store.pending();

        for entry in &pending {
            info!(
                "restoring pending revocation of {} in {}s",
                entry.mac_address,
                entry.remaining(SystemTime::now()).as_secs()
            );
            self.schedule_revocation(entry.clone());
        }

        pending.len()
    }

    async fn find_bindings(&self, mac: &MacAddress) -> Result<Vec<Binding>> {
        let records = self
            .router
            .print(Menu::HotspotIpBinding)
            .await
            .context("failed to list ip bindings")?;

        Ok(records
            .iter()
            .filter_map(Binding::from_record)
            .filter(|binding| mac.matches(&binding.mac_address))
            .collect())
    }

    /// Remove every binding of `mac`. Callers hold `binding_lock`.
    async fn remove_binding(&self, mac: &MacAddress) -> Result<RevokeOutcome> {
        let bindings = self.find_bindings(mac).await?;

        if bindings.is_empty() {
            info!("{mac} not bound, nothing to revoke");
            return Ok(RevokeOutcome::NotFound { mac: mac.clone() });
        }

        if bindings.len() > 1 {
            warn!("{mac} has {} ip bindings, removing all", bindings.len());
        }

        for binding in bindings {
            self.router
                .remove(Menu::HotspotIpBinding, binding.id)
                .await
                .context(format!("failed to remove ip binding for {mac}"))?;
        }

        info!("{mac} removed from ip binding");
        Ok(RevokeOutcome::Revoked { mac: mac.clone() })
    }

    fn schedule_revocation(&self, entry: GrantEntry) {
        let service = self.clone();
        let delay = entry.remaining(SystemTime::now());

        tokio::spawn(async move {
            sleep(delay).await;
            service.expire(entry).await;
        });
    }

    async fn expire(&self, entry: GrantEntry) {
        let mac = &entry.mac_address;
        let _guard = self.binding_lock.lock().await;

        if let Some(current) = self.store.get(mac) {
            if current.expires_at != entry.expires_at {
                info!("{mac} was granted again, keeping the newer grant");
                return;
            }
        }

        match self.remove_binding(mac).await {
            Ok(outcome) => {
                info!("scheduled revocation: {}", outcome.message());
                if let Err(e) = self.store.remove_if_expires_at(mac, entry.expires_at) {
                    error!("failed to drop expired grant for {mac}: {e:#}");
                }
            }
            Err(e) => {
                // the entry stays in the store and is retried on the next start
                warn!("scheduled revocation of {mac} failed: {e:#}");
            }
        }
    }
}

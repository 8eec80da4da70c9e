//! The service registry.
//!
//! Instances live in a sharded concurrent map keyed by instance id, so a
//! heartbeat locks one shard entry and never the whole registry. Catalog reads
//! iterate the shards without a global snapshot and may observe a slightly
//! stale view.
//!
//! Expiry is enforced twice: reads skip instances whose lease ran out, and the
//! sweeper ([`spawn_sweeper`]) removes them for good.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use microservices_core::environment::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::catalog::{Application, ApplicationView, Catalog, CatalogMode};
use crate::error::RegistryError;
use crate::instance::{InstanceInfo, InstanceStatus, Registration};

/// Lease timing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeaseConfig {
    /// How long an instance stays live without a heartbeat.
    pub lease_duration: Duration,
    /// How often the sweeper evicts expired instances.
    pub eviction_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(90),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

/// Shortest period the sweeper runs at.
pub const MIN_EVICTION_INTERVAL: Duration = Duration::from_secs(1);

impl LeaseConfig {
    fn lease(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_duration).unwrap_or(chrono::Duration::MAX)
    }

    /// Eviction interval, raised to [`MIN_EVICTION_INTERVAL`].
    #[must_use]
    pub fn sweep_period(&self) -> Duration {
        self.eviction_interval.max(MIN_EVICTION_INTERVAL)
    }
}

/// Single-node service registry.
///
/// # Example
///
/// ```
/// use microservices_registry::{CatalogMode, InstanceStatus, Registration, ServiceRegistry};
///
/// let registry = ServiceRegistry::new();
/// registry.register(Registration::new("review-1", "review", "localhost", 7003)).unwrap();
/// registry.set_status("review-1", InstanceStatus::Up).unwrap();
///
/// let catalog = registry.catalog(CatalogMode::UpOnly);
/// assert_eq!(catalog.applications.application[0].name, "REVIEW");
/// ```
pub struct ServiceRegistry<C = SystemClock> {
    instances: DashMap<String, InstanceInfo>,
    lease: LeaseConfig,
    clock: C,
}

impl ServiceRegistry<SystemClock> {
    /// Registry with the default lease and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(LeaseConfig::default(), SystemClock)
    }
}

impl Default for ServiceRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ServiceRegistry<C> {
    /// Registry with explicit lease timing and clock.
    #[must_use]
    pub fn with_clock(lease: LeaseConfig, clock: C) -> Self {
        Self {
            instances: DashMap::new(),
            lease,
            clock,
        }
    }

    /// Lease timing in effect.
    #[must_use]
    pub const fn lease(&self) -> LeaseConfig {
        self.lease
    }

    /// Add an instance, replacing any previous registration with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidRegistration`] if the id or application
    /// name is blank.
    pub fn register(&self, registration: Registration) -> Result<InstanceInfo, RegistryError> {
        if registration.instance_id.trim().is_empty() {
            return Err(RegistryError::InvalidRegistration(
                "instanceId must not be empty".to_string(),
            ));
        }
        if registration.app.trim().is_empty() {
            return Err(RegistryError::InvalidRegistration(
                "app must not be empty".to_string(),
            ));
        }

        let info = InstanceInfo::from_registration(registration, self.clock.now());
        let replaced = self
            .instances
            .insert(info.instance_id.clone(), info.clone())
            .is_some();

        info!(
            app = %info.app,
            instance_id = %info.instance_id,
            status = %info.status,
            replaced,
            "Instance registered"
        );
        self.record_size();
        Ok(info)
    }

    /// Refresh the lease of an instance.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownInstance`] if the id is not registered or its
    ///   lease already expired (the expired record is removed)
    /// - [`RegistryError::RegistrationRequired`] if the instance is `DOWN`
    pub fn heartbeat(&self, instance_id: &str) -> Result<InstanceInfo, RegistryError> {
        let now = self.clock.now();
        let lease = self.lease.lease();

        let result = match self.instances.entry(instance_id.to_string()) {
            Entry::Vacant(_) => Err(RegistryError::UnknownInstance(instance_id.to_string())),
            Entry::Occupied(entry) if entry.get().is_expired(now, lease) => {
                let (_, expired) = entry.remove_entry();
                warn!(
                    app = %expired.app,
                    instance_id = %expired.instance_id,
                    "Heartbeat after lease expiry, instance dropped"
                );
                Err(RegistryError::UnknownInstance(instance_id.to_string()))
            },
            Entry::Occupied(entry) if entry.get().status == InstanceStatus::Down => {
                Err(RegistryError::RegistrationRequired(instance_id.to_string()))
            },
            Entry::Occupied(mut entry) => {
                entry.get_mut().last_heartbeat = now;
                Ok(entry.get().clone())
            },
        };

        if let Ok(info) = &result {
            debug!(app = %info.app, instance_id = %info.instance_id, "Heartbeat");
        } else {
            self.record_size();
        }
        result
    }

    /// Change the status of a live instance. Any transition is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] if the id is not registered
    /// or its lease expired.
    pub fn set_status(
        &self,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<InstanceInfo, RegistryError> {
        let now = self.clock.now();
        let lease = self.lease.lease();

        let mut entry = self
            .instances
            .get_mut(instance_id)
            .filter(|info| !info.is_expired(now, lease))
            .ok_or_else(|| RegistryError::UnknownInstance(instance_id.to_string()))?;

        let previous = entry.status;
        entry.status = status;
        entry.last_updated = now;
        let info = entry.value().clone();
        drop(entry);

        info!(
            app = %info.app,
            instance_id = %info.instance_id,
            from = %previous,
            to = %status,
            "Instance status changed"
        );
        Ok(info)
    }

    /// Remove an instance.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] if the id is not registered.
    pub fn deregister(&self, instance_id: &str) -> Result<InstanceInfo, RegistryError> {
        let (_, info) = self
            .instances
            .remove(instance_id)
            .ok_or_else(|| RegistryError::UnknownInstance(instance_id.to_string()))?;

        info!(app = %info.app, instance_id = %info.instance_id, "Instance deregistered");
        self.record_size();
        Ok(info)
    }

    /// Look up one live instance.
    #[must_use]
    pub fn instance(&self, instance_id: &str) -> Option<InstanceInfo> {
        let now = self.clock.now();
        let lease = self.lease.lease();
        self.instances
            .get(instance_id)
            .filter(|info| !info.is_expired(now, lease))
            .map(|info| info.value().clone())
    }

    /// All live applications grouped by name.
    #[must_use]
    pub fn catalog(&self, mode: CatalogMode) -> Catalog {
        Catalog::from_instances(self.live_instances(mode, None))
    }

    /// One application with every live instance, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownApplication`] if no live instance of
    /// `name` exists.
    pub fn application(&self, name: &str) -> Result<ApplicationView, RegistryError> {
        let name = name.to_ascii_uppercase();
        let mut instance = self.live_instances(CatalogMode::All, Some(&name));
        if instance.is_empty() {
            return Err(RegistryError::UnknownApplication(name));
        }
        instance.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

        Ok(ApplicationView {
            application: Application { name, instance },
        })
    }

    /// Remove every instance whose last heartbeat is older than the lease.
    ///
    /// Returns the ids of the evicted instances.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let lease = self.lease.lease();
        let mut evicted = Vec::new();

        self.instances.retain(|id, info| {
            if info.is_expired(now, lease) {
                warn!(app = %info.app, instance_id = %id, "Lease expired, evicting instance");
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });

        if !evicted.is_empty() {
            metrics::counter!("registry_evictions_total").increment(evicted.len() as u64);
            self.record_size();
        }
        evicted
    }

    /// Number of stored instances, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn live_instances(&self, mode: CatalogMode, app: Option<&str>) -> Vec<InstanceInfo> {
        let now = self.clock.now();
        let lease = self.lease.lease();
        self.instances
            .iter()
            .filter(|info| !info.is_expired(now, lease))
            .filter(|info| mode.includes(info.status))
            .filter(|info| app.is_none_or(|name| info.app == name))
            .map(|info| info.value().clone())
            .collect()
    }

    fn record_size(&self) {
        metrics::gauge!("registry_instances").set(self.instances.len() as f64);
    }
}

/// Run [`ServiceRegistry::evict_expired`] every eviction interval until
/// `shutdown` fires.
pub fn spawn_sweeper<C>(
    registry: Arc<ServiceRegistry<C>>,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()>
where
    C: Clock + 'static,
{
    tokio::spawn(async move {
        let configured = registry.lease().eviction_interval;
        let period = registry.lease().sweep_period();
        if period != configured {
            warn!(
                configured = ?configured,
                interval = ?period,
                "Eviction interval raised to minimum"
            );
        }
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval = ?period, "Registry sweeper started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Registry sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = registry.evict_expired(registry.clock.now());
                    if !evicted.is_empty() {
                        info!(count = evicted.len(), "Evicted expired instances");
                    }
                }
            }
        }
    })
}

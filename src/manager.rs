//! Store Manager
//!
//! Process-wide registry of named stores. The first caller for a name builds
//! the store; later callers get the same instance. Bounded stores get a
//! periodic eviction task on the manager's single shared scheduler.

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::{PrimaryPolling, Standalone};
use crate::config::{ManagerConfig, StoreSettings};
use crate::error::{StoreError, StoreResult};
use crate::metrics::StoreMetrics;
use crate::persistence::{BincodeSerializer, Persistable, PersistentStore};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::storage::{
    ExpirableStore, InMemoryStore, MonitoredStore, NamespacedStore, ObjectStore, PartitionView,
    PartitionedStore, StampedEntry,
};

/// Default transient store used by the host runtime
pub const DEFAULT_IN_MEMORY_STORE: &str = "_defaultInMemoryObjectStore";
/// Default persistent store used by the host runtime
pub const DEFAULT_PERSISTENT_STORE: &str = "_defaultPersistentObjectStore";
/// Default persistent store handed to user code
pub const DEFAULT_USER_STORE: &str = "_defaultUserObjectStore";
/// Default transient store handed to user code
pub const DEFAULT_USER_TRANSIENT_STORE: &str = "_defaultTransientUserObjectStore";

/// Shared backend a family of stores is partitioned from.
///
/// The capability is fixed when the manager is built: a native backend
/// partitions and expires by itself, a plain one is namespaced by key and
/// wrapped in a [`MonitoredStore`] for eviction.
pub enum Backend<V> {
    NativeExpiring {
        store: Arc<dyn PartitionedStore<V>>,
        expiry: Arc<dyn ExpirableStore>,
    },
    PlainListable(Arc<dyn PartitionedStore<StampedEntry<V>>>),
}

impl<V> Backend<V>
where
    V: Send + Sync + 'static,
{
    pub fn native<B>(backend: Arc<B>) -> Self
    where
        B: PartitionedStore<V> + ExpirableStore + 'static,
    {
        Self::NativeExpiring {
            store: backend.clone(),
            expiry: backend,
        }
    }

    /// Plain store with no partitions and no eviction of its own.
    pub fn plain<S>(store: Arc<S>) -> Self
    where
        S: ObjectStore<StampedEntry<V>> + 'static,
    {
        Self::PlainListable(Arc::new(NamespacedStore::new(store)))
    }

    fn open(&self) -> StoreResult<()> {
        match self {
            Self::NativeExpiring { store, .. } => store.open(),
            Self::PlainListable(store) => store.open(),
        }
    }
}

enum StoreKind<V> {
    Native {
        backend: Arc<dyn PartitionedStore<V>>,
        partition: String,
        task: Option<TaskHandle>,
    },
    Monitored(Arc<MonitoredStore<V>>),
}

struct Registration<V> {
    store: Arc<dyn ObjectStore<V>>,
    persistent: bool,
    kind: StoreKind<V>,
}

/// Builder for [`StoreManager`]
pub struct StoreManagerBuilder<V> {
    config: ManagerConfig,
    transient: Option<Backend<V>>,
    persistent: Option<Backend<V>>,
    primary: Option<Arc<dyn PrimaryPolling>>,
}

impl<V> StoreManagerBuilder<V>
where
    V: Persistable,
{
    pub fn transient_backend(mut self, backend: Backend<V>) -> Self {
        self.transient = Some(backend);
        self
    }

    pub fn persistent_backend(mut self, backend: Backend<V>) -> Self {
        self.persistent = Some(backend);
        self
    }

    /// Leadership signal gating eviction passes
    pub fn primary(mut self, primary: Arc<dyn PrimaryPolling>) -> Self {
        self.primary = Some(primary);
        self
    }

    pub fn build(self) -> StoreResult<StoreManager<V>> {
        self.config.validate()?;
        let transient = self
            .transient
            .unwrap_or_else(|| Backend::native(Arc::new(InMemoryStore::<V>::new())));
        let persistent = self.persistent.unwrap_or_else(|| {
            Backend::native(Arc::new(PersistentStore::<V, BincodeSerializer>::new(
                self.config.persistent_root.clone(),
            )))
        });
        let scheduler = Scheduler::with_primary(
            self.config.scheduler_threads,
            self.primary.unwrap_or_else(|| Arc::new(Standalone)),
            Arc::new(StoreMetrics::new()),
        );

        Ok(StoreManager {
            config: self.config,
            transient,
            persistent,
            scheduler,
            stores: DashMap::new(),
            initialised: AtomicBool::new(false),
        })
    }
}

/// Registry and lifecycle owner of named stores
pub struct StoreManager<V> {
    config: ManagerConfig,
    transient: Backend<V>,
    persistent: Backend<V>,
    scheduler: Scheduler,
    stores: DashMap<String, Registration<V>>,
    initialised: AtomicBool,
}

impl<V> StoreManager<V>
where
    V: Persistable,
{
    /// Manager over the default in-memory and on-disk backends
    pub fn new(config: ManagerConfig) -> StoreResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ManagerConfig) -> StoreManagerBuilder<V> {
        StoreManagerBuilder {
            config,
            transient: None,
            persistent: None,
            primary: None,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        self.scheduler.metrics()
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::Acquire)
    }

    /// Start the shared scheduler and open both backends.
    pub fn initialise(&self) -> StoreResult<()> {
        if self.is_initialised() {
            return Ok(());
        }
        self.scheduler.start()?;
        self.transient.open()?;
        self.persistent.open()?;
        self.initialised.store(true, Ordering::Release);
        info!(root = %self.config.persistent_root.display(), "Store manager initialised");
        Ok(())
    }

    /// Stop every eviction task and the scheduler, then close all stores.
    ///
    /// Persistent data stays on disk; use [`dispose_store`](Self::dispose_store)
    /// to delete it.
    pub fn dispose(&self) {
        self.initialised.store(false, Ordering::Release);

        let names: Vec<String> = self.store_names();
        for name in names {
            let Some((_, registration)) = self.stores.remove(&name) else {
                continue;
            };
            match &registration.kind {
                StoreKind::Native { task: Some(task), .. } => task.cancel(),
                StoreKind::Native { task: None, .. } => {}
                StoreKind::Monitored(monitored) => monitored.stop(),
            }
            if let Err(e) = registration.store.close() {
                warn!(store = %name, error = %e, "Failed to close store");
            }
        }

        self.scheduler.stop();
        info!(metrics = %self.metrics().summary(), "Store manager disposed");
    }

    pub fn get_store(&self, name: &str) -> StoreResult<Arc<dyn ObjectStore<V>>> {
        self.get_store_with(name, &self.unbounded(false))
    }

    pub fn get_store_persistent(
        &self,
        name: &str,
        persistent: bool,
    ) -> StoreResult<Arc<dyn ObjectStore<V>>> {
        self.get_store_with(name, &self.unbounded(persistent))
    }

    /// Bounded store from the host encoding: `-1` is unbounded, times in ms.
    pub fn get_bounded_store(
        &self,
        name: &str,
        persistent: bool,
        max_entries: i64,
        entry_ttl_ms: i64,
        expiration_interval_ms: i64,
    ) -> StoreResult<Arc<dyn ObjectStore<V>>> {
        let settings =
            StoreSettings::from_raw(persistent, max_entries, entry_ttl_ms, expiration_interval_ms)?;
        self.get_store_with(name, &settings)
    }

    /// Return the store registered as `name`, creating it on first request.
    ///
    /// Settings only apply to the creating call. Asking for an existing name
    /// with a different durability is a configuration error.
    pub fn get_store_with(
        &self,
        name: &str,
        settings: &StoreSettings,
    ) -> StoreResult<Arc<dyn ObjectStore<V>>> {
        if name.is_empty() {
            return Err(StoreError::InvalidArgument(
                "store name must not be empty".to_string(),
            ));
        }
        if !self.is_initialised() {
            return Err(StoreError::StoreUnavailable(
                "store manager is not initialised".to_string(),
            ));
        }
        settings.validate()?;

        if let Some(existing) = self.stores.get(name) {
            return Self::reuse(name, existing.value(), settings);
        }

        let candidate = self.build(name, settings)?;
        match self.stores.entry(name.to_string()) {
            MapEntry::Occupied(e) => {
                // Another caller registered first; ours is dropped
                debug!(store = name, "Store created concurrently, reusing winner");
                Self::reuse(name, e.get(), settings)
            }
            MapEntry::Vacant(e) => {
                let registration = self.activate(name, candidate, settings)?;
                let store = registration.store.clone();
                e.insert(registration);
                self.metrics().record_store_created();
                info!(
                    store = name,
                    persistent = settings.persistent,
                    max_entries = ?settings.max_entries,
                    entry_ttl_ms = ?settings.entry_ttl.map(|t| t.as_millis() as u64),
                    "Created store"
                );
                Ok(store)
            }
        }
    }

    /// Remove `name` from the registry and delete its data.
    pub fn dispose_store(&self, name: &str) -> StoreResult<()> {
        let (_, registration) = self
            .stores
            .remove(name)
            .ok_or_else(|| StoreError::DoesNotExist(format!("store '{}'", name)))?;

        match registration.kind {
            StoreKind::Native {
                backend,
                partition,
                task,
            } => {
                if let Some(task) = task {
                    task.cancel();
                }
                match backend.dispose_partition(&partition) {
                    Ok(()) | Err(StoreError::DoesNotExist(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            StoreKind::Monitored(monitored) => {
                monitored.stop();
                monitored.clear()?;
            }
        }

        self.metrics().record_store_disposed();
        info!(store = name, "Disposed store");
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.iter().map(|r| r.key().clone()).collect()
    }

    pub fn default_in_memory_store(&self) -> StoreResult<Arc<dyn ObjectStore<V>>> {
        self.get_store_persistent(DEFAULT_IN_MEMORY_STORE, false)
    }

    pub fn default_persistent_store(&self) -> StoreResult<Arc<dyn ObjectStore<V>>> {
        self.get_store_persistent(DEFAULT_PERSISTENT_STORE, true)
    }

    pub fn default_user_store(&self) -> StoreResult<Arc<dyn ObjectStore<V>>> {
        self.get_store_persistent(DEFAULT_USER_STORE, true)
    }

    pub fn default_user_transient_store(&self) -> StoreResult<Arc<dyn ObjectStore<V>>> {
        self.get_store_persistent(DEFAULT_USER_TRANSIENT_STORE, false)
    }

    fn unbounded(&self, persistent: bool) -> StoreSettings {
        StoreSettings {
            persistent,
            expiration_interval: self.config.default_expiration_interval,
            ..StoreSettings::default()
        }
    }

    fn reuse(
        name: &str,
        registration: &Registration<V>,
        settings: &StoreSettings,
    ) -> StoreResult<Arc<dyn ObjectStore<V>>> {
        if registration.persistent != settings.persistent {
            return Err(StoreError::Configuration(format!(
                "store '{}' already exists with persistent={}",
                name, registration.persistent
            )));
        }
        Ok(registration.store.clone())
    }

    /// Build the store without scheduling anything.
    fn build(&self, name: &str, settings: &StoreSettings) -> StoreResult<Registration<V>> {
        let backend = if settings.persistent {
            &self.persistent
        } else {
            &self.transient
        };

        match backend {
            Backend::NativeExpiring { store, .. } => {
                let view = PartitionView::new(store.clone(), name);
                view.open()?;
                Ok(Registration {
                    store: Arc::new(view),
                    persistent: settings.persistent,
                    kind: StoreKind::Native {
                        backend: store.clone(),
                        partition: name.to_string(),
                        task: None,
                    },
                })
            }
            Backend::PlainListable(store) => {
                let view = PartitionView::new(store.clone(), name);
                view.open()?;
                let monitored = Arc::new(MonitoredStore::new(Arc::new(view), settings));
                Ok(Registration {
                    store: monitored.clone(),
                    persistent: settings.persistent,
                    kind: StoreKind::Monitored(monitored),
                })
            }
        }
    }

    /// Register eviction for a freshly built store that won the name.
    fn activate(
        &self,
        name: &str,
        mut registration: Registration<V>,
        settings: &StoreSettings,
    ) -> StoreResult<Registration<V>> {
        let label = format!("expiry:{}", name);
        match &mut registration.kind {
            StoreKind::Native { task, partition, .. } => {
                let expiry = self
                    .backend_expiry(settings.persistent)
                    .filter(|_| settings.is_bounded());
                if let Some(expiry) = expiry {
                    let partition = partition.clone();
                    let entry_ttl = settings.entry_ttl;
                    let max_entries = settings.max_entries;
                    *task = Some(self.scheduler.schedule_eviction(
                        &label,
                        settings.expiration_interval,
                        move || expiry.expire(entry_ttl, max_entries, &partition),
                    )?);
                }
            }
            StoreKind::Monitored(monitored) => monitored.start(&self.scheduler, &label)?,
        }
        Ok(registration)
    }

    fn backend_expiry(&self, persistent: bool) -> Option<Arc<dyn ExpirableStore>> {
        let backend = if persistent {
            &self.persistent
        } else {
            &self.transient
        };
        match backend {
            Backend::NativeExpiring { expiry, .. } => Some(expiry.clone()),
            Backend::PlainListable(_) => None,
        }
    }
}

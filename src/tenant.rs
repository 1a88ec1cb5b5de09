use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::DashMap;

use crate::booking::FileBookingStore;
use crate::catalog::SlotCatalog;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// Settings shared by every tenant on this server.
#[derive(Debug, Clone)]
pub struct TenantSettings {
    pub catalog: Arc<SlotCatalog>,
    pub timezone: Tz,
    pub compact_threshold: u64,
    pub retention_days: u64,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            catalog: Arc::new(SlotCatalog::default()),
            timezone: Tz::UTC,
            compact_threshold: 1000,
            retention_days: 90,
        }
    }
}

/// Manages per-tenant engines. Each tenant is one business with its own
/// Engine, WAL, booking export and upkeep tasks.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    settings: TenantSettings,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, settings: TenantSettings) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            settings,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Two connections racing on a new tenant must share one engine.
        let entry = match self.engines.entry(safe_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(v) => v,
        };

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let bookings = Arc::new(FileBookingStore::new(
            self.data_dir.join(format!("{safe_name}.bookings.json")),
        ));
        let engine = Arc::new(
            Engine::new(
                wal_path,
                self.settings.catalog.clone(),
                bookings,
                Arc::new(NotifyHub::new()),
            )?
            .with_timezone(self.settings.timezone),
        );

        tokio::spawn(reaper::run_compactor(
            engine.clone(),
            self.settings.compact_threshold,
        ));
        tokio::spawn(reaper::run_retention(
            engine.clone(),
            self.settings.retention_days,
        ));

        entry.insert(engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("opened tenant {safe_name}");
        Ok(engine)
    }
}

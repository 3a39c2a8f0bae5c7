//! Application state management.

use crate::error::CommandError;
use exposure_core::{AppConfig, SubjectId};
use exposure_db::Database;
use exposure_provider::{HttpScanProvider, ScanProviderClient};
use exposure_scanner::{PollingOrchestrator, ScanHandle, ScanState};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// State shared across all commands.
pub struct AppState {
    /// Configuration in effect
    pub config: AppConfig,

    /// Local database
    pub db: Arc<Database>,

    /// Scan orchestrator wired to `db` and the provider
    pub orchestrator: PollingOrchestrator,

    /// Handles of scans started in this process: subject -> handle.
    /// A handle stays after its task ends so the final state stays readable,
    /// until the next scan is tracked.
    pub active_scans: RwLock<HashMap<SubjectId, ScanHandle>>,
}

impl AppState {
    /// Assemble state from an open database and a provider.
    pub fn new(config: AppConfig, db: Arc<Database>, provider: Arc<dyn ScanProviderClient>) -> Self {
        let orchestrator = PollingOrchestrator::with_database(provider, db.clone(), &config);
        Self {
            config,
            db,
            orchestrator,
            active_scans: RwLock::new(HashMap::new()),
        }
    }

    /// Open the configured database, apply migrations and connect the HTTP
    /// provider.
    pub async fn open(config: AppConfig) -> Result<Self, CommandError> {
        let db_path = config.database_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CommandError::new(
                    "FILESYSTEM_ERROR",
                    format!("Failed to create data directory: {e}"),
                )
            })?;
        }
        tracing::info!("Database: {}", db_path.display());

        let db = Database::open(&db_path, config.database.max_connections).await?;
        db.run_migrations().await?;

        let provider = HttpScanProvider::from_config(&config.provider)?;

        Ok(Self::new(config, Arc::new(db), Arc::new(provider)))
    }

    /// Remember the handle of a newly started scan, dropping handles of
    /// scans that have ended.
    pub fn track(&self, handle: ScanHandle) {
        let subject_id = handle.job().subject_id.clone();
        let mut scans = self
            .active_scans
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        scans.retain(|_, tracked| !tracked.is_finished());
        scans.insert(subject_id, handle);
    }

    /// Current state of the subject's tracked scan, if any.
    pub fn scan_state(&self, subject_id: &SubjectId) -> Option<ScanState> {
        self.active_scans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subject_id)
            .map(ScanHandle::state)
    }

    /// Ask the subject's tracked scan to stop. Returns false when there is
    /// no running scan.
    pub fn cancel_scan(&self, subject_id: &SubjectId) -> bool {
        let scans = self
            .active_scans
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match scans.get(subject_id) {
            Some(handle) if !handle.is_finished() => {
                handle.cancel();
                true
            }
            _ => false,
        }
    }

    /// Remove the subject's handle, e.g. to await it.
    pub fn take_scan(&self, subject_id: &SubjectId) -> Option<ScanHandle> {
        self.active_scans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(subject_id)
    }
}

//! # Sync Manager
//!
//! Runs sync cycles: upload the queue, then download server deltas.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           One Sync Cycle                                │
//! │                                                                         │
//! │  try_lock(cycle) ──busy──► AlreadyInProgress                           │
//! │       │                                                                 │
//! │  probe.is_online() ──no──► Offline (state untouched)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UPLOAD (repeat per batch)                                             │
//! │  ├── pending(batch_size, now) → plan → POST /sync/upload               │
//! │  │   (product entries queued after a sale of them wait a batch)        │
//! │  ├── applied   → acknowledge (dequeue, synced=true)                    │
//! │  ├── conflict  → CONFLICT (manual resolution)                          │
//! │  ├── failed    → backoff, or DEAD_LETTER after max attempts            │
//! │  └── request failed (transient) → every item counts a failure, abort   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DOWNLOAD                                                              │
//! │  ├── GET /sync/download?lastSyncTimestamp=<checkpoint>                 │
//! │  ├── merge products, then sales                                        │
//! │  └── all merged → advance checkpoint; otherwise keep it                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  last_successful_sync_at = now, state Idle                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every outcome lands in the sync log.

use chrono::{DateTime, Utc};
use minisuper_core::protocol::DownloadQuery;
use minisuper_core::{EntityType, SyncAction, SyncOutcome, SyncPhase};
use minisuper_db::{Database, MergeOutcome, NewLogEntry};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::api::{HttpSyncApi, SyncApi};
use crate::batch::{self, ItemPayload, ItemResult, MalformedItem, UploadItem};
use crate::config::{SyncConfig, SyncSettings};
use crate::connectivity::{ConnectivityProbe, HttpProbe, ManualProbe};
use crate::error::{SyncError, SyncResult};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::status::{
    DownloadReport, NoOpEmitter, SyncEventEmitter, SyncReport, SyncState, SyncStatus,
    SyncTrigger, UploadReport,
};

// =============================================================================
// Sync Manager
// =============================================================================

pub struct SyncManager {
    db: Database,
    api: Arc<dyn SyncApi>,
    probe: Arc<dyn ConnectivityProbe>,
    emitter: Arc<dyn SyncEventEmitter>,
    settings: SyncSettings,
    retry: RetryPolicy,

    /// Held for the whole cycle; `try_lock` rejects re-entrant triggers.
    cycle_lock: Mutex<()>,
    status: RwLock<SyncStatus>,
}

impl SyncManager {
    pub fn builder(db: Database, api: Arc<dyn SyncApi>) -> SyncManagerBuilder {
        SyncManagerBuilder {
            db,
            api,
            probe: None,
            emitter: None,
            settings: SyncSettings::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// HTTP api and health probe from the client config.
    pub fn from_config(db: Database, config: &SyncConfig) -> SyncResult<Self> {
        let api = HttpSyncApi::new(&config.server)?;
        let probe = HttpProbe::new(&config.server)?;
        Ok(SyncManager::builder(db, Arc::new(api))
            .probe(Arc::new(probe))
            .settings(config.sync.clone())
            .retry(RetryPolicy::from(&config.retry))
            .build())
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Full cycle: upload then download.
    #[instrument(skip(self), fields(trigger = %trigger))]
    pub async fn sync(&self, trigger: SyncTrigger) -> SyncResult<SyncReport> {
        let _cycle = self
            .cycle_lock
            .try_lock()
            .map_err(|_| SyncError::AlreadyInProgress)?;
        self.ensure_online().await?;

        let cycle_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(cycle_id = %cycle_id, "Sync cycle started");

        let upload = match self.run_upload(&cycle_id, started_at).await {
            Ok(report) => report,
            Err(e) => return Err(self.fail(SyncPhase::Upload, &cycle_id, e).await),
        };

        let download = match self.run_download(&cycle_id).await {
            Ok(report) => report,
            Err(e) => return Err(self.fail(SyncPhase::Download, &cycle_id, e).await),
        };

        let finished_at = Utc::now();
        self.db.sync_state().record_successful_sync(finished_at).await?;
        self.finish(Some(finished_at)).await;

        info!(
            cycle_id = %cycle_id,
            uploaded = upload.uploaded,
            conflicts = upload.conflicts,
            failed = upload.failed,
            dead_lettered = upload.dead_lettered,
            products = download.products_inserted + download.products_updated,
            sales = download.sales_inserted,
            "Sync cycle completed"
        );

        Ok(SyncReport {
            cycle_id,
            trigger,
            upload,
            download,
            started_at,
            finished_at,
        })
    }

    /// Upload phase only.
    pub async fn upload(&self) -> SyncResult<UploadReport> {
        let _cycle = self
            .cycle_lock
            .try_lock()
            .map_err(|_| SyncError::AlreadyInProgress)?;
        self.ensure_online().await?;

        let cycle_id = Uuid::new_v4().to_string();
        match self.run_upload(&cycle_id, Utc::now()).await {
            Ok(report) => {
                self.finish(None).await;
                Ok(report)
            }
            Err(e) => Err(self.fail(SyncPhase::Upload, &cycle_id, e).await),
        }
    }

    /// Download phase only.
    pub async fn download(&self) -> SyncResult<DownloadReport> {
        let _cycle = self
            .cycle_lock
            .try_lock()
            .map_err(|_| SyncError::AlreadyInProgress)?;
        self.ensure_online().await?;

        let cycle_id = Uuid::new_v4().to_string();
        match self.run_download(&cycle_id).await {
            Ok(report) => {
                self.finish(None).await;
                Ok(report)
            }
            Err(e) => Err(self.fail(SyncPhase::Download, &cycle_id, e).await),
        }
    }

    /// Current status with fresh queue counts.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let counts = self.db.sync_queue().counts().await?;
        let last_sync = self.db.sync_state().last_successful_sync().await?;

        let mut status = self.status.write().await;
        status.pending_count = counts.pending;
        status.conflict_count = counts.conflicts;
        status.dead_letter_count = counts.dead_letters;
        if last_sync.is_some() {
            status.last_sync_at = last_sync;
        }
        Ok(status.clone())
    }

    pub fn is_syncing(&self) -> bool {
        self.cycle_lock.try_lock().is_err()
    }

    /// Polls the probe and records the result.
    pub async fn check_connectivity(&self) -> bool {
        let online = self.probe.is_online().await;
        let changed = {
            let mut status = self.status.write().await;
            let changed = status.is_online != online;
            status.is_online = online;
            changed.then(|| status.clone())
        };
        if let Some(snapshot) = changed {
            info!(online, "Connectivity changed");
            self.emitter.emit_status(&snapshot);
        }
        online
    }

    /// Set by the scheduler while it drives periodic cycles.
    pub async fn set_periodic(&self, enabled: bool) {
        let snapshot = {
            let mut status = self.status.write().await;
            status.has_periodic_sync = enabled;
            status.clone()
        };
        self.emitter.emit_status(&snapshot);
    }

    // =========================================================================
    // Upload Phase
    // =========================================================================

    async fn run_upload(&self, cycle_id: &str, now: DateTime<Utc>) -> SyncResult<UploadReport> {
        self.set_state(SyncState::Uploading).await;

        let checkpoint = self.db.sync_state().checkpoint().await?;
        let register_id = self.db.sync_state().register_id().await?;
        let batch_size = self.settings.batch_size;
        let mut report = UploadReport::default();

        loop {
            let entries = self.db.sync_queue().pending(batch_size, now).await?;
            if entries.is_empty() {
                break;
            }
            let fetched = entries.len();
            let held = self.db.sync_queue().backing_off(now).await?;
            let mut plan = batch::plan(entries, &held);
            if plan.is_empty() && plan.malformed.is_empty() {
                // Everything left waits on an entry that is backing off.
                debug!(cycle_id, deferred = plan.deferred, "Upload blocked until retry");
                break;
            }

            for malformed in &plan.malformed {
                self.dead_letter_malformed(cycle_id, malformed).await?;
                report.dead_lettered += 1;
            }

            if !plan.is_empty() {
                for item in plan.items.iter_mut() {
                    self.fill_server_ids(item).await?;
                }

                let mut request = plan.to_request(checkpoint);
                request.register_id = Some(register_id.clone());
                report.batches += 1;
                debug!(
                    cycle_id,
                    products = request.products.len(),
                    sales = request.sales.len(),
                    cash_sessions = request.cash_sessions.len(),
                    "Uploading batch"
                );

                match self.api.upload(&request).await {
                    Ok(response) => {
                        let total = plan.items.len();
                        for (index, item) in plan.items.iter().enumerate() {
                            let results = batch::results_for(&response.results, item.entity_type);
                            let result = batch::match_result(results, &item.entity_local_id);
                            self.apply_item_result(cycle_id, item, result, now, &mut report)
                                .await?;
                            self.emitter
                                .emit_progress(SyncPhase::Upload, index + 1, total);
                        }
                    }
                    Err(e) => {
                        if e.is_retryable() {
                            let message = e.to_string();
                            for item in &plan.items {
                                self.record_item_failure(cycle_id, item, &message, now, &mut report)
                                    .await?;
                            }
                        }
                        return Err(e);
                    }
                }
            }

            if fetched < batch_size as usize && plan.deferred == 0 {
                break;
            }
        }

        Ok(report)
    }

    async fn apply_item_result(
        &self,
        cycle_id: &str,
        item: &UploadItem,
        result: ItemResult,
        now: DateTime<Utc>,
        report: &mut UploadReport,
    ) -> SyncResult<()> {
        let store = self.db.sync_store();
        match result {
            ItemResult::Applied { server_id } => {
                let fully_synced = store
                    .acknowledge(
                        item.entity_type,
                        &item.entity_local_id,
                        &server_id,
                        &item.entry_ids,
                    )
                    .await?;
                report.uploaded += 1;
                self.log(
                    cycle_id,
                    SyncPhase::Upload,
                    Some((item.entity_type, item.entity_local_id.as_str())),
                    SyncOutcome::Success,
                    format!(
                        "{} {} accepted as {}{}",
                        item.action,
                        item.entity_type,
                        server_id,
                        if fully_synced { "" } else { " (newer changes queued)" }
                    ),
                )
                .await
            }
            ItemResult::Conflict {
                reason,
                server_data,
            } => {
                store
                    .record_conflict(&item.entry_ids, &reason, server_data.as_deref())
                    .await?;
                report.conflicts += 1;
                warn!(
                    entity_type = %item.entity_type,
                    entity_local_id = %item.entity_local_id,
                    reason = %reason,
                    "Upload conflict, left for manual resolution"
                );
                self.log(
                    cycle_id,
                    SyncPhase::Upload,
                    Some((item.entity_type, item.entity_local_id.as_str())),
                    SyncOutcome::Conflict,
                    reason,
                )
                .await
            }
            ItemResult::Failed { error } => {
                self.record_item_failure(cycle_id, item, &error, now, report)
                    .await
            }
        }
    }

    async fn record_item_failure(
        &self,
        cycle_id: &str,
        item: &UploadItem,
        error: &str,
        now: DateTime<Utc>,
        report: &mut UploadReport,
    ) -> SyncResult<()> {
        let store = self.db.sync_store();
        let message = match self.retry.decide(item.attempts, now) {
            RetryDecision::RetryAt(at) => {
                store.record_failure(&item.entry_ids, error, at).await?;
                report.failed += 1;
                debug!(
                    entity_local_id = %item.entity_local_id,
                    retry_at = %at,
                    error,
                    "Upload item failed"
                );
                format!("{} (retry at {})", error, at.to_rfc3339())
            }
            RetryDecision::DeadLetter => {
                store.dead_letter(&item.entry_ids, error).await?;
                report.dead_lettered += 1;
                warn!(
                    entity_type = %item.entity_type,
                    entity_local_id = %item.entity_local_id,
                    attempts = item.attempts + 1,
                    error,
                    "Upload item dead-lettered"
                );
                format!(
                    "{} (dead-lettered after {} attempts)",
                    error,
                    self.retry.max_attempts()
                )
            }
        };

        self.log(
            cycle_id,
            SyncPhase::Upload,
            Some((item.entity_type, item.entity_local_id.as_str())),
            SyncOutcome::Error,
            message,
        )
        .await
    }

    async fn dead_letter_malformed(&self, cycle_id: &str, item: &MalformedItem) -> SyncResult<()> {
        self.db
            .sync_store()
            .dead_letter(&item.entry_ids, &item.error)
            .await?;
        warn!(
            entity_type = %item.entity_type,
            entity_local_id = %item.entity_local_id,
            error = %item.error,
            "Unreadable queue entry dead-lettered"
        );
        self.log(
            cycle_id,
            SyncPhase::Upload,
            Some((item.entity_type, item.entity_local_id.as_str())),
            SyncOutcome::Error,
            item.error.clone(),
        )
        .await
    }

    /// Snapshots queued before an acknowledgement carry no server ids.
    async fn fill_server_ids(&self, item: &mut UploadItem) -> SyncResult<()> {
        let known = match item.entity_type {
            EntityType::Product => self
                .db
                .products()
                .get(&item.entity_local_id)
                .await?
                .and_then(|p| p.server_id),
            EntityType::Sale => self
                .db
                .sales()
                .get(&item.entity_local_id)
                .await?
                .and_then(|s| s.server_id),
            EntityType::CashSession => self
                .db
                .cash_sessions()
                .get(&item.entity_local_id)
                .await?
                .and_then(|c| c.server_id),
        };
        if let Some(server_id) = known {
            item.payload.set_server_id_if_missing(&server_id);
            // Earlier entries of this entity already created it.
            if item.action == SyncAction::Create {
                item.action = SyncAction::Update;
                item.payload.set_action(SyncAction::Update);
            }
        }

        if let ItemPayload::Sale(sale) = &mut item.payload {
            for line in sale.items.iter_mut().filter(|l| l.product_id.is_empty()) {
                let Some(product_local_id) = line.product_local_id.as_deref() else {
                    continue;
                };
                if let Some(server_id) = self
                    .db
                    .products()
                    .get(product_local_id)
                    .await?
                    .and_then(|p| p.server_id)
                {
                    line.product_id = server_id;
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Download Phase
    // =========================================================================

    async fn run_download(&self, cycle_id: &str) -> SyncResult<DownloadReport> {
        self.set_state(SyncState::Downloading).await;

        let checkpoint = self.db.sync_state().checkpoint().await?;
        let query = DownloadQuery {
            last_sync_timestamp: checkpoint,
            include_products: self.settings.include_products,
            include_sales: self.settings.include_sales,
            include_own_sales_only: self.settings.include_own_sales_only,
        };
        let response = self.api.download(&query).await?;
        let data = response.data;

        let store = self.db.sync_store();
        let total = data.products.len() + data.sales.len();
        let mut report = DownloadReport {
            checkpoint,
            ..Default::default()
        };
        let mut failed = 0;
        let mut processed = 0;

        for product in &data.products {
            match store.apply_downloaded_product(product).await {
                Ok(MergeOutcome::Inserted) => report.products_inserted += 1,
                Ok(MergeOutcome::Updated) => report.products_updated += 1,
                Ok(MergeOutcome::Skipped(_)) => report.skipped += 1,
                Err(e) => {
                    failed += 1;
                    warn!(code = %product.code, server_id = %product.id, error = %e, "Downloaded product not merged");
                    self.log(
                        cycle_id,
                        SyncPhase::Download,
                        None,
                        SyncOutcome::Error,
                        format!("product {} ({}): {}", product.code, product.id, e),
                    )
                    .await?;
                }
            }
            processed += 1;
            self.emitter
                .emit_progress(SyncPhase::Download, processed, total);
        }

        for sale in &data.sales {
            match store.apply_downloaded_sale(sale).await {
                Ok(MergeOutcome::Skipped(_)) => report.skipped += 1,
                Ok(_) => report.sales_inserted += 1,
                Err(e) => {
                    failed += 1;
                    warn!(sale_number = %sale.sale_number, server_id = %sale.id, error = %e, "Downloaded sale not merged");
                    self.log(
                        cycle_id,
                        SyncPhase::Download,
                        None,
                        SyncOutcome::Error,
                        format!("sale {} ({}): {}", sale.sale_number, sale.id, e),
                    )
                    .await?;
                }
            }
            processed += 1;
            self.emitter
                .emit_progress(SyncPhase::Download, processed, total);
        }

        if failed > 0 {
            return Err(SyncError::DownloadIncomplete { failed, total });
        }

        let advanced = self
            .db
            .sync_state()
            .advance_checkpoint(data.sync_timestamp)
            .await?;
        report.checkpoint = Some(advanced);

        self.log(
            cycle_id,
            SyncPhase::Download,
            None,
            SyncOutcome::Success,
            format!(
                "{} products, {} sales merged, {} skipped; checkpoint {}",
                report.products_inserted + report.products_updated,
                report.sales_inserted,
                report.skipped,
                advanced.to_rfc3339()
            ),
        )
        .await?;

        Ok(report)
    }

    // =========================================================================
    // State Handling
    // =========================================================================

    async fn ensure_online(&self) -> SyncResult<()> {
        if self.check_connectivity().await {
            Ok(())
        } else {
            debug!("Sync skipped, offline");
            Err(SyncError::Offline)
        }
    }

    async fn set_state(&self, state: SyncState) {
        let snapshot = {
            let mut status = self.status.write().await;
            status.state = state;
            status.is_syncing = matches!(state, SyncState::Uploading | SyncState::Downloading);
            status.clone()
        };
        debug!(state = %state, "Sync state");
        self.emitter.emit_status(&snapshot);
    }

    /// Back to Idle after a successful phase or cycle.
    async fn finish(&self, synced_at: Option<DateTime<Utc>>) {
        {
            let mut status = self.status.write().await;
            status.last_error = None;
            if synced_at.is_some() {
                status.last_sync_at = synced_at;
            }
        }
        self.set_state(SyncState::Idle).await;
        self.refresh_counts().await;
    }

    /// Error → Idle, keeping the message. Returns the error for propagation.
    async fn fail(&self, phase: SyncPhase, cycle_id: &str, err: SyncError) -> SyncError {
        let message = err.to_string();
        error!(cycle_id, phase = %phase, error = %message, "Sync phase failed");

        if let Err(log_err) = self
            .log(cycle_id, phase, None, SyncOutcome::Error, message.clone())
            .await
        {
            warn!(error = %log_err, "Could not record phase failure in sync log");
        }

        {
            let mut status = self.status.write().await;
            status.last_error = Some(message.clone());
        }
        self.set_state(SyncState::Error).await;
        self.emitter.emit_error(&message, err.is_retryable());
        self.set_state(SyncState::Idle).await;
        self.refresh_counts().await;
        err
    }

    async fn refresh_counts(&self) {
        match self.db.sync_queue().counts().await {
            Ok(counts) => {
                let mut status = self.status.write().await;
                status.pending_count = counts.pending;
                status.conflict_count = counts.conflicts;
                status.dead_letter_count = counts.dead_letters;
            }
            Err(e) => warn!(error = %e, "Could not refresh queue counts"),
        }
    }

    async fn log(
        &self,
        cycle_id: &str,
        phase: SyncPhase,
        entity: Option<(EntityType, &str)>,
        outcome: SyncOutcome,
        message: String,
    ) -> SyncResult<()> {
        self.db
            .sync_log()
            .append(NewLogEntry {
                cycle_id,
                phase,
                entity_type: entity.map(|(entity_type, _)| entity_type),
                entity_local_id: entity.map(|(_, local_id)| local_id),
                outcome,
                message,
            })
            .await?;
        Ok(())
    }
}

// =============================================================================
// Builder
// =============================================================================

pub struct SyncManagerBuilder {
    db: Database,
    api: Arc<dyn SyncApi>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    settings: SyncSettings,
    retry: RetryPolicy,
}

impl SyncManagerBuilder {
    pub fn probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Without a probe the manager assumes it is always online.
    pub fn build(self) -> SyncManager {
        SyncManager {
            db: self.db,
            api: self.api,
            probe: self
                .probe
                .unwrap_or_else(|| Arc::new(ManualProbe::online())),
            emitter: self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
            settings: self.settings,
            retry: self.retry,
            cycle_lock: Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
        }
    }
}

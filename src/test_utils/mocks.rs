//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::domain::{
    AppError, AuditLogEntry, AuditLogStore, Clock, CursorOptions, DatabaseError, Job, JobHandler,
    JobOptions, JobQueue, NewAuditLogEntry, PaginatedResponse, QueueError, QueueStats,
    RandomSource, Transfer, TransferFilters, TransferRepository,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

/// Failure switch shared by the mocks; can be flipped mid-test.
#[derive(Debug, Default)]
struct FailureSwitch {
    failing: AtomicBool,
    message: Mutex<Option<String>>,
}

impl FailureSwitch {
    fn from_config(config: MockConfig) -> Self {
        Self {
            failing: AtomicBool::new(config.should_fail),
            message: Mutex::new(config.error_message),
        }
    }

    fn set(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn message(&self) -> Option<String> {
        if !self.failing.load(Ordering::SeqCst) {
            return None;
        }
        Some(
            self.message
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "Mock error".to_string()),
        )
    }
}

/// What the next `update` call does, consumed one per call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    /// Behave normally
    Apply,
    /// Fail with a connection error and store nothing
    FailConnection,
    /// Delete the row first, as if another request removed it
    RemoveRow,
}

/// In-memory transfer repository with the same ordering and locking rules
/// as the Postgres one.
pub struct InMemoryTransferRepository {
    storage: Arc<Mutex<BTreeMap<String, Transfer>>>,
    failure: FailureSwitch,
    is_healthy: AtomicBool,
    undeletable: Mutex<HashSet<String>>,
    update_steps: Mutex<VecDeque<UpdateStep>>,
}

impl InMemoryTransferRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            storage: Arc::new(Mutex::new(BTreeMap::new())),
            failure: FailureSwitch::from_config(config),
            is_healthy: AtomicBool::new(true),
            undeletable: Mutex::new(HashSet::new()),
            update_steps: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_failing(&self, failing: bool) {
        self.failure.set(failing);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Make `delete`/`delete_many` silently skip this id
    pub fn mark_undeletable(&self, id: &str) {
        self.undeletable.lock().unwrap().insert(id.to_string());
    }

    /// Script the next `update` calls; unscripted calls apply normally
    pub fn script_updates(&self, steps: impl IntoIterator<Item = UpdateStep>) {
        self.update_steps.lock().unwrap().extend(steps);
    }

    /// Remove a row behind the service's back
    pub fn remove(&self, id: &str) -> Option<Transfer> {
        self.storage.lock().unwrap().remove(id)
    }

    /// Get all stored items in id order (for testing)
    pub fn get_all_items(&self) -> Vec<Transfer> {
        self.storage.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Transfer> {
        self.storage.lock().unwrap().get(id).cloned()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        match self.failure.message() {
            Some(msg) => Err(AppError::Database(DatabaseError::Query(msg))),
            None => Ok(()),
        }
    }

    fn newest_first(mut items: Vec<Transfer>) -> Vec<Transfer> {
        items.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(a.id()))
        });
        items
    }
}

impl Default for InMemoryTransferRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferRepository for InMemoryTransferRepository {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn create(&self, transfer: &Transfer) -> Result<Transfer, AppError> {
        self.check_should_fail()?;
        let mut storage = self.storage.lock().unwrap();
        if storage.contains_key(transfer.id()) {
            return Err(DatabaseError::Duplicate(format!("id {}", transfer.id())).into());
        }
        if storage.values().any(|t| t.reference() == transfer.reference()) {
            return Err(DatabaseError::Duplicate(format!("reference {}", transfer.reference())).into());
        }
        let stored = transfer.clone().with_version(1);
        storage.insert(stored.id().to_string(), stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Transfer>, AppError> {
        self.check_should_fail()?;
        Ok(self.storage.lock().unwrap().get(id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transfer>, AppError> {
        self.check_should_fail()?;
        let storage = self.storage.lock().unwrap();
        Ok(storage.values().find(|t| t.reference() == reference).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Transfer>, AppError> {
        self.check_should_fail()?;
        let items = self.storage.lock().unwrap().values().cloned().collect();
        Ok(Self::newest_first(items))
    }

    async fn find_with_filters(&self, filters: &TransferFilters) -> Result<Vec<Transfer>, AppError> {
        self.check_should_fail()?;
        let items = self
            .storage
            .lock()
            .unwrap()
            .values()
            .filter(|t| filters.matches(t))
            .cloned()
            .collect();
        Ok(Self::newest_first(items))
    }

    async fn find_with_filters_and_cursor_pagination(
        &self,
        filters: &TransferFilters,
        options: &CursorOptions,
    ) -> Result<PaginatedResponse<Transfer>, AppError> {
        self.check_should_fail()?;
        let storage = self.storage.lock().unwrap();
        let rows: Vec<Transfer> = storage
            .values()
            .filter(|t| options.cursor.as_deref().is_none_or(|c| t.id() > c))
            .filter(|t| filters.matches(t))
            .take(options.limit + 1)
            .cloned()
            .collect();
        Ok(PaginatedResponse::from_overfetch(rows, options.limit, |t| {
            t.id().to_string()
        }))
    }

    async fn update(&self, id: &str, transfer: &Transfer) -> Result<Option<Transfer>, AppError> {
        self.check_should_fail()?;
        let step = self
            .update_steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(UpdateStep::Apply);
        let mut storage = self.storage.lock().unwrap();
        match step {
            UpdateStep::Apply => {}
            UpdateStep::FailConnection => {
                return Err(DatabaseError::Connection("connection reset by peer".to_string()).into());
            }
            UpdateStep::RemoveRow => {
                storage.remove(id);
            }
        }
        let Some(current) = storage.get(id) else {
            return Ok(None);
        };
        if current.version() != transfer.version() {
            return Err(DatabaseError::VersionConflict(id.to_string()).into());
        }
        let stored = transfer.clone().with_version(transfer.version() + 1);
        storage.insert(id.to_string(), stored.clone());
        Ok(Some(stored))
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        self.check_should_fail()?;
        if self.undeletable.lock().unwrap().contains(id) {
            return Ok(false);
        }
        Ok(self.storage.lock().unwrap().remove(id).is_some())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<Vec<String>, AppError> {
        self.check_should_fail()?;
        let undeletable = self.undeletable.lock().unwrap();
        let mut storage = self.storage.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| !undeletable.contains(*id))
            .filter(|id| storage.remove(*id).is_some())
            .cloned()
            .collect())
    }
}

/// In-memory append-only audit store
pub struct InMemoryAuditLogStore {
    entries: Arc<Mutex<Vec<AuditLogEntry>>>,
    next_id: AtomicU64,
    failure: FailureSwitch,
}

impl InMemoryAuditLogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            failure: FailureSwitch::from_config(config),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_failing(&self, failing: bool) {
        self.failure.set(failing);
    }

    /// All entries in insertion order
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Actions recorded for one transfer, in order
    pub fn actions_for(&self, transfer_id: &str) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.transfer_id == transfer_id)
            .map(|e| e.action.clone())
            .collect()
    }
}

impl Default for InMemoryAuditLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLogStore for InMemoryAuditLogStore {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry, AppError> {
        if let Some(msg) = self.failure.message() {
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        let entry = entry.into_entry(id);
        self.entries.lock().unwrap().push(entry.clone());
        Ok(entry)
    }

    async fn list_for_transfer(&self, transfer_id: &str) -> Result<Vec<AuditLogEntry>, AppError> {
        if let Some(msg) = self.failure.message() {
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.transfer_id == transfer_id)
            .cloned()
            .collect())
    }
}

/// Job queue that records enqueued jobs instead of running them.
///
/// Tests deliver recorded jobs explicitly with [`RecordingJobQueue::deliver_all`].
pub struct RecordingJobQueue {
    jobs: Arc<Mutex<Vec<Job>>>,
    handlers: Mutex<HashMap<String, Arc<dyn JobHandler>>>,
    next_id: AtomicU64,
    failure: FailureSwitch,
}

impl RecordingJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            failure: FailureSwitch::from_config(config),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_failing(&self, failing: bool) {
        self.failure.set(failing);
    }

    /// Jobs recorded for a queue, oldest first
    pub fn enqueued(&self, queue: &str) -> Vec<Job> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.queue == queue)
            .cloned()
            .collect()
    }

    pub fn has_handler(&self, queue: &str) -> bool {
        self.handlers.lock().unwrap().contains_key(queue)
    }

    /// Remove the recorded jobs of a queue and run each once through its
    /// registered handler.
    pub async fn deliver_all(&self, queue: &str) -> Vec<Result<(), AppError>> {
        let handler = self.handlers.lock().unwrap().get(queue).cloned();
        let jobs: Vec<Job> = {
            let mut all = self.jobs.lock().unwrap();
            let (selected, rest) = all.drain(..).partition(|j| j.queue == queue);
            *all = rest;
            selected
        };

        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = match &handler {
                Some(handler) => handler.handle(&job).await,
                None => Err(QueueError::UnknownQueue(queue.to_string()).into()),
            };
            results.push(result);
        }
        results
    }
}

impl Default for RecordingJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for RecordingJobQueue {
    async fn enqueue(&self, queue: &str, payload: Value, options: JobOptions) -> Result<String, AppError> {
        if self.failure.message().is_some() {
            return Err(AppError::Queue(QueueError::Closed));
        }
        let id = format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.jobs.lock().unwrap().push(Job {
            id: id.clone(),
            queue: queue.to_string(),
            payload,
            attempt: 1,
            options,
        });
        Ok(id)
    }

    fn on_job(&self, queue: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.lock().unwrap().insert(queue.to_string(), handler);
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, AppError> {
        Ok(QueueStats {
            waiting: self.enqueued(queue).len() as u64,
            ..QueueStats::default()
        })
    }
}

/// Manually driven clock
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Deterministic randomness: scripted outcomes, zero delays, predictable suffixes
pub struct ScriptedRandom {
    outcomes: Mutex<VecDeque<bool>>,
    default_outcome: bool,
    suffixes: Mutex<VecDeque<String>>,
    counter: AtomicU64,
}

impl ScriptedRandom {
    #[must_use]
    pub fn always_succeed() -> Self {
        Self::with_default(true)
    }

    #[must_use]
    pub fn always_fail() -> Self {
        Self::with_default(false)
    }

    fn with_default(default_outcome: bool) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            default_outcome,
            suffixes: Mutex::new(VecDeque::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Outcomes returned by the next `chance` calls, in order
    #[must_use]
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = bool>) -> Self {
        self.outcomes.lock().unwrap().extend(outcomes);
        self
    }

    /// Strings returned by the next `alphanumeric` calls, in order
    #[must_use]
    pub fn with_suffixes<S: Into<String>>(self, suffixes: impl IntoIterator<Item = S>) -> Self {
        self.suffixes
            .lock()
            .unwrap()
            .extend(suffixes.into_iter().map(Into::into));
        self
    }
}

impl RandomSource for ScriptedRandom {
    fn chance(&self, _p: f64) -> bool {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_outcome)
    }

    fn duration_between(&self, min: std::time::Duration, _max: std::time::Duration) -> std::time::Duration {
        min
    }

    fn alphanumeric(&self, len: usize) -> String {
        if let Some(next) = self.suffixes.lock().unwrap().pop_front() {
            return next;
        }
        let mut n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut out = vec![SUFFIX_CHARSET[0]; len];
        for slot in out.iter_mut().rev() {
            *slot = SUFFIX_CHARSET[(n % 36) as usize];
            n /= 36;
        }
        String::from_utf8(out).unwrap()
    }
}

//! Background job orchestration.
//!
//! One job runs at a time across all classes. Batch jobs (compare, global
//! search, star batch) are refused while anything runs; per-item jobs are
//! queued per class and drained FIFO. When a job finishes its worker thread
//! starts the next queued item itself: same class first, then the first
//! non-empty queue in class order.

pub mod cancel;
pub mod progress;
pub mod tasks;

pub use cancel::CancelToken;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::canonical;
use crate::catalog::{CatalogError, RemoteCatalog};
use crate::config::DataPaths;
use crate::library::LibraryError;
use crate::scanner::ScanError;
use crate::scanner::metadata::TagReader;
use crate::store::mutation_log::MutationLog;
use crate::store::{StatusStore, StoreError};
use progress::{JobState, Progress, ProgressHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobClass {
    Compare,
    GlobalSearch,
    StarBatch,
    SingleStar,
    SingleUnstar,
    SingleSearch,
    Download,
}

impl JobClass {
    /// Class order, also the order queues are drained in.
    pub const ALL: [JobClass; 7] = [
        JobClass::Compare,
        JobClass::GlobalSearch,
        JobClass::StarBatch,
        JobClass::SingleStar,
        JobClass::SingleUnstar,
        JobClass::SingleSearch,
        JobClass::Download,
    ];

    pub fn is_batch(self) -> bool {
        matches!(self, JobClass::Compare | JobClass::GlobalSearch | JobClass::StarBatch)
    }

    pub fn label(self) -> &'static str {
        match self {
            JobClass::Compare => "compare",
            JobClass::GlobalSearch => "global search",
            JobClass::StarBatch => "star batch",
            JobClass::SingleStar => "star",
            JobClass::SingleUnstar => "unstar",
            JobClass::SingleSearch => "search",
            JobClass::Download => "download",
        }
    }
}

impl fmt::Display for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("A {0} job is already running")]
    AlreadyRunning(JobClass),
    #[error("{0} is not a queued job class")]
    NotQueued(JobClass),
    #[error("No music folders configured")]
    NoMusicDirs,
    #[error("Not in catalog: {0}")]
    NotInCatalog(String),
    #[error("Cancelled")]
    Cancelled,
    #[error("Job panicked: {0}")]
    Panicked(String),
    #[error("Failed to start worker thread: {0}")]
    Spawn(std::io::Error),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}

impl JobError {
    fn is_fatal_catalog(&self) -> bool {
        matches!(self, JobError::Catalog(e) if e.is_fatal())
    }
}

/// One queued per-item request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobQueueEntry {
    pub key: String,
    pub artist: String,
    pub title: String,
    pub track_url: Option<String>,
}

impl JobQueueEntry {
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            key: canonical::status_key(artist, title),
            artist: artist.trim().to_string(),
            title: title.trim().to_string(),
            track_url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.track_url = Some(url.into());
        self
    }
}

/// Everything a job needs, passed explicitly.
pub struct JobContext {
    pub store: Arc<StatusStore>,
    pub catalog: Arc<dyn RemoteCatalog>,
    pub mutations: Arc<MutationLog>,
    pub tags: Arc<dyn TagReader>,
    pub paths: DataPaths,
    pub music_dirs: Vec<PathBuf>,
    pub download_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub(crate) enum Work {
    Compare { rescan: bool },
    GlobalSearch,
    StarBatch,
    Item(JobClass, JobQueueEntry),
}

impl Work {
    fn class(&self) -> JobClass {
        match self {
            Work::Compare { .. } => JobClass::Compare,
            Work::GlobalSearch => JobClass::GlobalSearch,
            Work::StarBatch => JobClass::StarBatch,
            Work::Item(class, _) => *class,
        }
    }

    fn key(&self) -> String {
        match self {
            Work::Item(_, entry) => entry.key.clone(),
            other => other.class().label().to_string(),
        }
    }
}

struct Inner {
    running: Option<JobClass>,
    queues: HashMap<JobClass, VecDeque<JobQueueEntry>>,
    cancel: CancelToken,
}

struct Shared {
    ctx: JobContext,
    inner: Mutex<Inner>,
    idle: Condvar,
    progress: HashMap<JobClass, ProgressHandle>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn progress(&self, class: JobClass) -> ProgressHandle {
        self.progress.get(&class).cloned().unwrap_or_default()
    }
}

/// Owns the job queues, per-class progress and the shared context.
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(ctx: JobContext) -> Self {
        let progress = JobClass::ALL
            .iter()
            .map(|c| (*c, ProgressHandle::default()))
            .collect();
        Self {
            shared: Arc::new(Shared {
                ctx,
                inner: Mutex::new(Inner {
                    running: None,
                    queues: HashMap::new(),
                    cancel: CancelToken::new(),
                }),
                idle: Condvar::new(),
                progress,
            }),
        }
    }

    pub fn context(&self) -> &JobContext {
        &self.shared.ctx
    }

    pub fn start_compare(&self, rescan: bool) -> Result<(), JobError> {
        self.start_batch(Work::Compare { rescan })
    }

    pub fn start_global_search(&self) -> Result<(), JobError> {
        self.start_batch(Work::GlobalSearch)
    }

    pub fn start_star_batch(&self) -> Result<(), JobError> {
        self.start_batch(Work::StarBatch)
    }

    fn start_batch(&self, work: Work) -> Result<(), JobError> {
        let mut inner = self.shared.lock();
        if let Some(running) = inner.running {
            return Err(JobError::AlreadyRunning(running));
        }
        start_locked(&self.shared, &mut inner, work, false)
    }

    /// Queue a per-item job. Returns the number of entries ahead of it
    /// (0 = started immediately).
    pub fn enqueue(&self, class: JobClass, entry: JobQueueEntry) -> Result<usize, JobError> {
        if class.is_batch() {
            return Err(JobError::NotQueued(class));
        }
        let mut inner = self.shared.lock();
        if inner.running.is_none() {
            start_locked(&self.shared, &mut inner, Work::Item(class, entry), false)?;
            return Ok(0);
        }
        let queue = inner.queues.entry(class).or_default();
        queue.push_back(entry);
        let position = queue.len();
        log::debug!("Queued {} job, {} waiting", class, position);
        Ok(position)
    }

    /// Ask the running job to stop at its next checkpoint. Queued items
    /// still run afterwards.
    pub fn cancel(&self) {
        let inner = self.shared.lock();
        if let Some(class) = inner.running {
            log::info!("Cancelling {} job", class);
            inner.cancel.cancel();
        }
    }

    /// Drop every queued entry of `class`. Returns how many were dropped.
    pub fn clear_queue(&self, class: JobClass) -> usize {
        let mut inner = self.shared.lock();
        inner.queues.remove(&class).map(|q| q.len()).unwrap_or(0)
    }

    pub fn running(&self) -> Option<JobClass> {
        self.shared.lock().running
    }

    pub fn queue_len(&self, class: JobClass) -> usize {
        self.shared.lock().queues.get(&class).map(|q| q.len()).unwrap_or(0)
    }

    pub fn progress(&self, class: JobClass) -> Progress {
        self.shared.progress(class).snapshot()
    }

    /// Block until nothing runs or `timeout` passes. True when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();
        while inner.running.is_some() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = match self.shared.idle.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Mark `work` running and spawn its thread. Caller holds the lock.
///
/// A per-item job resets its class progress when the class was idle;
/// `chained` items (same class as the job that just finished) add to it so
/// earlier failures in the drain stay visible.
fn start_locked(shared: &Arc<Shared>, inner: &mut Inner, work: Work, chained: bool) -> Result<(), JobError> {
    let class = work.class();
    if let Work::Item(_, entry) = &work {
        let progress = shared.progress(class);
        let message = format!("{} {}", class.label(), entry.key);
        if chained {
            progress.continue_run(1, message);
        } else {
            progress.start(1, message);
        }
    }
    let cancel = CancelToken::new();
    inner.running = Some(class);
    inner.cancel = cancel.clone();

    let worker = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("job-{}", class.label().replace(' ', "-")))
        .spawn(move || run_job(worker, work, cancel));
    if let Err(e) = spawned {
        log::error!("Could not start {} job: {}", class, e);
        inner.running = None;
        shared.idle.notify_all();
        return Err(JobError::Spawn(e));
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_job(shared: Arc<Shared>, work: Work, cancel: CancelToken) {
    let class = work.class();
    let progress = shared.progress(class);
    log::info!("Starting {} job", class);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        tasks::run(&shared.ctx, &work, &cancel, &progress)
    }))
    .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload.as_ref()))));

    let fatal = match outcome {
        Ok(summary) if cancel.is_cancelled() => {
            progress.finish(JobState::Cancelled, summary);
            false
        }
        Ok(summary) => {
            log::info!("{} job done: {}", class, summary);
            progress.finish(JobState::Completed, summary);
            false
        }
        Err(JobError::Cancelled) => {
            log::info!("{} job cancelled", class);
            progress.finish(JobState::Cancelled, "Cancelled");
            false
        }
        Err(e) => {
            log::warn!("{} job failed: {}", class, e);
            progress.fail_item(&work.key(), e.to_string());
            progress.finish(JobState::Failed, e.to_string());
            e.is_fatal_catalog()
        }
    };

    finish(&shared, class, fatal, &progress);
}

/// Release the running slot and chain into the next queued item.
fn finish(shared: &Arc<Shared>, class: JobClass, fatal: bool, progress: &ProgressHandle) {
    let mut inner = shared.lock();
    inner.running = None;

    if fatal && class == JobClass::Download {
        if let Some(dropped) = inner.queues.remove(&JobClass::Download) {
            log::warn!("Dropping {} queued downloads", dropped.len());
            for entry in dropped {
                progress.fail_item(&entry.key, "dropped after fatal catalog error");
            }
        }
    }

    let mut next = inner
        .queues
        .get_mut(&class)
        .and_then(|q| q.pop_front())
        .map(|entry| (class, entry));
    if next.is_none() {
        for c in JobClass::ALL {
            if let Some(entry) = inner.queues.get_mut(&c).and_then(|q| q.pop_front()) {
                next = Some((c, entry));
                break;
            }
        }
    }

    if let Some((next_class, entry)) = next {
        let chained = next_class == class;
        if let Err(e) = start_locked(shared, &mut inner, Work::Item(next_class, entry), chained) {
            log::error!("Queue stalled: {}", e);
        }
    }
    shared.idle.notify_all();
}

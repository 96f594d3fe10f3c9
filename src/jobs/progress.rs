use std::sync::{Arc, Mutex, MutexGuard};

/// Failures kept per run; later ones are only counted.
pub const MAX_FAILURES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub key: String,
    pub reason: String,
}

/// Polled progress record for one job class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub state: JobState,
    pub total: u64,
    pub done: u64,
    pub failed: u64,
    pub current: Option<String>,
    pub message: Option<String>,
    pub failures: Vec<ItemFailure>,
}

impl Progress {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// Shared handle the running job writes and callers poll.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle(Arc<Mutex<Progress>>);

impl ProgressHandle {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn snapshot(&self) -> Progress {
        self.lock().clone()
    }

    /// Reset for a new run.
    pub fn start(&self, total: u64, message: impl Into<String>) {
        *self.lock() = Progress {
            state: JobState::Running,
            total,
            message: Some(message.into()),
            ..Progress::default()
        };
    }

    /// Keep counts and failures and add `extra` to the total. Used for a
    /// queued item chained straight after one of its own class.
    pub fn continue_run(&self, extra: u64, message: impl Into<String>) {
        let mut p = self.lock();
        p.state = JobState::Running;
        p.total += extra;
        p.message = Some(message.into());
    }

    pub fn set_total(&self, total: u64) {
        self.lock().total = total;
    }

    pub fn set_counts(&self, done: u64, total: u64) {
        let mut p = self.lock();
        p.done = done;
        p.total = total;
    }

    pub fn set_current(&self, current: impl Into<String>) {
        self.lock().current = Some(current.into());
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.lock().message = Some(message.into());
    }

    pub fn advance(&self) {
        self.lock().done += 1;
    }

    /// Count a failed item; the run continues.
    pub fn fail_item(&self, key: &str, reason: impl Into<String>) {
        let mut p = self.lock();
        p.done += 1;
        p.failed += 1;
        if p.failures.len() < MAX_FAILURES {
            p.failures.push(ItemFailure {
                key: key.to_string(),
                reason: reason.into(),
            });
        }
    }

    pub fn finish(&self, state: JobState, message: impl Into<String>) {
        let mut p = self.lock();
        p.state = state;
        p.current = None;
        p.message = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_are_bounded() {
        let progress = ProgressHandle::default();
        progress.start(100, "search");
        for i in 0..(MAX_FAILURES + 10) {
            progress.fail_item(&format!("k{i}"), "timeout");
        }
        let p = progress.snapshot();
        assert_eq!(p.failed, (MAX_FAILURES + 10) as u64);
        assert_eq!(p.failures.len(), MAX_FAILURES);
        assert_eq!(p.done, p.failed);
    }

    #[test]
    fn test_start_resets() {
        let progress = ProgressHandle::default();
        progress.start(3, "first");
        progress.advance();
        progress.finish(JobState::Completed, "done");
        assert!(progress.snapshot().is_finished());

        progress.start(5, "second");
        let p = progress.snapshot();
        assert_eq!(p.state, JobState::Running);
        assert_eq!(p.done, 0);
        assert_eq!(p.total, 5);
    }

    #[test]
    fn test_continue_run_keeps_failures() {
        let progress = ProgressHandle::default();
        progress.start(1, "unstar A");
        progress.fail_item("A", "not in catalog");
        progress.finish(JobState::Failed, "not in catalog");

        progress.continue_run(1, "unstar B");
        progress.advance();
        let p = progress.snapshot();
        assert_eq!(p.state, JobState::Running);
        assert_eq!((p.done, p.total, p.failed), (2, 2, 1));
        assert_eq!(p.failures[0].key, "A");
    }
}

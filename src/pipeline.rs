//! Upload pipeline - bounded-concurrency task execution with retry
//!
//! A fixed pool of worker threads pulls tasks from a shared queue and
//! executes them against the remote service. Transient failures are
//! retried with exponential backoff; permanent failures are recorded
//! without affecting sibling tasks. Results flow back to the caller's
//! thread, which aggregates totals and notifies observers one completion
//! at a time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::{MAX_PARALLEL_UPLOADS, MIN_PARALLEL_UPLOADS};
use crate::error::{TaskError, TaskErrorKind, UploadError};
use crate::models::{Decision, RemoteItem, TaskOutcome, UploadResult, UploadTask};
use crate::progress::{ProgressObserver, RunTotals};
use crate::reconciler::RemoteIndex;
use crate::remote::RemoteLibrary;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per task, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay scheduled after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }
}

/// Clock seam so retry delays are injectable in tests
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real clock: blocks the worker thread
#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Per-task retry state machine.
///
/// Pending → Attempting → Succeeded
///                      → RetryScheduled → Attempting
///                      → FailedPermanent
#[derive(Debug)]
enum TaskState {
    Pending,
    Attempting { attempt: u32 },
    RetryScheduled { attempt: u32, delay: Duration },
    Succeeded { remote_id: String },
    FailedPermanent { error: TaskError },
}

/// Drive one task through the retry state machine.
///
/// Attempts for the same task are strictly sequential. A cancellation
/// observed between attempts stops further retries; the attempt already
/// in flight runs to completion or error.
fn execute_with_retry(
    remote: &dyn RemoteLibrary,
    task: &UploadTask,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &AtomicBool,
) -> (TaskOutcome, u32) {
    let mut attempts = 0;
    let mut state = TaskState::Pending;
    loop {
        state = match state {
            TaskState::Pending => TaskState::Attempting { attempt: 1 },
            TaskState::Attempting { attempt } => {
                attempts = attempt;
                match remote.upload(&task.file) {
                    Ok(remote_id) => TaskState::Succeeded { remote_id },
                    Err(error) => {
                        let may_retry = error.is_transient()
                            && attempt < policy.max_attempts
                            && !cancel.load(Ordering::SeqCst);
                        if may_retry {
                            let delay = policy.delay_for(attempt);
                            log::warn!(
                                "upload of {} failed (attempt {}/{}): {}; retrying in {:?}",
                                task.file.path.display(),
                                attempt,
                                policy.max_attempts,
                                error.message,
                                delay
                            );
                            TaskState::RetryScheduled { attempt, delay }
                        } else {
                            TaskState::FailedPermanent {
                                error: error.demoted(),
                            }
                        }
                    }
                }
            }
            TaskState::RetryScheduled { attempt, delay } => {
                sleeper.sleep(delay);
                TaskState::Attempting {
                    attempt: attempt + 1,
                }
            }
            TaskState::Succeeded { remote_id } => {
                return (TaskOutcome::Uploaded { remote_id }, attempts);
            }
            TaskState::FailedPermanent { error } => {
                return (TaskOutcome::Failed(error), attempts);
            }
        };
    }
}

/// Execute one task: resolve skips against the index, upload otherwise,
/// and register successful uploads back into the index.
fn run_task(
    remote: &dyn RemoteLibrary,
    index: &RemoteIndex,
    task: UploadTask,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &AtomicBool,
    reupload: bool,
) -> UploadResult {
    match task.decision.clone() {
        Decision::Skip { existing } => {
            let remote_id =
                existing.or_else(|| index.get(&task.file.fingerprint).map(|item| item.id));
            UploadResult {
                task,
                outcome: TaskOutcome::Skipped { remote_id },
                attempts: 0,
            }
        }
        Decision::Upload => {
            if !reupload {
                // A sibling worker may have landed this content already
                if let Some(item) = index.get(&task.file.fingerprint) {
                    return UploadResult {
                        task,
                        outcome: TaskOutcome::Skipped {
                            remote_id: Some(item.id),
                        },
                        attempts: 0,
                    };
                }
            }
            let (outcome, attempts) = execute_with_retry(remote, &task, policy, sleeper, cancel);
            if let TaskOutcome::Uploaded { remote_id } = &outcome {
                index.insert(RemoteItem {
                    id: remote_id.clone(),
                    fingerprint: task.file.fingerprint.clone(),
                    name: task.file.name.clone(),
                });
            }
            UploadResult {
                task,
                outcome,
                attempts,
            }
        }
    }
}

/// Bounded-concurrency upload executor
pub struct UploadPipeline {
    remote: Arc<dyn RemoteLibrary>,
    index: Arc<RemoteIndex>,
    concurrency: usize,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    cancel: Arc<AtomicBool>,
    reupload: bool,
    observers: Vec<Box<dyn ProgressObserver>>,
}

impl UploadPipeline {
    /// Create a pipeline with `concurrency` workers (clamped to [1, 6])
    pub fn new(remote: Arc<dyn RemoteLibrary>, index: Arc<RemoteIndex>, concurrency: usize) -> Self {
        Self {
            remote,
            index,
            concurrency: concurrency.clamp(MIN_PARALLEL_UPLOADS, MAX_PARALLEL_UPLOADS),
            policy: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
            cancel: Arc::new(AtomicBool::new(false)),
            reupload: false,
            observers: Vec::new(),
        }
    }

    /// Override the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Inject a clock (tests use a recording fake)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Mirror the run's forced-reupload mode; disables the pre-dispatch
    /// index short-circuit
    pub fn with_reupload(mut self, reupload: bool) -> Self {
        self.reupload = reupload;
        self
    }

    /// Attach a progress observer
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    /// Cooperative cancellation handle. Setting it stops new dispatches
    /// promptly; in-flight attempts finish or fail on their own.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Execute every task and return one terminal result per dispatched
    /// task. Fails only on an authentication-class rejection; every other
    /// failure is per-task and surfaced in the result list.
    pub fn run(&mut self, tasks: Vec<UploadTask>) -> Result<Vec<UploadResult>, UploadError> {
        let total = tasks.len() as u64;
        let concurrency = self.concurrency;
        let observers = &mut self.observers;
        let remote: &dyn RemoteLibrary = self.remote.as_ref();
        let index: &RemoteIndex = self.index.as_ref();
        let sleeper: &dyn Sleeper = self.sleeper.as_ref();
        let policy = &self.policy;
        let cancel: &AtomicBool = self.cancel.as_ref();
        let reupload = self.reupload;

        let fatal = AtomicBool::new(false);
        let fatal = &fatal;
        let in_flight = AtomicU64::new(0);
        let in_flight = &in_flight;
        let queue = Mutex::new(VecDeque::from(tasks));
        let queue = &queue;

        let (tx, rx) = mpsc::channel::<UploadResult>();

        let results = thread::scope(|s| {
            for worker_id in 0..concurrency {
                let tx = tx.clone();
                s.spawn(move || {
                    loop {
                        if cancel.load(Ordering::SeqCst) || fatal.load(Ordering::SeqCst) {
                            break;
                        }
                        let task = match queue.lock() {
                            Ok(mut guard) => guard.pop_front(),
                            Err(poisoned) => poisoned.into_inner().pop_front(),
                        };
                        let Some(task) = task else { break };

                        in_flight.fetch_add(1, Ordering::SeqCst);
                        let result =
                            run_task(remote, index, task, policy, sleeper, cancel, reupload);
                        in_flight.fetch_sub(1, Ordering::SeqCst);

                        if let TaskOutcome::Failed(err) = &result.outcome {
                            if err.kind == TaskErrorKind::Auth {
                                fatal.store(true, Ordering::SeqCst);
                            }
                        }
                        if tx.send(result).is_err() {
                            break;
                        }
                    }
                    log::debug!("upload worker {} done", worker_id);
                });
            }
            drop(tx);

            for observer in observers.iter_mut() {
                observer.on_run_started(total);
            }
            let mut totals = RunTotals::new(total);
            let mut results = Vec::with_capacity(total as usize);
            for result in rx {
                totals.record(&result);
                totals.in_flight = in_flight.load(Ordering::SeqCst);
                for observer in observers.iter_mut() {
                    observer.on_task_completed(&result, &totals);
                }
                results.push(result);
            }
            for observer in observers.iter_mut() {
                observer.on_run_finished(&totals);
            }
            results
        });

        if fatal.load(Ordering::SeqCst) {
            let message = results
                .iter()
                .find_map(|r| match &r.outcome {
                    TaskOutcome::Failed(err) if err.kind == TaskErrorKind::Auth => {
                        Some(err.message.clone())
                    }
                    _ => None,
                })
                .unwrap_or_else(|| "session rejected".to_string());
            return Err(UploadError::Auth(message));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocalFile;
    use crate::remote::Session;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;

    /// Scripted in-memory remote for pipeline tests
    #[derive(Default)]
    struct MockRemote {
        items: Mutex<HashMap<String, RemoteItem>>,
        /// Errors to return per path, consumed front to back
        scripted: Mutex<HashMap<String, VecDeque<TaskError>>>,
        uploads: Mutex<Vec<String>>,
        next_id: AtomicU64,
        in_flight: AtomicU64,
        max_in_flight: AtomicU64,
        upload_delay: Option<Duration>,
        /// Flag to raise after the first successful upload (cancel tests)
        raise_after_upload: Option<Arc<AtomicBool>>,
    }

    impl MockRemote {
        fn script_failures(&self, path: &str, errors: Vec<TaskError>) {
            self.scripted
                .lock()
                .unwrap()
                .insert(path.to_string(), errors.into());
        }

        fn uploaded_paths(&self) -> Vec<String> {
            self.uploads.lock().unwrap().clone()
        }
    }

    impl RemoteLibrary for MockRemote {
        fn authenticate(&self) -> Result<Session, UploadError> {
            Ok(Session {
                user_id: "u".into(),
                token: "t".into(),
            })
        }

        fn supported_extensions(&self) -> Result<HashSet<String>, UploadError> {
            Ok(HashSet::new())
        }

        fn list_items(&self) -> Result<Vec<RemoteItem>, UploadError> {
            Ok(self.items.lock().unwrap().values().cloned().collect())
        }

        fn upload(&self, file: &LocalFile) -> Result<String, TaskError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if let Some(delay) = self.upload_delay {
                thread::sleep(delay);
            }

            let scripted = self
                .scripted
                .lock()
                .unwrap()
                .get_mut(&file.path.to_string_lossy().to_string())
                .and_then(|q| q.pop_front());
            let result = match scripted {
                Some(err) => Err(err),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                    self.uploads
                        .lock()
                        .unwrap()
                        .push(file.path.to_string_lossy().to_string());
                    self.items.lock().unwrap().insert(
                        file.fingerprint.clone(),
                        RemoteItem {
                            id: id.to_string(),
                            fingerprint: file.fingerprint.clone(),
                            name: file.name.clone(),
                        },
                    );
                    if let Some(flag) = &self.raise_after_upload {
                        flag.store(true, Ordering::SeqCst);
                    }
                    Ok(id.to_string())
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        fn add_tag(&self, _remote_id: &str, _tag: &str) -> Result<(), TaskError> {
            Ok(())
        }

        fn add_to_playlist(&self, _remote_id: &str, _playlist: &str) -> Result<(), TaskError> {
            Ok(())
        }
    }

    /// Records requested delays instead of sleeping
    #[derive(Default)]
    struct FakeSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for FakeSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn upload_task(path: &str, fingerprint: &str) -> UploadTask {
        UploadTask {
            file: LocalFile::new(PathBuf::from(path), 8, 0, fingerprint.into(), false),
            decision: Decision::Upload,
        }
    }

    fn skip_task(path: &str, fingerprint: &str, existing: Option<&str>) -> UploadTask {
        UploadTask {
            file: LocalFile::new(PathBuf::from(path), 8, 0, fingerprint.into(), false),
            decision: Decision::Skip {
                existing: existing.map(String::from),
            },
        }
    }

    fn pipeline(remote: Arc<MockRemote>, concurrency: usize) -> UploadPipeline {
        UploadPipeline::new(remote, Arc::new(RemoteIndex::default()), concurrency)
            .with_sleeper(Arc::new(FakeSleeper::default()))
    }

    #[test]
    fn test_uploads_and_skips_resolve() {
        let remote = Arc::new(MockRemote::default());
        let mut pipe = pipeline(Arc::clone(&remote), 1);
        let results = pipe
            .run(vec![
                upload_task("/m/a.mp3", "x"),
                skip_task("/m/b.mp3", "x", None),
            ])
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(remote.uploaded_paths(), vec!["/m/a.mp3"]);
        // The in-run duplicate resolves to the id the first upload created
        let skip = results
            .iter()
            .find(|r| r.task.file.path.ends_with("b.mp3"))
            .unwrap();
        assert_eq!(skip.remote_id(), Some("1"));
        assert_eq!(skip.attempts, 0);
    }

    #[test]
    fn test_pre_dispatch_guard_prevents_second_upload() {
        // Two Upload tasks for identical content; worker-side index check
        // must collapse the second into a skip.
        let remote = Arc::new(MockRemote::default());
        let mut pipe = pipeline(Arc::clone(&remote), 1);
        let results = pipe
            .run(vec![
                upload_task("/m/a.mp3", "x"),
                upload_task("/m/b.mp3", "x"),
            ])
            .unwrap();

        assert_eq!(remote.uploaded_paths().len(), 1);
        let outcomes: Vec<bool> = results
            .iter()
            .map(|r| matches!(r.outcome, TaskOutcome::Uploaded { .. }))
            .collect();
        assert_eq!(outcomes.iter().filter(|&&u| u).count(), 1);
    }

    #[test]
    fn test_concurrency_bound_respected() {
        let remote = Arc::new(MockRemote {
            upload_delay: Some(Duration::from_millis(15)),
            ..Default::default()
        });
        let tasks: Vec<_> = (0..12)
            .map(|i| upload_task(&format!("/m/{}.mp3", i), &format!("fp{}", i)))
            .collect();

        let mut pipe = pipeline(Arc::clone(&remote), 3);
        let results = pipe.run(tasks).unwrap();

        assert_eq!(results.len(), 12);
        assert!(remote.max_in_flight.load(Ordering::SeqCst) <= 3);
        // Ensure the pool was actually used, not serialized
        assert!(remote.max_in_flight.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_failure_isolation() {
        let remote = Arc::new(MockRemote::default());
        remote.script_failures(
            "/m/bad.mp3",
            vec![TaskError::permanent(None, "validation rejected")],
        );
        let tasks = vec![
            upload_task("/m/a.mp3", "a"),
            upload_task("/m/bad.mp3", "b"),
            upload_task("/m/c.mp3", "c"),
        ];

        let mut pipe = pipeline(Arc::clone(&remote), 2);
        let results = pipe.run(tasks).unwrap();

        let failed: Vec<_> = results.iter().filter(|r| r.is_failure()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].task.file.path.ends_with("bad.mp3"));
        assert_eq!(results.iter().filter(|r| !r.is_failure()).count(), 2);
    }

    #[test]
    fn test_transient_errors_retry_with_backoff() {
        let remote = Arc::new(MockRemote::default());
        remote.script_failures(
            "/m/a.mp3",
            vec![
                TaskError::transient(None, "503"),
                TaskError::transient(None, "timeout"),
            ],
        );
        let sleeper = Arc::new(FakeSleeper::default());
        let mut pipe = UploadPipeline::new(remote.clone(), Arc::new(RemoteIndex::default()), 1)
            .with_sleeper(sleeper.clone());

        let results = pipe.run(vec![upload_task("/m/a.mp3", "x")]).unwrap();
        assert!(matches!(
            results[0].outcome,
            TaskOutcome::Uploaded { .. }
        ));
        assert_eq!(results[0].attempts, 3);
        // Exponential backoff: 1s then 2s
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_exhausted_retries_demote_to_permanent() {
        let remote = Arc::new(MockRemote::default());
        remote.script_failures(
            "/m/a.mp3",
            (0..10)
                .map(|_| TaskError::transient(None, "flaky"))
                .collect(),
        );
        let mut pipe = pipeline(Arc::clone(&remote), 1).with_policy(RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        });

        let results = pipe.run(vec![upload_task("/m/a.mp3", "x")]).unwrap();
        assert_eq!(results[0].attempts, 3);
        match &results[0].outcome {
            TaskOutcome::Failed(err) => assert_eq!(err.kind, TaskErrorKind::Permanent),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_auth_failure_is_fatal() {
        let remote = Arc::new(MockRemote::default());
        remote.script_failures("/m/a.mp3", vec![TaskError::auth("session expired")]);
        let mut pipe = pipeline(Arc::clone(&remote), 1);

        let err = pipe
            .run(vec![
                upload_task("/m/a.mp3", "x"),
                upload_task("/m/b.mp3", "y"),
            ])
            .unwrap_err();
        assert!(matches!(err, UploadError::Auth(_)));
        // Nothing after the fatal failure was transferred
        assert!(remote.uploaded_paths().is_empty());
    }

    #[test]
    fn test_cancel_before_run_dispatches_nothing() {
        let remote = Arc::new(MockRemote::default());
        let mut pipe = pipeline(Arc::clone(&remote), 2);
        pipe.cancel_flag().store(true, Ordering::SeqCst);

        let results = pipe.run(vec![upload_task("/m/a.mp3", "x")]).unwrap();
        assert!(results.is_empty());
        assert!(remote.uploaded_paths().is_empty());
    }

    #[test]
    fn test_cancel_mid_run_stops_new_dispatches() {
        let remote = Arc::new(MockRemote::default());
        let mut pipe = pipeline(Arc::clone(&remote), 1);
        let remote = Arc::new(MockRemote {
            raise_after_upload: Some(pipe.cancel_flag()),
            ..Default::default()
        });
        pipe.remote = remote.clone();

        let tasks: Vec<_> = (0..5)
            .map(|i| upload_task(&format!("/m/{}.mp3", i), &format!("fp{}", i)))
            .collect();
        let results = pipe.run(tasks).unwrap();

        // The first upload completes, raises the flag, and the single
        // worker dispatches nothing further.
        assert_eq!(remote.uploaded_paths().len(), 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_totals_snapshots_are_consistent() {
        struct Recorder {
            snapshots: Arc<Mutex<Vec<RunTotals>>>,
        }
        impl ProgressObserver for Recorder {
            fn on_task_completed(&mut self, _result: &UploadResult, totals: &RunTotals) {
                self.snapshots.lock().unwrap().push(totals.clone());
            }
        }

        let remote = Arc::new(MockRemote::default());
        remote.script_failures("/m/b.mp3", vec![TaskError::permanent(None, "nope")]);
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let mut pipe = pipeline(Arc::clone(&remote), 2);
        pipe.add_observer(Box::new(Recorder {
            snapshots: Arc::clone(&snapshots),
        }));

        pipe.run(vec![
            upload_task("/m/a.mp3", "a"),
            upload_task("/m/b.mp3", "b"),
            skip_task("/m/c.mp3", "a", None),
        ])
        .unwrap();

        let snapshots = snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 3);
        for (i, snap) in snapshots.iter().enumerate() {
            assert_eq!(snap.completed, i as u64 + 1);
            assert_eq!(snap.uploaded + snap.skipped + snap.failed, snap.completed);
        }
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        // Capped at max_delay
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }
}

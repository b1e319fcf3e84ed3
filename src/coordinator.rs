//! Multi-job coordinator: many single-stream schedules behind one id-keyed
//! map, mutated by a single serialized writer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::clock::{Clock, SystemClock};
use crate::schedule::{chime_at_with, BoxCallback, ScheduleHandle, ScheduleOptions};
use crate::times::ToInstant;

type IdErrorHandler = Arc<dyn Fn(&str, &anyhow::Error) -> bool + Send + Sync>;
type IdHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Distinguishes a job registration from a later one under the same id, so
/// a displaced job's self-removal cannot evict its successor.
static NEXT_JOB_TOKEN: AtomicU64 = AtomicU64::new(1);

/// One named job: a callback and a deferred time sequence.
///
/// The times closure runs exactly once, when the job is scheduled.
pub struct Job<T> {
    callback: BoxCallback<T>,
    times: Box<dyn FnOnce() -> Box<dyn Iterator<Item = T> + Send> + Send>,
}

impl<T> Job<T> {
    pub fn new<F, Fut, G, I>(callback: F, times: G) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
        G: FnOnce() -> I + Send + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let mut callback = callback;
        Job {
            callback: Box::new(move |t| callback(t).boxed()),
            times: Box::new(move || Box::new(times().into_iter())),
        }
    }
}

/// Options shared by every job of a [`Coordinator`].
pub struct CoordinatorOptions {
    clock: Arc<dyn Clock>,
    drop_overruns: bool,
    error_handler: IdErrorHandler,
    on_finished: Option<IdHook>,
    on_aborted: Option<IdHook>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        CoordinatorOptions {
            clock: Arc::new(SystemClock),
            drop_overruns: false,
            error_handler: Arc::new(|id, e| {
                tracing::warn!(job = id, error = %e, "job callback failed; continuing");
                true
            }),
            on_finished: None,
            on_aborted: None,
        }
    }
}

impl CoordinatorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn drop_overruns(mut self, drop: bool) -> Self {
        self.drop_overruns = drop;
        self
    }

    /// Id-aware failure handler applied to every job.
    pub fn error_handler(
        mut self,
        f: impl Fn(&str, &anyhow::Error) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Arc::new(f);
        self
    }

    /// Runs after a job finishes and has removed itself from the map.
    pub fn on_finished(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_finished = Some(Arc::new(f));
        self
    }

    /// Runs after a job is aborted and has removed itself from the map.
    pub fn on_aborted(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_aborted = Some(Arc::new(f));
        self
    }
}

struct JobEntry<T> {
    token: u64,
    handle: ScheduleHandle<T>,
}

type JobMap<T> = Arc<RwLock<HashMap<String, JobEntry<T>>>>;

enum Mutation<T> {
    Register {
        id: String,
        token: u64,
        handle: ScheduleHandle<T>,
    },
    /// Self-removal on a job's terminal edge; only evicts the matching
    /// registration.
    Remove { id: String, token: u64 },
    /// `ids: None` targets every job.
    Shutdown { ids: Option<Vec<String>>, hard: bool },
}

/// Id-keyed front-end over many schedules.
///
/// All map mutations are applied in submission order by a single writer
/// task; queries read a coherent snapshot. Mutations are asynchronous:
/// a query issued immediately after `schedule` may not observe the new job
/// yet. Dropping every clone stops the writer but leaves live schedules
/// running; unschedule first.
pub struct Coordinator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Coordinator<T> {
    fn clone(&self) -> Self {
        Coordinator {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    jobs: JobMap<T>,
    tx: mpsc::UnboundedSender<Mutation<T>>,
    clock: Arc<dyn Clock>,
    drop_overruns: bool,
    error_handler: IdErrorHandler,
    on_finished: Option<IdHook>,
    on_aborted: Option<IdHook>,
}

impl<T> Coordinator<T>
where
    T: ToInstant + Clone + Send + 'static,
{
    /// A coordinator with default options. Spawns the writer task; must be
    /// called within a tokio runtime.
    pub fn new() -> Self {
        Self::with_options(CoordinatorOptions::default())
    }

    pub fn with_options(options: CoordinatorOptions) -> Self {
        let jobs: JobMap<T> = Arc::new(RwLock::new(HashMap::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_mutator(Arc::clone(&jobs), rx));
        Coordinator {
            inner: Arc::new(Inner {
                jobs,
                tx,
                clock: options.clock,
                drop_overruns: options.drop_overruns,
                error_handler: options.error_handler,
                on_finished: options.on_finished,
                on_aborted: options.on_aborted,
            }),
        }
    }

    /// Register named jobs and start their schedules.
    ///
    /// Each job's times closure is evaluated here, exactly once. Terminal
    /// edges remove the job from the map before the coordinator's id-aware
    /// hook runs. Scheduling onto a live id gracefully shuts down the
    /// displaced schedule.
    pub fn schedule(&self, jobs: impl IntoIterator<Item = (String, Job<T>)>) {
        for (id, job) in jobs {
            let token = NEXT_JOB_TOKEN.fetch_add(1, Ordering::Relaxed);
            let times = (job.times)();

            let options = ScheduleOptions::new()
                .clock(Arc::clone(&self.inner.clock))
                .drop_overruns(self.inner.drop_overruns)
                .error_handler({
                    let handler = Arc::clone(&self.inner.error_handler);
                    let id = id.clone();
                    move |e| handler(&id, e)
                })
                .on_finished({
                    let tx = self.inner.tx.clone();
                    let hook = self.inner.on_finished.clone();
                    let id = id.clone();
                    move || {
                        let _ = tx.send(Mutation::Remove {
                            id: id.clone(),
                            token,
                        });
                        if let Some(hook) = hook {
                            hook(&id);
                        }
                    }
                })
                .on_aborted({
                    let tx = self.inner.tx.clone();
                    let hook = self.inner.on_aborted.clone();
                    let id = id.clone();
                    move || {
                        let _ = tx.send(Mutation::Remove {
                            id: id.clone(),
                            token,
                        });
                        if let Some(hook) = hook {
                            hook(&id);
                        }
                    }
                });

            let handle = chime_at_with(times, job.callback, options);
            let _ = self.inner.tx.send(Mutation::Register { id, token, handle });
        }
    }

    /// Gracefully shut down and remove the given jobs; an empty list
    /// targets every job.
    pub fn unschedule(&self, ids: &[&str]) {
        let _ = self.inner.tx.send(Mutation::Shutdown {
            ids: targets(ids),
            hard: false,
        });
    }

    /// Like [`unschedule`](Coordinator::unschedule), deferred by `delay`
    /// via a one-shot chime.
    pub fn unschedule_after(&self, ids: &[&str], delay: chrono::Duration) {
        let at = self.inner.clock.now() + delay;
        let tx = self.inner.tx.clone();
        let ids = targets(ids);
        let options = ScheduleOptions::new().clock(Arc::clone(&self.inner.clock));
        let _deferred = chime_at_with(
            [at],
            move |_t: DateTime<Utc>| {
                let tx = tx.clone();
                let ids = ids.clone();
                async move {
                    let _ = tx.send(Mutation::Shutdown { ids, hard: false });
                    Ok(())
                }
            },
            options,
        );
    }

    /// Hard shutdown: running callbacks are interrupted.
    pub fn unschedule_now(&self, ids: &[&str]) {
        let _ = self.inner.tx.send(Mutation::Shutdown {
            ids: targets(ids),
            hard: true,
        });
    }

    /// Ids of currently registered jobs.
    pub fn scheduled_ids(&self) -> Vec<String> {
        self.inner.jobs.read().unwrap().keys().cloned().collect()
    }

    /// Instant of the job's next firing, or `None` when the job is unknown
    /// or its current task is past or cancelled.
    pub fn upcoming_chime_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .jobs
            .read()
            .unwrap()
            .get(id)
            .and_then(|entry| entry.handle.current_at())
    }

    /// Upcoming firing per job, jobs without one omitted.
    pub fn upcoming_chimes(&self) -> HashMap<String, DateTime<Utc>> {
        self.inner
            .jobs
            .read()
            .unwrap()
            .iter()
            .filter_map(|(id, entry)| entry.handle.current_at().map(|at| (id.clone(), at)))
            .collect()
    }

    /// Duration from now to the earliest upcoming chime across all jobs.
    pub fn until_next_chime(&self) -> Option<chrono::Duration> {
        let earliest = self
            .inner
            .jobs
            .read()
            .unwrap()
            .values()
            .filter_map(|entry| entry.handle.current_at())
            .min()?;
        Some(earliest - self.inner.clock.now())
    }
}

fn targets(ids: &[&str]) -> Option<Vec<String>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.iter().map(|id| id.to_string()).collect())
    }
}

async fn run_mutator<T>(jobs: JobMap<T>, mut rx: mpsc::UnboundedReceiver<Mutation<T>>) {
    while let Some(mutation) = rx.recv().await {
        apply(&jobs, mutation);
    }
}

fn apply<T>(jobs: &JobMap<T>, mutation: Mutation<T>) {
    match mutation {
        Mutation::Register { id, token, handle } => {
            let displaced = jobs
                .write()
                .unwrap()
                .insert(id.clone(), JobEntry { token, handle });
            if let Some(old) = displaced {
                tracing::debug!(job = %id, "displacing existing job");
                old.handle.close();
            }
        }
        Mutation::Remove { id, token } => {
            let mut map = jobs.write().unwrap();
            if map.get(&id).is_some_and(|entry| entry.token == token) {
                map.remove(&id);
            }
        }
        Mutation::Shutdown { ids, hard } => {
            let mut map = jobs.write().unwrap();
            let ids = ids.unwrap_or_else(|| map.keys().cloned().collect());
            for id in ids {
                if let Some(entry) = map.remove(&id) {
                    if hard {
                        entry.handle.shutdown_now();
                    } else {
                        entry.handle.shutdown();
                    }
                }
            }
        }
    }
}

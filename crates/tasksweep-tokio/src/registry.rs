//! Registry of live tracked tasks.
//!
//! A task is registered when it is spawned and removed when its future is
//! dropped, which covers completion, abort, and runtime shutdown alike.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use backtrace::Backtrace;
use parking_lot::Mutex;
use tasksweep::TaskId;
use tracing::debug;

/// ID reported for code that is not running inside a tracked task.
pub const UNTRACKED_TASK_ID: TaskId = 0;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

static TASK_REGISTRY: Mutex<BTreeMap<TaskId, Arc<TaskInfo>>> = Mutex::new(BTreeMap::new());

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
}

pub(crate) struct TaskInfo {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    /// Spawn site, already rendered as dump body lines.
    pub(crate) spawn_frames: String,
    polling: AtomicBool,
}

impl TaskInfo {
    pub(crate) fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }
}

/// Removes its task from the registry on drop.
struct Registration {
    id: TaskId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if TASK_REGISTRY.lock().remove(&self.id).is_some() {
            debug!(task_id = self.id, "tracked task finished");
        }
    }
}

/// Future wrapper that marks its task as current while polling.
struct TrackedFuture<F> {
    inner: F,
    info: Arc<TaskInfo>,
    _registration: Registration,
}

impl<F: Future> Future for TrackedFuture<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // SAFETY: We're projecting through TrackedFuture to access the inner future.
        // TrackedFuture is not Unpin, but we never move out of inner.
        let this = unsafe { self.get_unchecked_mut() };
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };

        let _polling = PollingGuard::enter(&this.info);
        inner.poll(cx)
    }
}

/// Marks a task as polled and current on this thread; undone on drop, even
/// if the inner poll panics.
struct PollingGuard<'a> {
    info: &'a TaskInfo,
    previous: Option<TaskId>,
}

impl<'a> PollingGuard<'a> {
    fn enter(info: &'a TaskInfo) -> Self {
        info.polling.store(true, Ordering::Release);
        let previous = CURRENT_TASK.with(|current| current.replace(Some(info.id)));
        Self { info, previous }
    }
}

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        CURRENT_TASK.with(|current| current.set(self.previous));
        self.info.polling.store(false, Ordering::Release);
    }
}

/// Spawn a tracked task with the given name.
///
/// The task shows up in [`TokioTasks`](crate::TokioTasks) dumps from the
/// moment this returns until its future is dropped.
pub fn spawn<F>(name: impl Into<String>, future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(track(name.into(), future))
}

/// Like [`spawn`], but onto a specific runtime.
pub fn spawn_on<F>(
    handle: &tokio::runtime::Handle,
    name: impl Into<String>,
    future: F,
) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle.spawn(track(name.into(), future))
}

fn track<F: Future>(name: String, future: F) -> TrackedFuture<F> {
    let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
    let info = Arc::new(TaskInfo {
        id,
        name,
        spawn_frames: render_frames(&Backtrace::new()),
        polling: AtomicBool::new(false),
    });

    TASK_REGISTRY.lock().insert(id, Arc::clone(&info));
    debug!(task_id = id, name = %info.name, "tracked task spawned");

    TrackedFuture {
        inner: future,
        info,
        _registration: Registration { id },
    }
}

/// ID of the tracked task being polled on this thread, if any.
pub fn current_task_id() -> Option<TaskId> {
    CURRENT_TASK.with(Cell::get)
}

/// Number of tracked tasks that have not been dropped yet.
pub fn live_task_count() -> usize {
    TASK_REGISTRY.lock().len()
}

/// Clone the registry out so rendering happens outside the lock.
pub(crate) fn live_tasks() -> Vec<Arc<TaskInfo>> {
    TASK_REGISTRY.lock().values().cloned().collect()
}

pub(crate) fn lookup(id: TaskId) -> Option<Arc<TaskInfo>> {
    TASK_REGISTRY.lock().get(&id).cloned()
}

/// Frames that belong to the capture machinery rather than the spawner.
const NOISE: &[&str] = &["backtrace::", "tasksweep_tokio::"];

fn render_frames(bt: &Backtrace) -> String {
    let mut out = String::new();
    for frame in bt.frames() {
        for symbol in frame.symbols() {
            let Some(name) = symbol.name() else {
                continue;
            };
            let name = format!("{name:#}");
            if NOISE.iter().any(|noise| name.starts_with(noise)) {
                continue;
            }
            out.push_str(&frame_label(&name));
            out.push_str("(...)\n");
            if let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) {
                out.push_str(&format!("\t{}:{line}\n", file.display()));
            }
        }
    }
    out
}

/// Make `raw` safe to print as the label of a frame line: no whitespace, so
/// it can never look like a header, and no parentheses, so the argument
/// list that follows is unambiguous.
pub(crate) fn frame_label(raw: &str) -> String {
    let label: String = raw
        .chars()
        .map(|c| if c == '(' || c == ')' || c.is_whitespace() { '_' } else { c })
        .collect();
    if label.is_empty() { "unnamed".to_owned() } else { label }
}

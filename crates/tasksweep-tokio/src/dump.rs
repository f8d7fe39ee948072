use std::fmt::Write as _;

use tasksweep::Introspect;

use crate::registry::{self, TaskInfo, UNTRACKED_TASK_ID, frame_label};

/// Introspection over tasks spawned with [`spawn`](crate::spawn).
///
/// The calling context always comes first: the tracked task being polled on
/// this thread, or an untracked `task 0` record named after the thread.
/// Remaining tasks follow in spawn order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTasks;

impl TokioTasks {
    /// Render the dump text.
    pub fn render(&self, all: bool) -> String {
        let mut out = String::new();
        let current = registry::current_task_id().and_then(registry::lookup);

        match &current {
            Some(info) => write_task(&mut out, info, "running"),
            None => {
                let thread = std::thread::current();
                let label = frame_label(thread.name().unwrap_or(""));
                let _ = write!(out, "task {UNTRACKED_TASK_ID} [running]:\n{label}(...)\n");
            }
        }

        if all {
            let current_id = current.as_ref().map(|info| info.id);
            for info in registry::live_tasks() {
                if Some(info.id) == current_id {
                    continue;
                }
                let state = if info.is_polling() { "running" } else { "idle" };
                write_task(&mut out, &info, state);
            }
        }
        out
    }
}

fn write_task(out: &mut String, info: &TaskInfo, state: &str) {
    let _ = write!(
        out,
        "task {} [{state}]:\n{}(...)\n{}",
        info.id,
        frame_label(&info.name),
        info.spawn_frames
    );
}

impl Introspect for TokioTasks {
    fn fill(&self, buf: &mut [u8], all: bool) -> usize {
        let dump = self.render(all);
        let n = dump.len().min(buf.len());
        buf[..n].copy_from_slice(&dump.as_bytes()[..n]);
        n
    }
}

//! Runs build tasks, potentially in parallel.
//! Unaware of the build graph, pools, etc.; just command execution.

use crate::graph::BuildId;
use crate::process::{self, Termination};
use std::collections::HashSet;
use std::sync::mpsc;
use std::time::Instant;

/// The result of executing a build task.
pub struct TaskResult {
    pub termination: Termination,
    /// Console output.
    pub output: Vec<u8>,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.termination == Termination::Success
    }
}

pub struct FinishedTask {
    /// A (faked) "thread id", used to put different finished tasks in
    /// different tracks in a performance trace.
    pub tid: usize,
    pub buildid: BuildId,
    pub span: (Instant, Instant),
    pub result: TaskResult,
}

/// Executes ready builds; the build loop starts work through this and reaps
/// results from it.  The dry-run variant never touches the system.
pub trait CommandRunner {
    fn can_run_more(&self) -> bool;
    fn start(&mut self, id: BuildId, cmdline: String, use_console: bool);
    /// Wait for a task to complete.  May block for a long time.
    fn wait(&mut self) -> FinishedTask;
    /// Builds currently executing, for failure cleanup.
    fn active_builds(&self) -> Vec<BuildId>;
    fn abort(&mut self);
}

/// Tracks faked "thread ids" -- integers assigned to build tasks to track
/// parallelism in perf trace output.
#[derive(Default)]
struct ThreadIds {
    /// An entry is true when claimed, false or nonexistent otherwise.
    slots: Vec<bool>,
}

impl ThreadIds {
    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                let idx = self.slots.len();
                self.slots.push(true);
                idx
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

#[cfg(unix)]
fn load_average() -> Option<f64> {
    let mut avgs = [0f64; 1];
    let n = unsafe { libc::getloadavg(avgs.as_mut_ptr(), 1) };
    if n < 1 {
        return None;
    }
    Some(avgs[0])
}

#[cfg(not(unix))]
fn load_average() -> Option<f64> {
    None
}

pub struct Runner {
    finished_send: mpsc::Sender<FinishedTask>,
    finished_recv: mpsc::Receiver<FinishedTask>,
    running: HashSet<BuildId>,
    tids: ThreadIds,
    parallelism: usize,
    /// <= 0 disables the admission guard.
    max_load_average: f64,
}

impl Runner {
    pub fn new(parallelism: usize, max_load_average: f64) -> Self {
        let (tx, rx) = mpsc::channel();
        Runner {
            finished_send: tx,
            finished_recv: rx,
            running: HashSet::new(),
            tids: ThreadIds::default(),
            parallelism,
            max_load_average,
        }
    }
}

impl CommandRunner for Runner {
    fn can_run_more(&self) -> bool {
        if self.running.len() >= self.parallelism {
            return false;
        }
        // The load-average guard is admission control: it never pauses
        // work already running, only defers starting more.
        if !self.running.is_empty() && self.max_load_average > 0.0 {
            if let Some(load) = load_average() {
                if load >= self.max_load_average {
                    return false;
                }
            }
        }
        true
    }

    fn start(&mut self, id: BuildId, cmdline: String, use_console: bool) {
        let tid = self.tids.claim();
        let tx = self.finished_send.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let result = process::run_command(&cmdline, use_console)
                .map(|(termination, output)| TaskResult {
                    termination,
                    output,
                })
                .unwrap_or_else(|err| TaskResult {
                    termination: Termination::Failure,
                    output: err.to_string().into_bytes(),
                });
            let finish = Instant::now();

            let task = FinishedTask {
                tid,
                buildid: id,
                span: (start, finish),
                result,
            };
            // The send only fails if the receiver disappeared, e.g. due to
            // shutting down.
            let _ = tx.send(task);
        });
        self.running.insert(id);
    }

    fn wait(&mut self) -> FinishedTask {
        let task = self.finished_recv.recv().unwrap();
        self.tids.release(task.tid);
        self.running.remove(&task.buildid);
        task
    }

    fn active_builds(&self) -> Vec<BuildId> {
        self.running.iter().copied().collect()
    }

    fn abort(&mut self) {
        // Children received the same SIGINT we did (they share the process
        // group); nothing to kill explicitly.  Detach from any stragglers.
        self.running.clear();
    }
}

/// A runner that pretends every command succeeds instantly, for `-n`.
#[derive(Default)]
pub struct DryRunner {
    finished: std::collections::VecDeque<BuildId>,
}

impl DryRunner {
    pub fn new() -> Self {
        DryRunner::default()
    }
}

impl CommandRunner for DryRunner {
    fn can_run_more(&self) -> bool {
        true
    }

    fn start(&mut self, id: BuildId, _cmdline: String, _use_console: bool) {
        self.finished.push_back(id);
    }

    fn wait(&mut self) -> FinishedTask {
        let id = self.finished.pop_front().expect("wait without work");
        let now = Instant::now();
        FinishedTask {
            tid: 0,
            buildid: id,
            span: (now, now),
            result: TaskResult {
                termination: Termination::Success,
                output: Vec::new(),
            },
        }
    }

    fn active_builds(&self) -> Vec<BuildId> {
        Vec::new()
    }

    fn abort(&mut self) {
        self.finished.clear();
    }
}

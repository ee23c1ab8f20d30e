//! Build progress tracking and reporting, for the purpose of display to
//! the user.

use crate::graph::{BuildId, Graph};
use crate::process::Termination;
use crate::task::TaskResult;
use crate::terminal;
use anyhow::bail;
use std::collections::VecDeque;
use std::io::Write;
use std::time::{Duration, Instant};

/// Compute the message to display on the console for a given build.
pub fn build_message(graph: &Graph, id: BuildId) -> String {
    let desc = graph.get_binding(id, "description");
    if desc.is_empty() {
        graph.get_binding(id, "command")
    } else {
        desc
    }
}

/// Trait for build progress notifications.
pub trait Progress {
    /// The number of command edges the plan intends to run; may change
    /// mid-build after restat or dyndep updates.
    fn plan_has_total_edges(&mut self, total: usize);

    fn build_started(&mut self);

    fn task_started(&mut self, graph: &Graph, id: BuildId);

    fn task_finished(&mut self, graph: &Graph, id: BuildId, result: &TaskResult);

    /// Dirtiness explanations may print mid-build while dyndep files load;
    /// give them a fresh line.
    fn load_dyndeps(&mut self);

    fn build_finished(&mut self);

    /// A console-pool task owns the terminal; suspend status output.
    fn set_console_locked(&mut self, locked: bool);

    /// Log a line of output without corrupting the progress display.
    fn log(&mut self, msg: &str);
}

/// The set of placeholders understood by the progress template.
const PLACEHOLDERS: &str = "%strufocpe";

/// Check a progress template (from `$NIB_STATUS`) before the build starts;
/// an unknown placeholder is fatal.
pub fn validate_status_format(format: &str) -> anyhow::Result<()> {
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        match chars.next() {
            Some(c) if PLACEHOLDERS.contains(c) => {}
            Some(c) => bail!("unknown placeholder '%{}' in $NIB_STATUS", c),
            None => bail!("unterminated placeholder in $NIB_STATUS"),
        }
    }
    Ok(())
}

pub const DEFAULT_STATUS_FORMAT: &str = "[%f/%t] ";

/// Expands the `$NIB_STATUS` template against current counters.
struct StatusFormatter {
    format: String,
    start: Instant,
    total_edges: usize,
    started_edges: usize,
    finished_edges: usize,
    /// Finish times of the most recent tasks, for the current-rate window.
    recent_finishes: VecDeque<Instant>,
    rate_window: usize,
}

impl StatusFormatter {
    fn new(format: String, rate_window: usize) -> Self {
        let rate_window = rate_window.max(1);
        StatusFormatter {
            format,
            start: Instant::now(),
            total_edges: 0,
            started_edges: 0,
            finished_edges: 0,
            recent_finishes: VecDeque::with_capacity(rate_window),
            rate_window,
        }
    }

    fn task_finished(&mut self) {
        self.finished_edges += 1;
        if self.recent_finishes.len() == self.rate_window {
            self.recent_finishes.pop_front();
        }
        self.recent_finishes.push_back(Instant::now());
    }

    fn format(&self, finishing: bool) -> String {
        let mut out = String::new();
        let mut chars = self.format.chars();
        let elapsed = self.start.elapsed().as_secs_f64();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                Some('s') => out.push_str(&self.started_edges.to_string()),
                Some('t') => out.push_str(&self.total_edges.to_string()),
                Some('r') => {
                    let mut running = self.started_edges - self.finished_edges;
                    // Count the task that just finished as still running.
                    if finishing {
                        running += 1;
                    }
                    out.push_str(&running.to_string());
                }
                Some('u') => {
                    out.push_str(
                        &self.total_edges.saturating_sub(self.started_edges).to_string(),
                    );
                }
                Some('f') => out.push_str(&self.finished_edges.to_string()),
                Some('o') => {
                    if elapsed > 0.0 && self.finished_edges > 0 {
                        out.push_str(&format!("{:.1}", self.finished_edges as f64 / elapsed));
                    } else {
                        out.push('?');
                    }
                }
                Some('c') => {
                    let window = self.recent_finishes.len();
                    let span = self
                        .recent_finishes
                        .front()
                        .map(|t| t.elapsed().as_secs_f64())
                        .unwrap_or(0.0);
                    if window > 1 && span > 0.0 {
                        out.push_str(&format!("{:.1}", window as f64 / span));
                    } else {
                        out.push('?');
                    }
                }
                Some('p') => {
                    let percent = if self.total_edges > 0 {
                        100 * self.finished_edges / self.total_edges
                    } else {
                        0
                    };
                    out.push_str(&format!("{:3}%", percent));
                }
                Some('e') => out.push_str(&format!("{:.3}", elapsed)),
                // Rejected by validate_status_format before the build.
                _ => {}
            }
        }
        out
    }
}

/// Print the failure banner: which outputs failed, the command, and the
/// captured output.
fn print_failed(graph: &Graph, id: BuildId, output: &[u8]) {
    let outs = graph
        .build(id)
        .outs
        .iter()
        .map(|&out| graph.file(out).name.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    println!("FAILED: {}", outs);
    println!("{}", graph.get_binding(id, "command"));
    if !output.is_empty() {
        let _ = std::io::stdout().write_all(output);
    }
}

/// Progress implementation for a "dumb" console, without any overprinting.
pub struct DumbConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,
    /// Print only failures.
    quiet: bool,
    formatter: StatusFormatter,
    /// The id of the last command printed, used to avoid printing it twice
    /// when we have two updates from the same command in a row.
    last_started: Option<BuildId>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool, quiet: bool, status_format: String, rate_window: usize) -> Self {
        Self {
            verbose,
            quiet,
            formatter: StatusFormatter::new(status_format, rate_window),
            last_started: None,
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn plan_has_total_edges(&mut self, total: usize) {
        self.formatter.total_edges = total;
    }

    fn build_started(&mut self) {}

    fn task_started(&mut self, graph: &Graph, id: BuildId) {
        self.formatter.started_edges += 1;
        if self.quiet {
            return;
        }
        let msg = if self.verbose {
            graph.get_binding(id, "command")
        } else {
            build_message(graph, id)
        };
        self.log(&format!("{}{}", self.formatter.format(false), msg));
        self.last_started = Some(id);
    }

    fn task_finished(&mut self, graph: &Graph, id: BuildId, result: &TaskResult) {
        self.formatter.task_finished();
        match result.termination {
            Termination::Success => {
                if result.output.is_empty() || self.last_started == Some(id) {
                    // Output is empty, or we just printed the command;
                    // don't print it again.
                } else if !self.quiet {
                    self.log(&build_message(graph, id));
                }
                if !result.output.is_empty() {
                    let _ = std::io::stdout().write_all(&result.output);
                }
            }
            Termination::Interrupted => {
                self.log(&format!("interrupted: {}", build_message(graph, id)))
            }
            Termination::Failure => print_failed(graph, id, &result.output),
        }
    }

    fn load_dyndeps(&mut self) {}

    fn build_finished(&mut self) {}

    fn set_console_locked(&mut self, _locked: bool) {}

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Progress implementation for a "fancy" console, with an overprinted
/// status line.  Each print clears from the cursor to the end of the
/// console, prints the status, and moves the cursor back up, so any other
/// output can simply clear the status by printing over it.
pub struct FancyConsoleProgress {
    verbose: bool,
    formatter: StatusFormatter,
    /// Currently running tasks, oldest first.
    tasks: VecDeque<(BuildId, Instant, String)>,
    console_locked: bool,
    last_print: Option<Instant>,
}

/// Redraws happen at most this often, to reduce flicker from rapid tasks.
const UPDATE_INTERVAL: Duration = Duration::from_millis(50);

impl FancyConsoleProgress {
    pub fn new(verbose: bool, status_format: String, rate_window: usize) -> Self {
        Self {
            verbose,
            formatter: StatusFormatter::new(status_format, rate_window),
            tasks: VecDeque::new(),
            console_locked: false,
            last_print: None,
        }
    }

    fn clear_progress(&self) {
        // \r first: if the user hit ^C it may have printed on our line.
        print!("\r\x1b[J");
        let _ = std::io::stdout().flush();
    }

    fn maybe_print(&mut self, force: bool) {
        if self.console_locked {
            return;
        }
        if !force {
            if let Some(last) = self.last_print {
                if last.elapsed() < UPDATE_INTERVAL {
                    return;
                }
            }
        }
        self.print_progress();
    }

    fn print_progress(&mut self) {
        self.clear_progress();
        let max_cols = terminal::get_cols().unwrap_or(80);
        let mut lines = 1;
        println!(
            "{}{}/{} running",
            self.formatter.format(false),
            self.tasks.len(),
            self.formatter.total_edges
        );
        let now = Instant::now();
        let max_tasks = 4;
        for &(_, start, ref message) in self.tasks.iter().take(max_tasks) {
            let delta = now.duration_since(start).as_secs() as usize;
            println!("{}", task_message(message, delta, max_cols));
            lines += 1;
        }
        if self.tasks.len() > max_tasks {
            println!("...and {} more", self.tasks.len() - max_tasks);
            lines += 1;
        }
        // Move the cursor back up for overprinting.
        print!("\x1b[{}A", lines);
        let _ = std::io::stdout().flush();
        self.last_print = Some(Instant::now());
    }
}

impl Progress for FancyConsoleProgress {
    fn plan_has_total_edges(&mut self, total: usize) {
        self.formatter.total_edges = total;
        self.maybe_print(false);
    }

    fn build_started(&mut self) {
        self.maybe_print(true);
    }

    fn task_started(&mut self, graph: &Graph, id: BuildId) {
        self.formatter.started_edges += 1;
        if self.verbose {
            self.log(&graph.get_binding(id, "command"));
        }
        self.tasks
            .push_back((id, Instant::now(), build_message(graph, id)));
        self.maybe_print(false);
    }

    fn task_finished(&mut self, graph: &Graph, id: BuildId, result: &TaskResult) {
        self.formatter.task_finished();
        if let Some(pos) = self.tasks.iter().position(|&(tid, _, _)| tid == id) {
            self.tasks.remove(pos);
        }
        match result.termination {
            Termination::Success => {
                // Common case: print nothing.
            }
            Termination::Interrupted => {
                self.log(&format!("interrupted: {}", build_message(graph, id)))
            }
            Termination::Failure => {
                self.clear_progress();
                print_failed(graph, id, &result.output);
            }
        }
        if result.termination == Termination::Success && !result.output.is_empty() {
            self.clear_progress();
            self.log(&build_message(graph, id));
            let _ = std::io::stdout().write_all(&result.output);
        }
        self.maybe_print(true);
    }

    fn load_dyndeps(&mut self) {
        // Explanations print directly to stderr; start them on a clean line.
        self.clear_progress();
    }

    fn build_finished(&mut self) {
        self.console_locked = false;
        self.clear_progress();
    }

    fn set_console_locked(&mut self, locked: bool) {
        if locked {
            self.clear_progress();
        }
        self.console_locked = locked;
        if !locked {
            self.maybe_print(true);
        }
    }

    fn log(&mut self, msg: &str) {
        self.clear_progress();
        println!("{}", msg);
        self.maybe_print(true);
    }
}

/// Format a task's status message to optionally include how long it has
/// been running and to fit within the terminal width.
fn task_message(message: &str, seconds: usize, max_cols: usize) -> String {
    let time_note = if seconds > 2 {
        format!(" ({}s)", seconds)
    } else {
        "".into()
    };
    let mut out = message.to_owned();
    if out.len() + time_note.len() >= max_cols {
        out.truncate(max_cols - time_note.len() - 3);
        out.push_str("...");
    }
    out.push_str(&time_note);
    out
}

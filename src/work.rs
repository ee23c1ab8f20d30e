//! Build runner: the plan of builds that must run, and the loop that
//! drives them through the command runner to a fixed point.

use crate::build_log::BuildLog;
use crate::canon::canon_path;
use crate::depfile;
use crate::deps_log::DepsLog;
use crate::disk::{Disk, MTime};
use crate::dyndep::{self, DyndepFile};
use crate::flags;
use crate::graph::{BuildId, FileId, Graph, Mark};
use crate::msvc;
use crate::process::Termination;
use crate::progress::Progress;
use crate::scan::{self, ScanCtx};
use crate::scanner::Scanner;
use crate::signal;
use crate::task::{CommandRunner, DryRunner, FinishedTask, Runner, TaskResult};
use crate::trace;
use anyhow::{anyhow, bail};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::time::Instant;

pub struct Options {
    pub parallelism: usize,
    /// How many task failures to tolerate before stopping; usize::MAX means
    /// keep going as long as progress is possible.
    pub failures_allowed: usize,
    /// <= 0 disables the load-average admission guard.
    pub max_load_average: f64,
    pub dry_run: bool,
}

/// How much we want a build to run, per the plan.
///
/// ```text
/// Nothing -(dirty discovered)-> ToStart -(scheduled)-> ToFinish -(done)-> removed
/// ```
///
/// An entry at Nothing is a build we merely track because something we do
/// want depends on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Want {
    Nothing,
    ToStart,
    ToFinish,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeResult {
    Failed,
    Succeeded,
}

/// Plan tracks the wanted-build set and feeds ready builds to the loop.
#[derive(Default)]
struct Plan {
    want: HashMap<BuildId, Want>,
    ready: VecDeque<BuildId>,
    wanted_edges: usize,
    /// Total non-phony builds in the plan; shown as the status total.
    command_edges: usize,
}

impl Plan {
    fn add_target(&mut self, graph: &mut Graph, node: FileId) -> anyhow::Result<()> {
        self.add_sub_target(graph, node, None, None).map(|_| ())
    }

    fn add_sub_target(
        &mut self,
        graph: &mut Graph,
        node: FileId,
        dependent: Option<FileId>,
        mut dyndep_walk: Option<&mut BTreeSet<BuildId>>,
    ) -> anyhow::Result<bool> {
        let edge = match graph.file(node).input {
            Some(edge) => edge,
            None => {
                if graph.file(node).dirty {
                    let name = &graph.file(node).name;
                    match dependent {
                        Some(dep) => bail!(
                            "'{}', needed by '{}', missing and no known rule to make it",
                            name,
                            graph.file(dep).name
                        ),
                        None => bail!("'{}' missing and no known rule to make it", name),
                    }
                }
                return Ok(false);
            }
        };

        if graph.build(edge).outputs_ready {
            return Ok(false); // Don't need to do anything.
        }

        // Track the build even when we don't want to run it itself, so that
        // finishing it can cascade to dependents.
        let first_visit = !self.want.contains_key(&edge);
        if first_visit {
            self.want.insert(edge, Want::Nothing);
        }
        let state = self.want[&edge];

        if dyndep_walk.is_some() && state == Want::ToFinish {
            return Ok(false); // Already scheduled.
        }

        if graph.file(node).dirty && state == Want::Nothing {
            self.want.insert(edge, Want::ToStart);
            self.edge_wanted(graph, edge);
            if dyndep_walk.is_none() && graph.all_inputs_ready(edge) {
                self.schedule_work(graph, edge);
            }
        }

        if let Some(walk) = dyndep_walk.as_mut() {
            walk.insert(edge);
        }

        if !first_visit {
            return Ok(true); // Inputs already processed.
        }

        let mut i = 0;
        while i < graph.build(edge).ins.len() {
            let input = graph.build(edge).ins[i];
            self.add_sub_target(
                graph,
                input,
                Some(node),
                dyndep_walk.as_mut().map(|walk| &mut **walk),
            )?;
            i += 1;
        }
        Ok(true)
    }

    fn edge_wanted(&mut self, graph: &Graph, edge: BuildId) {
        self.wanted_edges += 1;
        if !graph.build(edge).is_phony() {
            self.command_edges += 1;
        }
    }

    fn find_work(&mut self) -> Option<BuildId> {
        self.ready.pop_front()
    }

    fn more_to_do(&self) -> bool {
        self.wanted_edges > 0 && self.command_edges > 0
    }

    fn schedule_work(&mut self, graph: &mut Graph, edge: BuildId) {
        match self.want[&edge] {
            // Already scheduled; we can get here again when a build and one
            // of its dependencies share an order-only input.
            Want::ToFinish => return,
            Want::ToStart => {}
            Want::Nothing => panic!("scheduling unwanted build"),
        }
        self.want.insert(edge, Want::ToFinish);

        let pool = graph.build(edge).pool;
        let weight = graph.build(edge).weight;
        if graph.pool(pool).should_delay() {
            graph.pool_mut(pool).delay_edge(edge, weight);
            graph.pool_mut(pool).retrieve_ready_edges(&mut self.ready);
        } else {
            graph.pool_mut(pool).edge_scheduled(weight);
            self.ready.push_back(edge);
        }
    }

    /// A build completed (or was found not to need running).  On success,
    /// propagate readiness to dependents.  Nodes whose dyndep files became
    /// loadable are pushed to `dyndeps` for the caller to process.
    fn edge_finished(
        &mut self,
        graph: &mut Graph,
        edge: BuildId,
        result: EdgeResult,
        dyndeps: &mut Vec<FileId>,
    ) -> anyhow::Result<()> {
        let directly_wanted = self.want[&edge] != Want::Nothing;

        // See if this build frees up any delayed pool work.
        let pool = graph.build(edge).pool;
        let weight = graph.build(edge).weight;
        if directly_wanted {
            graph.pool_mut(pool).edge_finished(weight);
        }
        graph.pool_mut(pool).retrieve_ready_edges(&mut self.ready);

        // A failed build stays in want, counted as a failure.
        if result == EdgeResult::Failed {
            return Ok(());
        }

        if directly_wanted {
            self.wanted_edges -= 1;
        }
        self.want.remove(&edge);
        graph.build_mut(edge).outputs_ready = true;

        for i in 0..graph.build(edge).outs.len() {
            let out = graph.build(edge).outs[i];
            self.node_finished(graph, out, dyndeps)?;
        }
        Ok(())
    }

    fn node_finished(
        &mut self,
        graph: &mut Graph,
        node: FileId,
        dyndeps: &mut Vec<FileId>,
    ) -> anyhow::Result<()> {
        // If this node provides dyndep info, it must be loaded before its
        // consumers can be judged ready.
        if graph.file(node).dyndep_pending {
            dyndeps.push(node);
            return Ok(());
        }

        let consumers = graph.file(node).dependents.clone();
        for edge in consumers {
            if self.want.contains_key(&edge) {
                self.edge_maybe_ready(graph, edge, dyndeps)?;
            }
        }
        Ok(())
    }

    fn edge_maybe_ready(
        &mut self,
        graph: &mut Graph,
        edge: BuildId,
        dyndeps: &mut Vec<FileId>,
    ) -> anyhow::Result<()> {
        if !graph.all_inputs_ready(edge) {
            return Ok(());
        }
        if self.want[&edge] != Want::Nothing {
            self.schedule_work(graph, edge);
        } else {
            // We don't need to run this build, but a dependent may be
            // waiting on its outputs; complete it in place.
            self.edge_finished(graph, edge, EdgeResult::Succeeded, dyndeps)?;
        }
        Ok(())
    }

    /// Restat fast path: a command left `node` unchanged, so it is clean;
    /// propagate that verdict to consumers whose remaining inputs are clean,
    /// dropping them from the plan when their outputs check out.
    fn clean_node(
        &mut self,
        ctx: &ScanCtx,
        graph: &mut Graph,
        node: FileId,
    ) -> anyhow::Result<()> {
        graph.file_mut(node).dirty = false;

        let consumers = graph.file(node).dependents.clone();
        for edge in consumers {
            match self.want.get(&edge).copied() {
                None | Some(Want::Nothing) => continue,
                Some(_) => {}
            }
            // Don't attempt to clean a build that failed to load deps.
            if graph.build(edge).deps_missing {
                continue;
            }

            let depend_ins = graph.build(edge).depend_ins().to_vec();
            if depend_ins.iter().any(|&input| graph.file(input).dirty) {
                continue;
            }
            let most_recent_input = depend_ins
                .iter()
                .copied()
                .max_by_key(|&input| graph.file(input).mtime.unwrap_or(MTime::Missing));

            if scan::recompute_outputs_dirty(ctx, graph, edge, most_recent_input)? {
                continue;
            }
            for i in 0..graph.build(edge).outs.len() {
                let out = graph.build(edge).outs[i];
                self.clean_node(ctx, graph, out)?;
            }
            self.want.insert(edge, Want::Nothing);
            self.wanted_edges -= 1;
            if !graph.build(edge).is_phony() {
                self.command_edges -= 1;
            }
        }
        Ok(())
    }

    /// A dyndep file has been loaded mid-build: refresh the dirty state of
    /// everything downstream and pull newly-reachable work into the plan.
    fn dyndeps_loaded(
        &mut self,
        ctx: &ScanCtx,
        graph: &mut Graph,
        node: FileId,
        ddf: &DyndepFile,
        dyndeps: &mut Vec<FileId>,
    ) -> anyhow::Result<()> {
        self.refresh_dyndep_dependents(ctx, graph, node)?;

        // Walk the dyndep-discovered portion of the graph rooted at builds
        // already in the plan, collecting everything touched.
        let mut roots: Vec<BuildId> = ddf
            .keys()
            .copied()
            .filter(|&edge| {
                !graph.build(edge).outputs_ready && self.want.contains_key(&edge)
            })
            .collect();
        roots.sort();

        let mut walk = BTreeSet::new();
        for root in roots {
            let dependent = graph.build(root).outs[0];
            for input in ddf[&root].implicit_ins.clone() {
                self.add_sub_target(graph, input, Some(dependent), Some(&mut walk))?;
            }
        }

        // Plus the dyndep node's own consumers, just as node_finished would
        // have visited without the dyndep path.
        for edge in graph.file(node).dependents.clone() {
            if self.want.contains_key(&edge) {
                walk.insert(edge);
            }
        }

        for edge in walk {
            if self.want.contains_key(&edge) {
                self.edge_maybe_ready(graph, edge, dyndeps)?;
            }
        }
        Ok(())
    }

    fn refresh_dyndep_dependents(
        &mut self,
        ctx: &ScanCtx,
        graph: &mut Graph,
        node: FileId,
    ) -> anyhow::Result<()> {
        // Collect the transitive closure of dependents, clearing their scan
        // marks so dirtiness can be recomputed from scratch.
        let mut dependents = BTreeSet::new();
        self.unmark_dependents(graph, node, &mut dependents);

        for &dependent in &dependents {
            scan::recompute_dirty(ctx, graph, dependent)?;
            if !graph.file(dependent).dirty {
                continue;
            }
            // With dyndep information the output is now known to be dirty;
            // promote the build from merely-tracked to wanted.
            let edge = graph
                .file(dependent)
                .input
                .expect("dependent file must have a producer");
            debug_assert!(!graph.build(edge).outputs_ready);
            let state = *self
                .want
                .get(&edge)
                .expect("dependent build must already be in the plan");
            if state == Want::Nothing {
                self.want.insert(edge, Want::ToStart);
                self.edge_wanted(graph, edge);
            }
        }
        Ok(())
    }

    fn unmark_dependents(
        &self,
        graph: &mut Graph,
        node: FileId,
        dependents: &mut BTreeSet<FileId>,
    ) {
        for edge in graph.file(node).dependents.clone() {
            if !self.want.contains_key(&edge) {
                continue;
            }
            if graph.build(edge).mark != Mark::NotVisited {
                graph.build_mut(edge).mark = Mark::NotVisited;
                for i in 0..graph.build(edge).outs.len() {
                    let out = graph.build(edge).outs[i];
                    if dependents.insert(out) {
                        self.unmark_dependents(graph, out, dependents);
                    }
                }
            }
        }
    }
}

/// Drives a build: owns the graph and logs, feeds the plan through the
/// command runner, and folds results back in.
pub struct Work<'a> {
    graph: Graph,
    plan: Plan,
    build_log: BuildLog,
    deps_log: DepsLog,
    disk: &'a dyn Disk,
    progress: &'a mut dyn Progress,
    options: &'a Options,
    runner: Box<dyn CommandRunner>,
    start_times: HashMap<BuildId, i32>,
    build_start: Instant,
}

impl<'a> Work<'a> {
    pub fn new(
        graph: Graph,
        build_log: BuildLog,
        deps_log: DepsLog,
        disk: &'a dyn Disk,
        options: &'a Options,
        progress: &'a mut dyn Progress,
    ) -> Self {
        let runner: Box<dyn CommandRunner> = if options.dry_run {
            Box::new(DryRunner::new())
        } else {
            Box::new(Runner::new(options.parallelism, options.max_load_average))
        };
        Work {
            graph,
            plan: Plan::default(),
            build_log,
            deps_log,
            disk,
            progress,
            options,
            runner,
            start_times: HashMap::new(),
            build_start: Instant::now(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<FileId> {
        let (canon, _) = canon_path(name);
        self.graph.lookup_file(&canon)
    }

    /// Scan a target and enter it into the plan.
    pub fn want_file(&mut self, id: FileId) -> anyhow::Result<()> {
        let ctx = ScanCtx {
            disk: self.disk,
            build_log: &self.build_log,
            deps_log: &self.deps_log,
        };
        scan::recompute_dirty(&ctx, &mut self.graph, id)?;
        if let Some(edge) = self.graph.file(id).input {
            if self.graph.build(edge).outputs_ready {
                return Ok(()); // Nothing to do.
            }
        }
        self.plan.add_target(&mut self.graph, id)
    }

    /// Run the plan to completion.  Ok(Some(n)) means n tasks ran; Ok(None)
    /// means some tasks failed and the failure output already told the user.
    pub fn run(&mut self) -> anyhow::Result<Option<usize>> {
        let mut pending = 0usize;
        let mut failures_allowed = self.options.failures_allowed;
        let mut tasks_ran = 0usize;

        self.progress.plan_has_total_edges(self.plan.command_edges);
        self.progress.build_started();

        while self.plan.more_to_do() {
            // First, start as many commands as the runner lets us.
            if failures_allowed > 0 && self.runner.can_run_more() {
                if let Some(edge) = self.plan.find_work() {
                    if self.graph.build(edge).is_phony() {
                        // Phony builds run no command; they finish in place.
                        if let Err(err) = self.plan_edge_finished(edge, EdgeResult::Succeeded) {
                            return self.fail(err);
                        }
                        continue;
                    }
                    if let Err(err) = self.start_edge(edge) {
                        return self.fail(err);
                    }
                    tasks_ran += 1;
                    pending += 1;
                    continue;
                }
            }

            // Second, reap a finished command.
            if pending > 0 {
                let task = self.runner.wait();
                if task.result.termination == Termination::Interrupted
                    || signal::was_interrupted()
                {
                    return self.fail(anyhow!("interrupted by user"));
                }
                pending -= 1;
                let success = task.result.success();
                if let Err(err) = self.finish_command(task) {
                    return self.fail(err);
                }
                if !success && failures_allowed > 0 {
                    failures_allowed -= 1;
                }
                continue;
            }

            // If we get here, we cannot make any more progress.
            self.progress.build_finished();
            let message = if failures_allowed == 0 {
                if self.options.failures_allowed > 1 {
                    "subcommands failed"
                } else {
                    "subcommand failed"
                }
            } else if failures_allowed < self.options.failures_allowed {
                "cannot make progress due to previous errors"
            } else {
                bail!("stuck [this is a bug]");
            };
            self.progress.log(&format!("build stopped: {}.", message));
            return Ok(None);
        }

        self.progress.build_finished();
        Ok(Some(tasks_ran))
    }

    /// Abort on a fatal error: clean up partial outputs, finalize status.
    fn fail(&mut self, err: anyhow::Error) -> anyhow::Result<Option<usize>> {
        self.cleanup();
        self.progress.build_finished();
        Err(err)
    }

    fn plan_edge_finished(&mut self, edge: BuildId, result: EdgeResult) -> anyhow::Result<()> {
        let mut dyndeps = Vec::new();
        self.plan
            .edge_finished(&mut self.graph, edge, result, &mut dyndeps)?;
        while let Some(node) = dyndeps.pop() {
            self.load_dyndeps(node, &mut dyndeps)?;
        }
        Ok(())
    }

    /// A dyndep file became buildable mid-build; load it and update the
    /// plan for whatever it revealed.
    fn load_dyndeps(&mut self, node: FileId, dyndeps: &mut Vec<FileId>) -> anyhow::Result<()> {
        self.progress.load_dyndeps();
        let ddf = dyndep::load_dyndeps(&mut self.graph, self.disk, node)?;
        let ctx = ScanCtx {
            disk: self.disk,
            build_log: &self.build_log,
            deps_log: &self.deps_log,
        };
        self.plan
            .dyndeps_loaded(&ctx, &mut self.graph, node, &ddf, dyndeps)?;
        self.progress.plan_has_total_edges(self.plan.command_edges);
        Ok(())
    }

    fn start_edge(&mut self, edge: BuildId) -> anyhow::Result<()> {
        self.progress.task_started(&self.graph, edge);
        if self.graph.build(edge).use_console() {
            self.progress.set_console_locked(true);
        }
        self.start_times
            .insert(edge, self.build_start.elapsed().as_millis() as i32);

        // Create directories necessary for outputs.
        for i in 0..self.graph.build(edge).outs.len() {
            let out = self.graph.build(edge).outs[i];
            let path = self.graph.file(out).name.clone();
            self.disk
                .make_dirs(&path)
                .map_err(|err| anyhow!("mkdir for {}: {}", path, err))?;
        }

        // Create the response file, if needed.
        let rspfile = self.graph.unescaped_binding(edge, "rspfile");
        if !rspfile.is_empty() {
            let content = self.graph.get_binding(edge, "rspfile_content");
            if !content.is_empty() {
                self.disk
                    .make_dirs(&rspfile)
                    .map_err(|err| anyhow!("mkdir for {}: {}", rspfile, err))?;
                self.disk
                    .write_file(&rspfile, &content)
                    .map_err(|err| anyhow!("write {}: {}", rspfile, err))?;
            }
        }

        let command = self.graph.evaluate_command(edge, false);
        let use_console = self.graph.build(edge).use_console();
        self.runner.start(edge, command, use_console);
        Ok(())
    }

    fn finish_command(&mut self, task: FinishedTask) -> anyhow::Result<()> {
        let edge = task.buildid;
        let mut result = task.result;

        if let Some(&out) = self.graph.build(edge).outs.first() {
            trace::write_task(&self.graph.file(out).name, task.tid, task.span.0, task.span.1);
        }

        // Extract discovered dependencies first: it filters the captured
        // output (we want /showIncludes notes stripped even on failure),
        // and extraction failure makes a successful command a failed one.
        let deps_type = self.graph.get_binding(edge, "deps");
        let mut deps_nodes = Vec::new();
        if !deps_type.is_empty() {
            match self.extract_deps(edge, &deps_type, &mut result) {
                Ok(nodes) => deps_nodes = nodes,
                Err(err) => {
                    if result.success() {
                        if !result.output.is_empty() {
                            result.output.push(b'\n');
                        }
                        result.output.extend_from_slice(err.to_string().as_bytes());
                        result.termination = Termination::Failure;
                    }
                }
            }
        }

        let start_time = self.start_times[&edge];
        let end_time = self.build_start.elapsed().as_millis() as i32;

        if self.graph.build(edge).use_console() {
            self.progress.set_console_locked(false);
        }
        self.progress.task_finished(&self.graph, edge, &result);

        if !result.success() {
            return self.plan_edge_finished(edge, EdgeResult::Failed);
        }

        // Restat the outputs.  For a restat rule whose output is unchanged,
        // propagate cleanliness through the plan, and log the newest input
        // mtime instead so the next run repeats the verdict.
        let restat = self.graph.get_binding_bool(edge, "restat");
        let mut output_mtime = MTime::Missing;
        if !self.options.dry_run {
            let mut node_cleaned = false;
            for i in 0..self.graph.build(edge).outs.len() {
                let out = self.graph.build(edge).outs[i];
                let path = self.graph.file(out).name.clone();
                let new_mtime = self.disk.stat(&path)?;
                if new_mtime > output_mtime {
                    output_mtime = new_mtime;
                }
                if restat && self.graph.file(out).mtime == Some(new_mtime) {
                    let ctx = ScanCtx {
                        disk: self.disk,
                        build_log: &self.build_log,
                        deps_log: &self.deps_log,
                    };
                    self.plan.clean_node(&ctx, &mut self.graph, out)?;
                    node_cleaned = true;
                }
            }

            if node_cleaned {
                let mut restat_mtime = MTime::Missing;
                let depend_ins = self.graph.build(edge).depend_ins().to_vec();
                for input in depend_ins {
                    let path = self.graph.file(input).name.clone();
                    let input_mtime = self.disk.stat(&path)?;
                    if input_mtime > restat_mtime {
                        restat_mtime = input_mtime;
                    }
                }
                let depfile = self.graph.unescaped_binding(edge, "depfile");
                if restat_mtime != MTime::Missing && deps_type.is_empty() && !depfile.is_empty()
                {
                    let depfile_mtime = self.disk.stat(&depfile)?;
                    if depfile_mtime > restat_mtime {
                        restat_mtime = depfile_mtime;
                    }
                }
                // The plan may have shrunk as a result of the restat.
                self.progress.plan_has_total_edges(self.plan.command_edges);
                output_mtime = restat_mtime;
            }
        }

        self.plan_edge_finished(edge, EdgeResult::Succeeded)?;

        // Delete any leftover response file.
        let rspfile = self.graph.unescaped_binding(edge, "rspfile");
        if !rspfile.is_empty() && !flags::keep_rsp() {
            let _ = self.disk.remove_file(&rspfile);
        }

        if !self.options.dry_run {
            self.build_log
                .record_command(&self.graph, edge, start_time, end_time, output_mtime)
                .map_err(|err| anyhow!("error writing to build log: {}", err))?;

            if !deps_type.is_empty() {
                for i in 0..self.graph.build(edge).outs.len() {
                    let out = self.graph.build(edge).outs[i];
                    let path = self.graph.file(out).name.clone();
                    let deps_mtime = self.disk.stat(&path)?;
                    self.deps_log
                        .record_deps(&self.graph, out, deps_mtime, &deps_nodes)
                        .map_err(|err| anyhow!("error writing to deps log: {}", err))?;
                }
            }
        }
        Ok(())
    }

    fn extract_deps(
        &mut self,
        edge: BuildId,
        deps_type: &str,
        result: &mut TaskResult,
    ) -> anyhow::Result<Vec<FileId>> {
        match deps_type {
            "msvc" => {
                let prefix = self.graph.get_binding(edge, "msvc_deps_prefix");
                let prefix = if prefix.is_empty() {
                    msvc::DEFAULT_PREFIX.to_string()
                } else {
                    prefix
                };
                let output = String::from_utf8_lossy(&result.output).into_owned();
                let parsed = msvc::parse_show_includes(&output, &prefix);
                result.output = parsed.filtered_output.into_bytes();
                Ok(parsed
                    .includes
                    .iter()
                    .map(|path| self.graph.file_id(path))
                    .collect())
            }
            "gcc" => {
                let depfile = self.graph.unescaped_binding(edge, "depfile");
                if depfile.is_empty() {
                    bail!("deps=gcc requires a depfile binding");
                }
                let mut nodes = Vec::new();
                // A missing depfile is treated as empty here; the next scan
                // will find the deps-log record empty-handed and rebuild.
                if let Some(mut content) = self
                    .disk
                    .read_file(&depfile)
                    .map_err(|err| anyhow!("loading '{}': {}", depfile, err))?
                {
                    if !content.is_empty() {
                        content.push(0);
                        let mut scanner = Scanner::new(&content);
                        let parsed = depfile::parse(&mut scanner).map_err(|err| {
                            anyhow!(scanner.format_parse_error(Path::new(&depfile), err))
                        })?;
                        let paths: Vec<String> =
                            parsed.all_deps().map(str::to_string).collect();
                        nodes = paths.iter().map(|path| self.graph.file_id(path)).collect();
                    }
                }
                if !flags::keep_depfile() {
                    self.disk
                        .remove_file(&depfile)
                        .map_err(|err| anyhow!("deleting depfile: {}", err))?;
                }
                Ok(nodes)
            }
            _ => bail!("unknown deps type '{}'", deps_type),
        }
    }

    /// On failure or interrupt, remove partial outputs of whatever was
    /// still running: an output whose mtime changed during the command is
    /// suspect, and depfile builds always get their outputs and depfile
    /// removed so a half-written depfile can't poison the next run.
    fn cleanup(&mut self) {
        let active = self.runner.active_builds();
        self.runner.abort();
        for edge in active {
            let depfile = self.graph.unescaped_binding(edge, "depfile");
            for i in 0..self.graph.build(edge).outs.len() {
                let out = self.graph.build(edge).outs[i];
                let path = self.graph.file(out).name.clone();
                match self.disk.stat(&path) {
                    Err(err) => self.progress.log(&format!("error: {}", err)),
                    Ok(new_mtime) => {
                        if !depfile.is_empty() || self.graph.file(out).mtime != Some(new_mtime)
                        {
                            let _ = self.disk.remove_file(&path);
                        }
                    }
                }
            }
            if !depfile.is_empty() {
                let _ = self.disk.remove_file(&depfile);
            }
        }
    }
}

//! The dependency scan: stamps every file reachable from a target with a
//! dirty/clean verdict and every build with whether its outputs are ready,
//! loading discovered dependencies along the way.

use crate::build_log::BuildLog;
use crate::canon::canon_path;
use crate::deps_log::DepsLog;
use crate::depfile;
use crate::disk::{Disk, MTime};
use crate::dyndep;
use crate::flags::explain;
use crate::graph::{BuildId, FileId, Graph, Mark};
use crate::hash::hash_command;
use crate::scanner::Scanner;
use anyhow::{anyhow, bail};
use std::path::Path;

/// The read-only collaborators the scan consults.
pub struct ScanCtx<'a> {
    pub disk: &'a dyn Disk,
    pub build_log: &'a BuildLog,
    pub deps_log: &'a DepsLog,
}

/// Recursively compute dirtiness for `target` and everything it depends on.
/// Errors on dependency cycles and I/O failures; scan-level problems like a
/// missing depfile just force the affected build dirty.
pub fn recompute_dirty(ctx: &ScanCtx, graph: &mut Graph, target: FileId) -> anyhow::Result<()> {
    let mut stack = Vec::new();
    recompute_node_dirty(ctx, graph, target, &mut stack)
}

fn stat(ctx: &ScanCtx, graph: &mut Graph, file: FileId) -> anyhow::Result<()> {
    let name = graph.file(file).name.clone();
    let mtime = ctx.disk.stat(&name)?;
    graph.file_mut(file).mtime = Some(mtime);
    Ok(())
}

fn recompute_node_dirty(
    ctx: &ScanCtx,
    graph: &mut Graph,
    node: FileId,
    stack: &mut Vec<FileId>,
) -> anyhow::Result<()> {
    let edge = match graph.file(node).input {
        Some(edge) => edge,
        None => {
            // Leaf node: dirty iff missing.
            if graph.file(node).status_known() {
                return Ok(());
            }
            stat(ctx, graph, node)?;
            let exists = graph.file(node).exists();
            if !exists {
                explain!("{} has no in-edge and is missing", graph.file(node).name);
            }
            graph.file_mut(node).dirty = !exists;
            return Ok(());
        }
    };

    match graph.build(edge).mark {
        Mark::Done => return Ok(()),
        Mark::InStack => return Err(cycle_error(graph, edge, node, stack)),
        Mark::NotVisited => {}
    }
    graph.build_mut(edge).mark = Mark::InStack;
    stack.push(node);

    let mut dirty = false;
    {
        let build = graph.build_mut(edge);
        build.outputs_ready = true;
        build.deps_missing = false;
    }

    if !graph.build(edge).deps_loaded {
        // First encounter with this build.  If its dyndep file is still
        // pending, visit it now; when its producer is already ready the file
        // can be loaded immediately, possibly updating other builds too.
        if let Some(dd) = graph.build(edge).dyndep {
            if graph.file(dd).dyndep_pending {
                recompute_node_dirty(ctx, graph, dd, stack)?;
                let ready = match graph.file(dd).input {
                    None => true,
                    Some(producer) => graph.build(producer).outputs_ready,
                };
                if ready {
                    dyndep::load_dyndeps(graph, ctx.disk, dd)?;
                }
            }
        }
    }

    // Load output mtimes so we can compare them to the most recent input.
    for i in 0..graph.build(edge).outs.len() {
        let out = graph.build(edge).outs[i];
        if !graph.file(out).status_known() {
            stat(ctx, graph, out)?;
        }
    }

    if !graph.build(edge).deps_loaded {
        graph.build_mut(edge).deps_loaded = true;
        if !load_deps(ctx, graph, edge)? {
            // Failed to load dependency info: rebuild to regenerate it.
            dirty = true;
            graph.build_mut(edge).deps_missing = true;
        }
    }

    // Visit all inputs; we're dirty if any of them are.  Inputs can grow
    // while we iterate, when a recursive visit loads a dyndep file that
    // feeds this build.
    let mut most_recent_input: Option<FileId> = None;
    let mut i = 0;
    while i < graph.build(edge).ins.len() {
        let input = graph.build(edge).ins[i];
        recompute_node_dirty(ctx, graph, input, stack)?;

        // If an input is not ready, neither are our outputs.
        if let Some(in_edge) = graph.file(input).input {
            if !graph.build(in_edge).outputs_ready {
                graph.build_mut(edge).outputs_ready = false;
            }
        }

        if !graph.build(edge).is_order_only(i) {
            if graph.file(input).dirty {
                explain!("{} is dirty", graph.file(input).name);
                dirty = true;
            } else {
                let mtime = graph.file(input).mtime.unwrap_or(MTime::Missing);
                let newest = most_recent_input
                    .map(|m| graph.file(m).mtime.unwrap_or(MTime::Missing));
                if newest.map_or(true, |newest| mtime > newest) {
                    most_recent_input = Some(input);
                }
            }
        }
        i += 1;
    }

    // We may also be dirty due to output state: missing or out of date
    // outputs, a changed command, an interrupted prior write.
    if !dirty {
        dirty = recompute_outputs_dirty(ctx, graph, edge, most_recent_input)?;
    }

    for i in 0..graph.build(edge).outs.len() {
        let out = graph.build(edge).outs[i];
        if dirty {
            graph.file_mut(out).dirty = true;
        }
    }

    // A dirty build's outputs are not ready, except that phony builds with
    // no inputs have nothing to do and are always ready.
    if dirty && !(graph.build(edge).is_phony() && graph.build(edge).ins.is_empty()) {
        graph.build_mut(edge).outputs_ready = false;
    }

    graph.build_mut(edge).mark = Mark::Done;
    debug_assert_eq!(stack.last(), Some(&node));
    stack.pop();
    Ok(())
}

/// Construct the error for a dependency cycle found when `node` re-entered
/// the in-stack build `edge`.
fn cycle_error(graph: &Graph, edge: BuildId, node: FileId, stack: &[FileId]) -> anyhow::Error {
    // Find where the cycle entered the stack, and report its start as the
    // node at its end rather than some other output of the starting build,
    // so that `a -> c -> a` is reported instead of `b -> c -> a`.
    let start = stack
        .iter()
        .position(|&n| graph.file(n).input == Some(edge))
        .expect("in-stack build must be on the stack");
    let mut err = "dependency cycle: ".to_string();
    err.push_str(&graph.file(node).name);
    for &n in &stack[start + 1..] {
        err.push_str(" -> ");
        err.push_str(&graph.file(n).name);
    }
    err.push_str(" -> ");
    err.push_str(&graph.file(node).name);
    if start + 1 == stack.len() && graph.build(edge).maybe_phonycycle_diagnostic() {
        // A self-referencing phony from old CMake; point at the flag that
        // rejects it at parse time.
        err.push_str(" [-w phonycycle=err]");
    }
    anyhow!("{}", err)
}

/// Decide whether the outputs of `edge` are out of date relative to
/// `most_recent_input`, the build log, and the recorded command hash.
pub fn recompute_outputs_dirty(
    ctx: &ScanCtx,
    graph: &Graph,
    edge: BuildId,
    most_recent_input: Option<FileId>,
) -> anyhow::Result<bool> {
    let command_hash = if graph.build(edge).is_phony() {
        0
    } else {
        hash_command(&graph.evaluate_command(edge, true))
    };
    for &out in &graph.build(edge).outs {
        if recompute_output_dirty(ctx, graph, edge, most_recent_input, command_hash, out) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn recompute_output_dirty(
    ctx: &ScanCtx,
    graph: &Graph,
    edge: BuildId,
    most_recent_input: Option<FileId>,
    command_hash: u64,
    out: FileId,
) -> bool {
    let build = graph.build(edge);
    if build.is_phony() {
        // Phony builds don't write output.  Outputs are only dirty if there
        // are no inputs and we're missing the output.
        if build.ins.is_empty() && !graph.file(out).exists() {
            explain!(
                "output {} of phony edge with no inputs doesn't exist",
                graph.file(out).name
            );
            return true;
        }
        return false;
    }

    if !graph.file(out).exists() {
        explain!("output {} doesn't exist", graph.file(out).name);
        return true;
    }

    let mut entry = None;

    if let Some(input) = most_recent_input {
        let input_mtime = graph.file(input).mtime.unwrap_or(MTime::Missing);
        let mut output_mtime = graph.file(out).mtime.unwrap_or(MTime::Missing);

        if output_mtime < input_mtime {
            // If this is a restat rule, we may have cleaned the output in a
            // previous run and stored the most recent input mtime in the
            // build log.  Use that mtime instead, so the output is only
            // considered dirty if an input changed since then.
            let mut used_restat = false;
            if graph.get_binding_bool(edge, "restat") {
                if let Some(log_entry) = ctx.build_log.lookup(&graph.file(out).name) {
                    output_mtime = MTime::Stamp(log_entry.mtime);
                    used_restat = true;
                    entry = Some(log_entry);
                }
            }
            if output_mtime < input_mtime {
                explain!(
                    "{}output {} older than most recent input {}",
                    if used_restat { "restat of " } else { "" },
                    graph.file(out).name,
                    graph.file(input).name
                );
                return true;
            }
        }
    }

    let generator = graph.get_binding_bool(edge, "generator");
    let entry = entry.or_else(|| ctx.build_log.lookup(&graph.file(out).name));
    match entry {
        Some(entry) => {
            if !generator && command_hash != entry.command_hash {
                // The command changing makes us dirty, unless this is a
                // generator rule.
                explain!("command line changed for {}", graph.file(out).name);
                return true;
            }
            if let Some(input) = most_recent_input {
                let input_mtime = graph.file(input).mtime.unwrap_or(MTime::Missing);
                if MTime::Stamp(entry.mtime) < input_mtime {
                    // The recorded mtime predates the most recent input.
                    // This happens when a prior run wrote the output but
                    // exited with an error or was interrupted.
                    explain!(
                        "recorded mtime of {} older than most recent input {}",
                        graph.file(out).name,
                        graph.file(input).name
                    );
                    return true;
                }
            }
        }
        None => {
            if !generator {
                explain!("command line not found in log for {}", graph.file(out).name);
                return true;
            }
        }
    }

    false
}

/// Load discovered dependencies for a build.  Ok(false) means the info
/// could not be loaded and the build must rerun to regenerate it.
fn load_deps(ctx: &ScanCtx, graph: &mut Graph, edge: BuildId) -> anyhow::Result<bool> {
    let deps_type = graph.get_binding(edge, "deps");
    if !deps_type.is_empty() {
        return load_deps_from_log(ctx, graph, edge);
    }
    let depfile = graph.unescaped_binding(edge, "depfile");
    if !depfile.is_empty() {
        return load_depfile(ctx, graph, edge, &depfile);
    }
    Ok(true)
}

fn load_deps_from_log(ctx: &ScanCtx, graph: &mut Graph, edge: BuildId) -> anyhow::Result<bool> {
    // Deps in the log are only recorded for single-output-keyed lookups.
    let output = graph.build(edge).outs[0];
    let deps = match ctx.deps_log.get_deps(output) {
        None => {
            explain!("deps for '{}' are missing", graph.file(output).name);
            return Ok(false);
        }
        Some(deps) => deps,
    };

    // Deps are invalid if the output is newer than when they were recorded.
    let output_mtime = graph.file(output).mtime.unwrap_or(MTime::Missing);
    if output_mtime > MTime::Stamp(deps.mtime) {
        explain!(
            "stored deps info out of date for '{}'",
            graph.file(output).name
        );
        return Ok(false);
    }

    let ins = deps.ins.clone();
    graph.insert_discovered_ins(edge, &ins);
    for input in ins {
        graph.create_phony_producer(input);
    }
    Ok(true)
}

fn load_depfile(
    ctx: &ScanCtx,
    graph: &mut Graph,
    edge: BuildId,
    path: &str,
) -> anyhow::Result<bool> {
    let content = ctx
        .disk
        .read_file(path)
        .map_err(|err| anyhow!("loading '{}': {}", path, err))?;
    let mut content = match content {
        Some(content) if !content.is_empty() => content,
        // Treat a missing depfile as empty: rebuild to regenerate it.
        _ => {
            explain!("depfile '{}' is missing", path);
            return Ok(false);
        }
    };
    content.push(0);
    let mut scanner = Scanner::new(&content);
    let parsed = depfile::parse(&mut scanner)
        .map_err(|err| anyhow!(scanner.format_parse_error(Path::new(path), err)))?;

    let primary = match parsed.primary_target() {
        Some(primary) => canon_path(primary).0,
        None => bail!("{}: no outputs declared", path),
    };
    // The depfile must describe our first output; a mismatch just makes the
    // build rerun rather than erroring.
    let first_out = graph.build(edge).outs[0];
    if primary != graph.file(first_out).name {
        explain!(
            "expected depfile '{}' to mention '{}', got '{}'",
            path,
            graph.file(first_out).name,
            primary
        );
        return Ok(false);
    }
    // Every other declared output must also belong to this build.
    for (target, _) in parsed.targets.iter().skip(1) {
        let target = canon_path(target).0;
        let belongs = graph
            .build(edge)
            .outs
            .iter()
            .any(|&out| graph.file(out).name == target);
        if !belongs {
            bail!(
                "{}: depfile mentions '{}' as an output, but no such output was declared",
                path,
                target
            );
        }
    }

    let dep_paths: Vec<String> = parsed.all_deps().map(str::to_string).collect();
    let mut ins = Vec::with_capacity(dep_paths.len());
    for dep in &dep_paths {
        ins.push(graph.file_id(dep));
    }
    graph.insert_discovered_ins(edge, &ins);
    for input in ins {
        graph.create_phony_producer(input);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::eval::{EvalPart, EvalString};
    use crate::graph::{Build, Rule};
    use crate::smallmap::SmallMap;

    struct Harness {
        graph: Graph,
        disk: MemDisk,
        build_log: BuildLog,
        deps_log: DepsLog,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut graph = Graph::new();
            let deps_path = dir.path().join("deps");
            let deps_log =
                crate::deps_log::open(deps_path.to_str().unwrap(), &mut graph).unwrap();
            Harness {
                graph,
                disk: MemDisk::new(),
                build_log: BuildLog::new(),
                deps_log,
                _dir: dir,
            }
        }

        fn rule(&mut self, name: &str, command: &str, extra: &[(&str, &str)]) {
            let mut bindings = SmallMap::default();
            bindings.insert(
                "command".to_string(),
                EvalString::new(vec![EvalPart::Literal(command)]).into_owned(),
            );
            for &(key, val) in extra {
                bindings.insert(
                    key.to_string(),
                    EvalString::new(vec![EvalPart::Literal(val)]).into_owned(),
                );
            }
            self.graph
                .add_rule(Rule {
                    name: name.to_string(),
                    bindings,
                })
                .unwrap();
        }

        fn build(&mut self, rule: &str, outs: &[&str], ins: &[&str]) -> BuildId {
            self.build_full(rule, outs, ins, 0, &[])
        }

        fn build_full(
            &mut self,
            rule: &str,
            outs: &[&str],
            ins: &[&str],
            order_only: usize,
            bindings: &[(&str, &str)],
        ) -> BuildId {
            let rule = self.graph.lookup_rule(rule).unwrap();
            let scope = self.graph.scopes.root();
            let mut build = Build::new(rule, scope);
            build.outs = outs.iter().map(|o| self.graph.file_id(o)).collect();
            build.ins = ins.iter().map(|i| self.graph.file_id(i)).collect();
            build.order_only_ins = order_only;
            for &(key, val) in bindings {
                build.bindings.insert(key.to_string(), val.to_string());
            }
            self.graph.add_build(build).unwrap()
        }

        fn scan(&mut self, target: &str) -> anyhow::Result<()> {
            let ctx = ScanCtx {
                disk: &self.disk,
                build_log: &self.build_log,
                deps_log: &self.deps_log,
            };
            let id = self.graph.lookup_file(target).unwrap();
            recompute_dirty(&ctx, &mut self.graph, id)
        }

        fn log_command(&mut self, target: &str, mtime: i64) {
            let out = self.graph.lookup_file(target).unwrap();
            let edge = self.graph.file(out).input.unwrap();
            record_entry(&mut self.build_log, &self.graph, edge, mtime);
        }

        fn dirty(&self, name: &str) -> bool {
            self.graph
                .file(self.graph.lookup_file(name).unwrap())
                .dirty
        }
    }

    fn record_entry(log: &mut BuildLog, graph: &Graph, edge: BuildId, mtime: i64) {
        // Feed the in-memory map only; no need for a file in scan tests.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        let path = path.to_str().unwrap();
        log.open_for_write(path, &|_| false).unwrap();
        log.record_command(graph, edge, 0, 0, MTime::Stamp(mtime))
            .unwrap();
        log.close();
    }

    #[test]
    fn missing_leaf_is_dirty() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build("cc", &["out"], &["in"]);
        h.scan("out")?;
        assert!(h.dirty("in"));
        assert!(h.dirty("out"));
        Ok(())
    }

    #[test]
    fn up_to_date_build_is_clean() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build("cc", &["out"], &["in"]);
        h.disk.touch("in", 100);
        h.disk.touch("out", 200);
        h.log_command("out", 200);
        h.scan("out")?;
        assert!(!h.dirty("out"));
        let edge = h.graph.file(h.graph.lookup_file("out").unwrap()).input.unwrap();
        assert!(h.graph.build(edge).outputs_ready);
        Ok(())
    }

    #[test]
    fn output_older_than_input_is_dirty() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build("cc", &["out"], &["in"]);
        h.disk.touch("in", 300);
        h.disk.touch("out", 200);
        h.log_command("out", 200);
        h.scan("out")?;
        assert!(h.dirty("out"));
        Ok(())
    }

    #[test]
    fn no_log_entry_is_dirty_but_generator_is_not() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.rule("gen", "gen", &[("generator", "1")]);
        h.build("cc", &["out"], &["in"]);
        h.build("gen", &["manifest"], &["in"]);
        h.disk.touch("in", 100);
        h.disk.touch("out", 200);
        h.disk.touch("manifest", 200);
        h.scan("out")?;
        h.scan("manifest")?;
        assert!(h.dirty("out"));
        assert!(!h.dirty("manifest"));
        Ok(())
    }

    #[test]
    fn changed_command_is_dirty() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc -O2", &[]);
        h.build("cc", &["out"], &["in"]);
        h.disk.touch("in", 100);
        h.disk.touch("out", 200);
        // Log an entry recorded under a different command line.
        let out = h.graph.lookup_file("out").unwrap();
        let edge = h.graph.file(out).input.unwrap();
        record_entry(&mut h.build_log, &h.graph, edge, 200);
        h.graph
            .build_mut(edge)
            .bindings
            .insert("command".to_string(), "cc -O3".to_string());
        h.scan("out")?;
        assert!(h.dirty("out"));
        Ok(())
    }

    #[test]
    fn restat_log_mtime_keeps_output_clean() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cp", "cp", &[("restat", "1")]);
        h.build("cp", &["out"], &["in"]);
        h.disk.touch("in", 300);
        h.disk.touch("out", 200);
        // A previous restat cleaned the output and stored the input mtime.
        h.log_command("out", 300);
        h.scan("out")?;
        assert!(!h.dirty("out"));
        Ok(())
    }

    #[test]
    fn interrupted_write_is_dirty() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build("cc", &["out"], &["in"]);
        h.disk.touch("in", 300);
        // The output is on disk newer than the input, but the log recorded
        // an older mtime: the prior run was interrupted after the write.
        h.disk.touch("out", 400);
        h.log_command("out", 100);
        h.scan("out")?;
        assert!(h.dirty("out"));
        Ok(())
    }

    #[test]
    fn order_only_input_does_not_dirty() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build_full("cc", &["out"], &["in", "oo"], 1, &[]);
        h.disk.touch("in", 100);
        h.disk.touch("oo", 999);
        h.disk.touch("out", 200);
        h.log_command("out", 200);
        h.scan("out")?;
        assert!(!h.dirty("out"));
        Ok(())
    }

    #[test]
    fn phony_with_inputs_clean_without_output() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build("phony", &["all"], &["real"]);
        h.build("cc", &["real"], &[]);
        h.disk.touch("real", 100);
        h.log_command("real", 100);
        h.scan("all")?;
        assert!(!h.dirty("all"));
        // A phony with no inputs and a missing output is dirty.
        let mut h = Harness::new();
        h.build("phony", &["ghost"], &[]);
        h.scan("ghost")?;
        assert!(h.dirty("ghost"));
        Ok(())
    }

    #[test]
    fn cycle_detected() {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build("cc", &["a"], &["c"]);
        h.build("cc", &["c"], &["a"]);
        let err = h.scan("a").unwrap_err();
        assert_eq!(err.to_string(), "dependency cycle: a -> c -> a");
    }

    #[test]
    fn phony_self_cycle_gets_hint() {
        let mut h = Harness::new();
        h.build("phony", &["a"], &["a"]);
        let err = h.scan("a").unwrap_err();
        assert_eq!(
            err.to_string(),
            "dependency cycle: a -> a [-w phonycycle=err]"
        );
    }

    #[test]
    fn depfile_adds_input() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        let edge = h.build_full("cc", &["out"], &["in"], 0, &[("depfile", "out.d")]);
        h.disk.touch("in", 100);
        h.disk.touch("out", 200);
        h.disk.put("out.d", 100, "out: hdr.h\n");
        h.disk.touch("hdr.h", 300);
        h.log_command("out", 200);
        h.scan("out")?;
        // The header is newer than the output, so the discovered dep
        // dirties the build.
        assert!(h.dirty("out"));
        let hdr = h.graph.lookup_file("hdr.h").unwrap();
        assert!(h.graph.build(edge).depend_ins().contains(&hdr));
        assert_eq!(h.graph.build(edge).implicit_ins, 1);
        // Discovered deps get a synthetic phony producer.
        assert!(h.graph.file(hdr).input.is_some());
        Ok(())
    }

    #[test]
    fn missing_depfile_forces_rebuild() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        let edge = h.build_full("cc", &["out"], &["in"], 0, &[("depfile", "out.d")]);
        h.disk.touch("in", 100);
        h.disk.touch("out", 200);
        h.log_command("out", 200);
        h.scan("out")?;
        assert!(h.dirty("out"));
        assert!(h.graph.build(edge).deps_missing);
        Ok(())
    }

    #[test]
    fn depfile_output_mismatch_rebuilds_without_error() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build_full("cc", &["out"], &["in"], 0, &[("depfile", "out.d")]);
        h.disk.touch("in", 100);
        h.disk.touch("out", 200);
        h.disk.put("out.d", 100, "different: hdr.h\n");
        h.log_command("out", 200);
        h.scan("out")?;
        assert!(h.dirty("out"));
        Ok(())
    }

    #[test]
    fn depfile_foreign_output_is_hard_error() {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build_full("cc", &["out"], &["in"], 0, &[("depfile", "out.d")]);
        h.disk.touch("in", 100);
        h.disk.touch("out", 200);
        h.disk.put("out.d", 100, "out: hdr.h\nelsewhere: hdr.h\n");
        let err = h.scan("out").unwrap_err();
        assert!(err.to_string().contains("no such output was declared"));
    }

    #[test]
    fn deps_log_roundtrip_and_staleness() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[("deps", "gcc"), ("depfile", "out.d")]);
        let edge = h.build("cc", &["out"], &["in"]);
        h.disk.touch("in", 100);
        h.disk.touch("out", 200);
        h.disk.touch("hdr.h", 150);
        let out = h.graph.lookup_file("out").unwrap();
        let hdr = h.graph.file_id("hdr.h");
        h.deps_log
            .record_deps(&h.graph, out, MTime::Stamp(200), &[hdr])?;
        h.log_command("out", 200);
        h.scan("out")?;
        assert!(!h.dirty("out"));
        assert!(h.graph.build(edge).depend_ins().contains(&hdr));

        // A second harness where the output is newer than the record:
        // stale deps force a rebuild.
        let mut h = Harness::new();
        h.rule("cc", "cc", &[("deps", "gcc"), ("depfile", "out.d")]);
        h.build("cc", &["out"], &["in"]);
        h.disk.touch("in", 100);
        h.disk.touch("out", 500);
        let out = h.graph.lookup_file("out").unwrap();
        let hdr = h.graph.file_id("hdr.h");
        h.deps_log
            .record_deps(&h.graph, out, MTime::Stamp(200), &[hdr])?;
        h.log_command("out", 500);
        h.scan("out")?;
        assert!(h.dirty("out"));
        Ok(())
    }

    #[test]
    fn dirty_input_propagates() -> anyhow::Result<()> {
        let mut h = Harness::new();
        h.rule("cc", "cc", &[]);
        h.build("cc", &["mid"], &["src"]);
        h.build("cc", &["out"], &["mid"]);
        h.disk.touch("src", 300);
        h.disk.touch("mid", 100);
        h.disk.touch("out", 400);
        h.log_command("mid", 100);
        h.log_command("out", 400);
        h.scan("out")?;
        assert!(h.dirty("mid"));
        assert!(h.dirty("out"));
        let out_edge = h.graph.file(h.graph.lookup_file("out").unwrap()).input.unwrap();
        assert!(!h.graph.build(out_edge).outputs_ready);
        Ok(())
    }
}

//! The build graph: files, the builds that produce them, rules, and pools.
//!
//! Files and builds live in dense arenas and reference each other by id, so
//! the graph can be freely shared and mutated without ownership cycles.

use crate::canon::{canon_path, SlashBits};
use crate::densemap::{self, DenseMap};
use crate::disk::MTime;
use crate::eval::{Env, EvalString, ScopeId, Scopes};
use crate::smallmap::SmallMap;
use anyhow::bail;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(u32);

impl densemap::Index for FileId {
    fn index(self) -> usize {
        self.0 as usize
    }
    fn from_index(i: usize) -> Self {
        FileId(i as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId(u32);

impl densemap::Index for BuildId {
    fn index(self) -> usize {
        self.0 as usize
    }
    fn from_index(i: usize) -> Self {
        BuildId(i as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(u32);

impl densemap::Index for RuleId {
    fn index(self) -> usize {
        self.0 as usize
    }
    fn from_index(i: usize) -> Self {
        RuleId(i as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u32);

impl densemap::Index for PoolId {
    fn index(self) -> usize {
        self.0 as usize
    }
    fn from_index(i: usize) -> Self {
        PoolId(i as u32)
    }
}

/// The reserved no-op rule; always RuleId 0.
pub const PHONY_RULE: RuleId = RuleId(0);
/// The unnamed unbounded pool; always PoolId 0.
pub const DEFAULT_POOL: PoolId = PoolId(0);
/// The depth-1 pool whose builds own the terminal; always PoolId 1.
pub const CONSOLE_POOL: PoolId = PoolId(1);

/// A named template of unexpanded bindings (`command`, `description`, ...).
#[derive(Debug)]
pub struct Rule {
    pub name: String,
    pub bindings: SmallMap<String, EvalString<String>>,
}

impl Rule {
    pub fn get_binding(&self, key: &str) -> Option<&EvalString<String>> {
        self.bindings.get(key)
    }
}

/// Binding names with engine-defined meaning; anything else on a rule is a
/// manifest error.
pub fn is_reserved_binding(var: &str) -> bool {
    matches!(
        var,
        "command"
            | "depfile"
            | "deps"
            | "description"
            | "dyndep"
            | "generator"
            | "msvc_deps_prefix"
            | "pool"
            | "restat"
            | "rspfile"
            | "rspfile_content"
    )
}

/// A file known to the graph, keyed by canonical path.
#[derive(Debug)]
pub struct File {
    pub name: String,
    pub slash_bits: SlashBits,
    /// The build producing this file, if any.
    pub input: Option<BuildId>,
    /// Builds that consume this file.
    pub dependents: Vec<BuildId>,
    /// None until statted.
    pub mtime: Option<MTime>,
    pub dirty: bool,
    /// Set when some build names this file as its dyndep source and the
    /// file has not been loaded yet.
    pub dyndep_pending: bool,
}

impl File {
    pub fn exists(&self) -> bool {
        matches!(self.mtime, Some(MTime::Stamp(_)))
    }
    pub fn status_known(&self) -> bool {
        self.mtime.is_some()
    }
}

/// Cycle-detection mark used by the dependency scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    NotVisited,
    InStack,
    Done,
}

/// One rule invocation: a command producing `outs` from `ins`.
///
/// `ins` is partitioned `[explicit | implicit | order-only]` with the two
/// counts locating the boundaries from the end; `outs` is
/// `[explicit | implicit]`.
#[derive(Debug)]
pub struct Build {
    pub rule: RuleId,
    pub scope: ScopeId,
    /// Edge-level bindings, already evaluated at parse time.
    pub bindings: SmallMap<String, String>,
    pub ins: Vec<FileId>,
    pub implicit_ins: usize,
    pub order_only_ins: usize,
    pub outs: Vec<FileId>,
    pub implicit_outs: usize,
    pub pool: PoolId,
    pub weight: usize,
    /// File whose contents add inputs/outputs to this build mid-build.
    pub dyndep: Option<FileId>,
    pub deps_loaded: bool,
    pub outputs_ready: bool,
    pub deps_missing: bool,
    pub mark: Mark,
}

impl Build {
    pub fn new(rule: RuleId, scope: ScopeId) -> Self {
        Build {
            rule,
            scope,
            bindings: SmallMap::default(),
            ins: Vec::new(),
            implicit_ins: 0,
            order_only_ins: 0,
            outs: Vec::new(),
            implicit_outs: 0,
            pool: DEFAULT_POOL,
            weight: 1,
            dyndep: None,
            deps_loaded: false,
            outputs_ready: false,
            deps_missing: false,
            mark: Mark::NotVisited,
        }
    }

    pub fn is_phony(&self) -> bool {
        self.rule == PHONY_RULE
    }

    pub fn use_console(&self) -> bool {
        self.pool == CONSOLE_POOL
    }

    /// Inputs that appear in `$in`.
    pub fn explicit_ins(&self) -> &[FileId] {
        &self.ins[..self.ins.len() - self.implicit_ins - self.order_only_ins]
    }

    /// Inputs whose mtimes contribute to dirtiness (explicit + implicit).
    pub fn depend_ins(&self) -> &[FileId] {
        &self.ins[..self.ins.len() - self.order_only_ins]
    }

    pub fn order_only_ins(&self) -> &[FileId] {
        &self.ins[self.ins.len() - self.order_only_ins..]
    }

    pub fn is_order_only(&self, in_index: usize) -> bool {
        in_index >= self.ins.len() - self.order_only_ins
    }

    /// Outputs that appear in `$out`.
    pub fn explicit_outs(&self) -> &[FileId] {
        &self.outs[..self.outs.len() - self.implicit_outs]
    }

    /// The self-referencing phony shape some generators emit; its cycle
    /// report carries an extra diagnostic hint.
    pub fn maybe_phonycycle_diagnostic(&self) -> bool {
        self.is_phony()
            && self.outs.len() == 1
            && self.implicit_outs == 0
            && self.implicit_ins == 0
            && self.order_only_ins == 0
    }
}

/// A counter capping concurrent execution of its member builds.
#[derive(Debug)]
pub struct Pool {
    pub name: String,
    /// 0 means unlimited.
    pub depth: usize,
    current_use: usize,
    /// Builds parked until capacity frees up, drained in weighted order
    /// (weight descending, id ascending for determinism).
    delayed: std::collections::BTreeSet<(std::cmp::Reverse<usize>, BuildId)>,
}

impl Pool {
    fn new(name: String, depth: usize) -> Self {
        Pool {
            name,
            depth,
            current_use: 0,
            delayed: Default::default(),
        }
    }

    pub fn should_delay(&self) -> bool {
        self.depth != 0
    }

    pub fn edge_scheduled(&mut self, weight: usize) {
        if self.depth != 0 {
            self.current_use += weight;
        }
    }

    pub fn edge_finished(&mut self, weight: usize) {
        if self.depth != 0 {
            self.current_use -= weight;
        }
    }

    pub fn delay_edge(&mut self, id: BuildId, weight: usize) {
        assert!(self.depth != 0);
        self.delayed.insert((std::cmp::Reverse(weight), id));
    }

    /// Move as many delayed builds as now fit into the ready queue.
    pub fn retrieve_ready_edges(&mut self, ready: &mut std::collections::VecDeque<BuildId>) {
        while let Some(&(std::cmp::Reverse(weight), id)) = self.delayed.iter().next() {
            if self.current_use + weight > self.depth {
                break;
            }
            self.delayed.remove(&(std::cmp::Reverse(weight), id));
            self.edge_scheduled(weight);
            ready.push_back(id);
        }
    }
}

/// The whole graph plus the rule/pool/scope tables it references.
#[derive(Debug)]
pub struct Graph {
    pub files: DenseMap<FileId, File>,
    pub builds: DenseMap<BuildId, Build>,
    pub rules: DenseMap<RuleId, Rule>,
    pub pools: DenseMap<PoolId, Pool>,
    pub scopes: Scopes,
    file_ids: HashMap<String, FileId>,
    rule_ids: HashMap<String, RuleId>,
    pool_ids: HashMap<String, PoolId>,
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Graph {
            files: DenseMap::new(),
            builds: DenseMap::new(),
            rules: DenseMap::new(),
            pools: DenseMap::new(),
            scopes: Scopes::new(),
            file_ids: HashMap::new(),
            rule_ids: HashMap::new(),
            pool_ids: HashMap::new(),
        };
        graph
            .add_rule(Rule {
                name: "phony".to_string(),
                bindings: SmallMap::default(),
            })
            .unwrap();
        graph.add_pool("", 0).unwrap();
        graph.add_pool("console", 1).unwrap();
        graph
    }

    pub fn file(&self, id: FileId) -> &File {
        self.files.get(id)
    }
    pub fn file_mut(&mut self, id: FileId) -> &mut File {
        self.files.get_mut(id)
    }
    pub fn build(&self, id: BuildId) -> &Build {
        self.builds.get(id)
    }
    pub fn build_mut(&mut self, id: BuildId) -> &mut Build {
        self.builds.get_mut(id)
    }
    pub fn rule(&self, id: RuleId) -> &Rule {
        self.rules.get(id)
    }
    pub fn pool(&self, id: PoolId) -> &Pool {
        self.pools.get(id)
    }
    pub fn pool_mut(&mut self, id: PoolId) -> &mut Pool {
        self.pools.get_mut(id)
    }

    /// Intern a path, canonicalizing it first.
    pub fn file_id(&mut self, path: &str) -> FileId {
        let (name, slash_bits) = canon_path(path);
        if let Some(&id) = self.file_ids.get(&name) {
            return id;
        }
        let id = self.files.push(File {
            name: name.clone(),
            slash_bits,
            input: None,
            dependents: Vec::new(),
            mtime: None,
            dirty: false,
            dyndep_pending: false,
        });
        self.file_ids.insert(name, id);
        id
    }

    /// Look up an already-canonical path.
    pub fn lookup_file(&self, name: &str) -> Option<FileId> {
        self.file_ids.get(name).copied()
    }

    pub fn add_rule(&mut self, rule: Rule) -> anyhow::Result<RuleId> {
        if self.rule_ids.contains_key(&rule.name) {
            bail!("duplicate rule '{}'", rule.name);
        }
        let name = rule.name.clone();
        let id = self.rules.push(rule);
        self.rule_ids.insert(name, id);
        Ok(id)
    }

    pub fn lookup_rule(&self, name: &str) -> Option<RuleId> {
        self.rule_ids.get(name).copied()
    }

    pub fn add_pool(&mut self, name: &str, depth: usize) -> anyhow::Result<PoolId> {
        if self.pool_ids.contains_key(name) {
            bail!("duplicate pool '{}'", name);
        }
        let id = self.pools.push(Pool::new(name.to_string(), depth));
        self.pool_ids.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn lookup_pool(&self, name: &str) -> Option<PoolId> {
        self.pool_ids.get(name).copied()
    }

    /// Register a build, linking it as its outputs' producer and its inputs'
    /// dependent.  A second producer for a file is a manifest error.
    pub fn add_build(&mut self, build: Build) -> anyhow::Result<BuildId> {
        let id = self.builds.next_id();
        for &out in &build.outs {
            let file = self.files.get_mut(out);
            if file.input.is_some() {
                bail!("multiple rules generate {}", file.name);
            }
            file.input = Some(id);
        }
        for &input in &build.ins {
            self.files.get_mut(input).dependents.push(id);
        }
        if let Some(dyndep) = build.dyndep {
            self.files.get_mut(dyndep).dyndep_pending = true;
        }
        self.builds.push(build);
        Ok(id)
    }

    /// Give a producerless file a synthetic phony producer, so that the
    /// file's later disappearance forces a rebuild of its dependents rather
    /// than a missing-input error.
    pub fn create_phony_producer(&mut self, file: FileId) {
        if self.file(file).input.is_some() {
            return;
        }
        let scope = self.scopes.root();
        let mut phony = Build::new(PHONY_RULE, scope);
        phony.outs.push(file);
        // The scan may already have visited this file while it had no
        // producer, treating it as ready; start from that state to avoid a
        // stuck plan.
        phony.outputs_ready = true;
        let id = self.builds.push(phony);
        self.file_mut(file).input = Some(id);
    }

    /// Splice discovered dependencies in just before the order-only tail.
    pub fn insert_discovered_ins(&mut self, id: BuildId, deps: &[FileId]) {
        for &dep in deps {
            self.files.get_mut(dep).dependents.push(id);
        }
        let build = self.builds.get_mut(id);
        let at = build.ins.len() - build.order_only_ins;
        build.ins.splice(at..at, deps.iter().copied());
        build.implicit_ins += deps.len();
    }

    /// Append dyndep-discovered implicit outputs.
    pub fn insert_discovered_outs(&mut self, id: BuildId, outs: &[FileId]) -> anyhow::Result<()> {
        for &out in outs {
            let file = self.files.get_mut(out);
            if file.input.is_some() {
                bail!("multiple rules generate {}", file.name);
            }
            file.input = Some(id);
        }
        let build = self.builds.get_mut(id);
        build.outs.extend_from_slice(outs);
        build.implicit_outs += outs.len();
        Ok(())
    }

    /// True when every input's producer has finished successfully.
    pub fn all_inputs_ready(&self, id: BuildId) -> bool {
        self.build(id).ins.iter().all(|&input| {
            match self.file(input).input {
                Some(producer) => self.build(producer).outputs_ready,
                None => true,
            }
        })
    }

    /// A file path as it should appear in diagnostics and command lines.
    pub fn display_path(&self, id: FileId) -> Cow<str> {
        let file = self.file(id);
        if cfg!(windows) && file.slash_bits != 0 {
            Cow::Owned(crate::canon::decanon_path(&file.name, file.slash_bits))
        } else {
            Cow::Borrowed(file.name.as_str())
        }
    }

    /// Evaluate a binding with $in/$out shell-escaped for a command line.
    pub fn get_binding(&self, id: BuildId, key: &str) -> String {
        BuildEnv::escaped(self, id)
            .get_var(key)
            .map(Cow::into_owned)
            .unwrap_or_default()
    }

    pub fn get_binding_bool(&self, id: BuildId, key: &str) -> bool {
        !self.get_binding(id, key).is_empty()
    }

    /// Evaluate a binding without shell escaping; used for paths the engine
    /// consumes itself (depfile, rspfile, dyndep).
    pub fn unescaped_binding(&self, id: BuildId, key: &str) -> String {
        BuildEnv::unescaped(self, id)
            .get_var(key)
            .map(Cow::into_owned)
            .unwrap_or_default()
    }

    /// The full command for a build, with the rspfile content folded in when
    /// requested so command hashes observe rspfile changes.
    pub fn evaluate_command(&self, id: BuildId, incl_rsp_file: bool) -> String {
        let mut command = self.get_binding(id, "command");
        if incl_rsp_file {
            let rspfile_content = self.get_binding(id, "rspfile_content");
            if !rspfile_content.is_empty() {
                command.push_str(";rspfile=");
                command.push_str(&rspfile_content);
            }
        }
        command
    }

    fn path_list(&self, ids: &[FileId], sep: char, escape: bool) -> String {
        let mut result = String::new();
        for &id in ids {
            if !result.is_empty() {
                result.push(sep);
            }
            let path = self.display_path(id);
            if escape {
                shell_escape(&path, &mut result);
            } else {
                result.push_str(&path);
            }
        }
        result
    }
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

const SHELL_SAFE: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_+-./";

/// Append a path to a command line, single-quoting when needed.
fn shell_escape(path: &str, out: &mut String) {
    if !path.is_empty() && path.bytes().all(|c| SHELL_SAFE.contains(&c)) {
        out.push_str(path);
        return;
    }
    out.push('\'');
    for c in path.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
}

/// Variable environment for one build: synthesizes $in/$out and resolves
/// everything else through edge bindings, then the rule, then the scope
/// chain.
pub struct BuildEnv<'a> {
    graph: &'a Graph,
    id: BuildId,
    escape_in_out: bool,
    /// Rule-binding names currently being expanded, for cycle cutoff.
    lookups: RefCell<Vec<String>>,
}

impl<'a> BuildEnv<'a> {
    pub fn escaped(graph: &'a Graph, id: BuildId) -> Self {
        BuildEnv {
            graph,
            id,
            escape_in_out: true,
            lookups: RefCell::new(Vec::new()),
        }
    }

    pub fn unescaped(graph: &'a Graph, id: BuildId) -> Self {
        BuildEnv {
            graph,
            id,
            escape_in_out: false,
            lookups: RefCell::new(Vec::new()),
        }
    }
}

impl<'a> Env for BuildEnv<'a> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        let graph = self.graph;
        let build = graph.build(self.id);
        match var {
            "in" => {
                return Some(Cow::Owned(graph.path_list(
                    build.explicit_ins(),
                    ' ',
                    self.escape_in_out,
                )))
            }
            "in_newline" => {
                return Some(Cow::Owned(graph.path_list(
                    build.explicit_ins(),
                    '\n',
                    self.escape_in_out,
                )))
            }
            "out" => {
                return Some(Cow::Owned(graph.path_list(
                    build.explicit_outs(),
                    ' ',
                    self.escape_in_out,
                )))
            }
            _ => {}
        }

        if let Some(val) = build.bindings.get(var) {
            return Some(Cow::Borrowed(val.as_str()));
        }

        if let Some(eval) = graph.rule(build.rule).get_binding(var) {
            // Rule bindings may reference other rule bindings; refuse to
            // expand a name already on the lookup path.
            if self.lookups.borrow().iter().any(|v| v == var) {
                return Some(Cow::Borrowed(""));
            }
            self.lookups.borrow_mut().push(var.to_string());
            let val = eval.evaluate(&[self]);
            self.lookups.borrow_mut().pop();
            return Some(Cow::Owned(val));
        }

        graph
            .scopes
            .lookup(build.scope, var)
            .map(Cow::Borrowed)
    }
}

//! Loads manifest files into a Graph, resolving includes, scopes, rules,
//! and pools along the way.

use crate::eval::{Env, EvalString, ScopeId, Scopes};
use crate::graph::{self, FileId, Graph};
use crate::parse::{self, Parser, Statement};
use crate::smallmap::SmallMap;
use crate::trace;
use anyhow::{anyhow, bail};
use std::borrow::Cow;
use std::path::Path;

/// Everything the loader produced: the graph and the manifest's default
/// targets.
#[derive(Debug)]
pub struct State {
    pub graph: Graph,
    pub default: Vec<FileId>,
}

impl State {
    /// The manifest-declared directory for logs and other engine state.
    pub fn build_dir(&self) -> Option<String> {
        self.graph
            .scopes
            .lookup(self.graph.scopes.root(), "builddir")
            .map(str::to_string)
    }
}

/// Variable lookups within one file scope chain.
struct ScopeEnv<'a> {
    scopes: &'a Scopes,
    scope: ScopeId,
}

impl<'a> Env for ScopeEnv<'a> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        self.scopes.lookup(self.scope, var).map(Cow::Borrowed)
    }
}

/// Variable lookups while processing a build statement: the statement's own
/// bindings shadow the file scope.
struct EdgeScopeEnv<'a> {
    bindings: &'a SmallMap<String, String>,
    scopes: &'a Scopes,
    scope: ScopeId,
}

impl<'a> Env for EdgeScopeEnv<'a> {
    fn get_var(&self, var: &str) -> Option<Cow<str>> {
        if let Some(val) = self.bindings.get(var) {
            return Some(Cow::Borrowed(val.as_str()));
        }
        self.scopes.lookup(self.scope, var).map(Cow::Borrowed)
    }
}

/// Read the manifest at `path` and everything it includes.
pub fn read(path: &str) -> anyhow::Result<State> {
    trace::scope("load::read", || {
        let mut loader = Loader {
            graph: Graph::new(),
            default: Vec::new(),
        };
        let scope = loader.graph.scopes.root();
        loader.read_file(path, scope)?;
        Ok(State {
            graph: loader.graph,
            default: loader.default,
        })
    })
}

struct Loader {
    graph: Graph,
    default: Vec<FileId>,
}

impl Loader {
    fn read_file(&mut self, path: &str, scope: ScopeId) -> anyhow::Result<()> {
        let mut bytes =
            std::fs::read(path).map_err(|err| anyhow!("read {}: {}", path, err))?;
        bytes.push(0);
        let mut parser = Parser::new(&bytes);
        loop {
            let stmt = match parser.read() {
                Err(err) => bail!(parser.format_parse_error(Path::new(path), err)),
                Ok(None) => break,
                Ok(Some(stmt)) => stmt,
            };
            match stmt {
                Statement::Binding((name, val)) => {
                    let val = self.eval_in_scope(&val, scope);
                    self.graph.scopes.add_binding(scope, name.to_string(), val);
                }
                Statement::Rule(rule) => {
                    let mut bindings = SmallMap::default();
                    for (name, val) in rule.vars.into_iter() {
                        bindings.insert(name.to_string(), val.into_owned());
                    }
                    self.graph.add_rule(graph::Rule {
                        name: rule.name.to_string(),
                        bindings,
                    })?;
                }
                Statement::Pool(pool) => {
                    let depth = match pool.vars.get("depth") {
                        Some(val) => {
                            let val = self.eval_in_scope(val, scope);
                            val.trim().parse::<usize>().map_err(|_| {
                                anyhow!("pool '{}': invalid depth {:?}", pool.name, val)
                            })?
                        }
                        None => bail!("pool '{}' has no depth", pool.name),
                    };
                    self.graph.add_pool(pool.name, depth)?;
                }
                Statement::Default(paths) => {
                    for path in paths {
                        let path = self.eval_in_scope(&path, scope);
                        let (canon, _) = crate::canon::canon_path(&path);
                        match self.graph.lookup_file(&canon) {
                            Some(id) => self.default.push(id),
                            None => bail!("unknown default target {:?}", path),
                        }
                    }
                }
                Statement::Include(path) => {
                    let path = self.eval_in_scope(&path, scope);
                    self.read_file(&path, scope)?;
                }
                Statement::Subninja(path) => {
                    let path = self.eval_in_scope(&path, scope);
                    let child = self.graph.scopes.new_child(scope);
                    self.read_file(&path, child)?;
                }
                Statement::Build(build) => self.add_build(path, build, scope)?,
            }
        }
        Ok(())
    }

    fn eval_in_scope(&self, val: &EvalString<&str>, scope: ScopeId) -> String {
        val.evaluate(&[&ScopeEnv {
            scopes: &self.graph.scopes,
            scope,
        }])
    }

    fn add_build(
        &mut self,
        filename: &str,
        stmt: parse::Build,
        scope: ScopeId,
    ) -> anyhow::Result<()> {
        let rule = self.graph.lookup_rule(stmt.rule).ok_or_else(|| {
            anyhow!("{}:{}: unknown build rule '{}'", filename, stmt.line, stmt.rule)
        })?;

        // Evaluate the statement's bindings in order; each sees the ones
        // before it plus the file scope, but never itself.
        let mut bindings: SmallMap<String, String> = SmallMap::default();
        for (name, val) in stmt.vars.iter() {
            let evaluated = {
                let env = EdgeScopeEnv {
                    bindings: &bindings,
                    scopes: &self.graph.scopes,
                    scope,
                };
                val.evaluate(&[&env])
            };
            bindings.insert(name.to_string(), evaluated);
        }

        let (out_paths, in_paths, pool_name, dyndep_path, deps_type) = {
            let env = EdgeScopeEnv {
                bindings: &bindings,
                scopes: &self.graph.scopes,
                scope,
            };
            let outs: Vec<String> = stmt.outs.iter().map(|p| p.evaluate(&[&env])).collect();
            let ins: Vec<String> = stmt.ins.iter().map(|p| p.evaluate(&[&env])).collect();
            // Pool, dyndep, and deps need resolving now; all may come from
            // the rule rather than the statement.
            let rule_binding = |key: &str| {
                self.graph
                    .rule(rule)
                    .get_binding(key)
                    .map(|val| val.evaluate(&[&env]))
            };
            let pool_name = bindings
                .get("pool")
                .cloned()
                .or_else(|| rule_binding("pool"))
                .unwrap_or_default();
            let dyndep_path = bindings
                .get("dyndep")
                .cloned()
                .or_else(|| rule_binding("dyndep"))
                .unwrap_or_default();
            let deps_type = bindings
                .get("deps")
                .cloned()
                .or_else(|| rule_binding("deps"))
                .unwrap_or_default();
            (outs, ins, pool_name, dyndep_path, deps_type)
        };

        let mut build = graph::Build::new(rule, scope);
        build.bindings = bindings;

        if !pool_name.is_empty() {
            build.pool = self
                .graph
                .lookup_pool(&pool_name)
                .ok_or_else(|| anyhow!("unknown pool name '{}'", pool_name))?;
        }

        // Repeated outputs within one statement collapse to the first
        // occurrence rather than tripping the duplicate-producer check.
        let mut explicit_outs = stmt.explicit_outs;
        for (i, path) in out_paths.iter().enumerate() {
            let id = self.graph.file_id(path);
            if build.outs.contains(&id) {
                if i < stmt.explicit_outs {
                    explicit_outs -= 1;
                }
                continue;
            }
            build.outs.push(id);
        }
        build.implicit_outs = build.outs.len() - explicit_outs;

        // The deps log is keyed by a build's first output, so discovered
        // deps only work for single-output builds.
        if !deps_type.is_empty() && build.outs.len() > 1 {
            bail!(
                "{}:{}: deps are only supported for single-output builds",
                filename,
                stmt.line
            );
        }

        build.ins = in_paths.iter().map(|path| self.graph.file_id(path)).collect();
        build.implicit_ins = stmt.implicit_ins;
        build.order_only_ins = stmt.order_only_ins;

        if !dyndep_path.is_empty() {
            let id = self.graph.file_id(&dyndep_path);
            if !build.ins.contains(&id) {
                bail!(
                    "{}:{}: dyndep '{}' is not an input",
                    filename,
                    stmt.line,
                    dyndep_path
                );
            }
            build.dyndep = Some(id);
        }

        self.graph.add_build(build)?;
        Ok(())
    }
}

//! Dynamic dependencies: files produced during the build that declare
//! additional implicit inputs and outputs for specific builds.
//!
//! A dyndep file uses manifest syntax:
//!
//! ```text
//! ninja_dyndep_version = 1
//! build out | extra.out: dyndep | extra.in
//!   restat = 1
//! ```
//!
//! When the file's producer finishes mid-build, the plan loads it, splices
//! the new files into the affected builds, and rescans their dependents.

use crate::disk::Disk;
use crate::graph::{BuildId, FileId, Graph};
use crate::parse::{Parser, Statement};
use anyhow::{anyhow, bail};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug)]
pub struct DyndepEdge {
    pub restat: bool,
    pub implicit_ins: Vec<FileId>,
    pub implicit_outs: Vec<FileId>,
}

/// The parsed contents of one dyndep file: updates per affected build.
pub type DyndepFile = HashMap<BuildId, DyndepEdge>;

/// Load the dyndep file `node` and apply its updates to the graph.
/// Builds whose outputs are already ready are left untouched.
pub fn load_dyndeps(
    graph: &mut Graph,
    disk: &dyn Disk,
    node: FileId,
) -> anyhow::Result<DyndepFile> {
    let path = graph.file(node).name.clone();
    let ddf = parse_dyndep_file(graph, disk, node, &path)?;

    // Every build bound to this dyndep file must be covered by it.
    let consumers: Vec<BuildId> = graph
        .file(node)
        .dependents
        .iter()
        .copied()
        .filter(|&id| graph.build(id).dyndep == Some(node))
        .collect();
    for &id in &consumers {
        if !ddf.contains_key(&id) {
            bail!(
                "dyndep file '{}' does not mention output '{}'",
                path,
                graph.file(graph.build(id).outs[0]).name
            );
        }
    }

    for (&id, update) in ddf.iter() {
        if graph.build(id).outputs_ready {
            continue;
        }
        if update.restat {
            graph
                .build_mut(id)
                .bindings
                .insert("restat".to_string(), "1".to_string());
        }
        graph.insert_discovered_outs(id, &update.implicit_outs)?;
        graph.insert_discovered_ins(id, &update.implicit_ins);
    }

    graph.file_mut(node).dyndep_pending = false;
    Ok(ddf)
}

fn parse_dyndep_file(
    graph: &mut Graph,
    disk: &dyn Disk,
    node: FileId,
    path: &str,
) -> anyhow::Result<DyndepFile> {
    let mut bytes = disk
        .read_file(path)?
        .ok_or_else(|| anyhow!("loading '{}': file is missing", path))?;
    bytes.push(0);
    let mut parser = Parser::new(&bytes);
    let mut ddf = DyndepFile::new();
    let mut saw_version = false;
    loop {
        let stmt = match parser.read() {
            Err(err) => bail!(parser.format_parse_error(Path::new(path), err)),
            Ok(None) => break,
            Ok(Some(stmt)) => stmt,
        };
        match stmt {
            Statement::Binding((name, val)) if !saw_version => {
                if name != "ninja_dyndep_version" {
                    bail!("{}: expected 'ninja_dyndep_version = ...'", path);
                }
                let version = val.evaluate(&[]);
                if version != "1" && version != "1.0" {
                    bail!("{}: unsupported dyndep version {:?}", path, version);
                }
                saw_version = true;
            }
            Statement::Build(stmt) => {
                if !saw_version {
                    bail!("{}: expected 'ninja_dyndep_version = ...'", path);
                }
                if stmt.rule != "dyndep" {
                    bail!("{}: expected rule 'dyndep', got '{}'", path, stmt.rule);
                }
                if stmt.explicit_outs != 1 {
                    bail!("{}: expected exactly one explicit output", path);
                }
                if stmt.explicit_ins != 0 || stmt.order_only_ins != 0 {
                    bail!("{}: dyndep inputs must be in the implicit section", path);
                }
                let mut restat = false;
                for (key, val) in stmt.vars.iter() {
                    if *key != "restat" {
                        bail!("{}: unexpected variable {:?}", path, key);
                    }
                    restat = !val.evaluate(&[]).is_empty();
                }

                let out = stmt.outs[0].evaluate(&[]);
                let (out, _) = crate::canon::canon_path(&out);
                let build = graph
                    .lookup_file(&out)
                    .and_then(|id| graph.file(id).input)
                    .ok_or_else(|| {
                        anyhow!("{}: no build statement exists for '{}'", path, out)
                    })?;
                if graph.build(build).dyndep != Some(node) {
                    bail!(
                        "{}: output '{}' was not built with a dyndep binding for this file",
                        path,
                        out
                    );
                }
                if ddf.contains_key(&build) {
                    bail!("{}: output '{}' mentioned multiple times", path, out);
                }

                let implicit_outs = stmt.outs[1..]
                    .iter()
                    .map(|p| graph.file_id(&p.evaluate(&[])))
                    .collect();
                let implicit_ins = stmt
                    .ins
                    .iter()
                    .map(|p| graph.file_id(&p.evaluate(&[])))
                    .collect();
                ddf.insert(
                    build,
                    DyndepEdge {
                        restat,
                        implicit_ins,
                        implicit_outs,
                    },
                );
            }
            _ => bail!("{}: unexpected statement", path),
        }
    }
    if !saw_version {
        bail!("{}: expected 'ninja_dyndep_version = ...'", path);
    }
    Ok(ddf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use crate::eval::{EvalPart, EvalString};
    use crate::graph::{Build, Rule};
    use crate::smallmap::SmallMap;

    /// build dd: gen; build out: use in || dd (dyndep = dd)
    fn test_graph() -> (Graph, FileId, BuildId) {
        let mut graph = Graph::new();
        let mut bindings = SmallMap::default();
        bindings.insert(
            "command".to_string(),
            EvalString::new(vec![EvalPart::Literal("cmd")]).into_owned(),
        );
        let rule = graph
            .add_rule(Rule {
                name: "use".to_string(),
                bindings,
            })
            .unwrap();
        let scope = graph.scopes.root();

        let dd = graph.file_id("dep.dd");
        let mut gen = Build::new(rule, scope);
        gen.outs.push(dd);
        graph.add_build(gen).unwrap();

        let mut using = Build::new(rule, scope);
        using.ins = vec![graph.file_id("in"), dd];
        using.order_only_ins = 1;
        using.outs = vec![graph.file_id("out")];
        using.dyndep = Some(dd);
        let using = graph.add_build(using).unwrap();
        (graph, dd, using)
    }

    #[test]
    fn adds_discovered_input() {
        let (mut graph, dd, build) = test_graph();
        let disk = MemDisk::new();
        disk.put(
            "dep.dd",
            1,
            "ninja_dyndep_version = 1\nbuild out | out.extra: dyndep | extra.h\n  restat = 1\n",
        );
        let ddf = load_dyndeps(&mut graph, &disk, dd).unwrap();
        assert_eq!(ddf.len(), 1);

        let b = graph.build(build);
        assert_eq!(b.implicit_ins, 1);
        assert_eq!(b.implicit_outs, 1);
        let extra = graph.lookup_file("extra.h").unwrap();
        assert!(b.depend_ins().contains(&extra));
        // Discovered input sits before the order-only tail.
        assert!(!b.order_only_ins().contains(&extra));
        assert!(graph.get_binding_bool(build, "restat"));
        assert!(!graph.file(dd).dyndep_pending);
    }

    #[test]
    fn ready_build_left_alone() {
        let (mut graph, dd, build) = test_graph();
        graph.build_mut(build).outputs_ready = true;
        let disk = MemDisk::new();
        disk.put(
            "dep.dd",
            1,
            "ninja_dyndep_version = 1\nbuild out: dyndep | extra.h\n",
        );
        load_dyndeps(&mut graph, &disk, dd).unwrap();
        assert_eq!(graph.build(build).implicit_ins, 0);
    }

    #[test]
    fn missing_version_is_error() {
        let (mut graph, dd, _) = test_graph();
        let disk = MemDisk::new();
        disk.put("dep.dd", 1, "build out: dyndep\n");
        let err = load_dyndeps(&mut graph, &disk, dd).unwrap_err();
        assert!(err.to_string().contains("ninja_dyndep_version"));
    }

    #[test]
    fn unmentioned_output_is_error() {
        let (mut graph, dd, _) = test_graph();
        let disk = MemDisk::new();
        disk.put("dep.dd", 1, "ninja_dyndep_version = 1\n");
        let err = load_dyndeps(&mut graph, &disk, dd).unwrap_err();
        assert!(err.to_string().contains("does not mention output 'out'"));
    }
}

//! Command-line entry point: flag parsing, manifest loading, and the
//! driver that hands targets to the build.

use crate::build_log::BuildLog;
use crate::deps_log;
use crate::disk::RealDisk;
use crate::flags;
use crate::load;
use crate::progress::{
    self, DumbConsoleProgress, FancyConsoleProgress, Progress, DEFAULT_STATUS_FORMAT,
};
use crate::signal;
use crate::terminal;
use crate::trace;
use crate::work::{Options, Work};
use anyhow::{anyhow, bail};

#[derive(argh::FromArgs)] // this struct generates the flags and --help output
/// nib, an incremental build system
struct Opts {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// input build file [default=build.ninja]
    #[argh(option, short = 'f', default = "(\"build.ninja\".into())")]
    build_file: String,

    /// debugging tools; use '-d list' to list
    #[argh(option, short = 'd')]
    debug: Vec<String>,

    /// subcommands; use '-t list' to list
    #[argh(option, short = 't')]
    tool: Option<String>,

    /// parallelism [default uses system thread count]
    #[argh(option, short = 'j')]
    parallelism: Option<usize>,

    /// keep going until N failures (0 means infinity) [default=1]
    #[argh(option, short = 'k', default = "1")]
    keep_going: usize,

    /// do not start new tasks while the load average exceeds N
    #[argh(option, short = 'l')]
    load_average: Option<f64>,

    /// dry run: act like every command succeeded without running any
    #[argh(switch, short = 'n')]
    dry_run: bool,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// print nothing except failures
    #[argh(switch)]
    quiet: bool,

    /// targets to build
    #[argh(positional)]
    targets: Vec<String>,
}

fn default_parallelism() -> anyhow::Result<usize> {
    // Ninja-family tools use available processors plus a constant, but the
    // difference rarely matters.
    let par = std::thread::available_parallelism()?;
    Ok(usize::from(par))
}

/// Where the logs live: next to the manifest, or in `builddir` when the
/// manifest declares one.
fn log_paths(build_dir: Option<String>) -> anyhow::Result<(String, String)> {
    let prefix = match build_dir {
        Some(dir) if !dir.is_empty() => {
            std::fs::create_dir_all(&dir)
                .map_err(|err| anyhow!("creating builddir {}: {}", dir, err))?;
            format!("{}/", dir)
        }
        _ => String::new(),
    };
    Ok((
        format!("{}.ninja_log", prefix),
        format!("{}.ninja_deps", prefix),
    ))
}

fn build(
    progress: &mut dyn Progress,
    options: &Options,
    opts: &Opts,
) -> anyhow::Result<Option<usize>> {
    let disk = RealDisk::new();
    let mut tried_regen = false;
    loop {
        let state = load::read(&opts.build_file)?;
        let (build_log_path, deps_log_path) = log_paths(state.build_dir())?;
        let default_targets = state.default.clone();
        let mut graph = state.graph;

        let mut build_log = BuildLog::new();
        build_log.load(&build_log_path)?;
        let deps_log = deps_log::open(&deps_log_path, &mut graph)?;
        {
            // An entry is dead when the manifest no longer produces it.
            let is_dead = |path: &str| match graph.lookup_file(path) {
                Some(id) => graph.file(id).input.is_none(),
                None => true,
            };
            build_log.open_for_write(&build_log_path, &is_dead)?;
        }

        let mut work = Work::new(graph, build_log, deps_log, &disk, options, &mut *progress);

        // Attempt to rebuild the manifest itself before anything else.
        if !tried_regen {
            if let Some(target) = work.lookup(&opts.build_file) {
                work.want_file(target)?;
                match trace::scope("work.run", || work.run())? {
                    None => return Ok(None),
                    Some(0) => {
                        // Manifest already up to date; continue below with
                        // the same loaded state.
                    }
                    Some(_) => {
                        // Regenerated the manifest; reload and start over.
                        tried_regen = true;
                        continue;
                    }
                }
            }
        }

        if !opts.targets.is_empty() {
            for name in &opts.targets {
                let target = work
                    .lookup(name)
                    .ok_or_else(|| anyhow!("unknown target {:?}", name))?;
                work.want_file(target)?;
            }
        } else if !default_targets.is_empty() {
            for &target in &default_targets {
                work.want_file(target)?;
            }
        } else {
            bail!("no targets specified and no default");
        }

        return trace::scope("work.run", || work.run());
    }
}

fn run_tool(tool: &str, opts: &Opts) -> anyhow::Result<i32> {
    match tool {
        "list" => {
            println!("subcommands:");
            println!("  restat  re-stat all outputs recorded in the build log");
            Ok(1)
        }
        "restat" => {
            let state = load::read(&opts.build_file)?;
            let (build_log_path, _) = log_paths(state.build_dir())?;
            let disk = RealDisk::new();
            let mut log = BuildLog::new();
            log.load(&build_log_path)?;
            log.restat(&build_log_path, &disk, &opts.targets)?;
            Ok(0)
        }
        _ => bail!("unknown -t {:?}, use -t list to list", tool),
    }
}

fn run_impl() -> anyhow::Result<i32> {
    let opts: Opts = argh::from_env();

    for debug in &opts.debug {
        match debug.as_str() {
            "list" => {
                println!("debug modes:");
                println!("  explain      print why each build runs");
                println!("  keeprsp      keep response files after tasks finish");
                println!("  keepdepfile  keep depfiles after tasks finish");
                println!("  trace        generate a json performance trace");
                return Ok(1);
            }
            "explain" => flags::set_explaining(true),
            "keeprsp" => flags::set_keep_rsp(true),
            "keepdepfile" => flags::set_keep_depfile(true),
            "trace" => trace::open("trace.json")?,
            _ => bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    if let Some(dir) = &opts.chdir {
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    if let Some(tool) = &opts.tool {
        return run_tool(tool, &opts);
    }

    let status_format = std::env::var("NIB_STATUS")
        .unwrap_or_else(|_| DEFAULT_STATUS_FORMAT.to_string());
    progress::validate_status_format(&status_format)?;

    let parallelism = match opts.parallelism {
        Some(parallelism) => parallelism,
        None => default_parallelism()?,
    };
    let options = Options {
        parallelism,
        failures_allowed: match opts.keep_going {
            0 => usize::MAX,
            n => n,
        },
        max_load_average: opts.load_average.unwrap_or(0.0),
        dry_run: opts.dry_run,
    };

    signal::register_sigint();

    let mut progress: Box<dyn Progress> = if terminal::use_fancy() && !opts.quiet {
        Box::new(FancyConsoleProgress::new(
            opts.verbose,
            status_format,
            parallelism,
        ))
    } else {
        Box::new(DumbConsoleProgress::new(
            opts.verbose,
            opts.quiet,
            status_format,
            parallelism,
        ))
    };

    match build(progress.as_mut(), &options, &opts)? {
        None => {
            // Don't print any summary; the failing task is enough info.
            Ok(1)
        }
        Some(0) => {
            // Special case: don't print numbers when no work was done.
            println!("nib: no work to do");
            Ok(0)
        }
        Some(n) => {
            println!(
                "nib: ran {} task{}, now up to date",
                n,
                if n == 1 { "" } else { "s" }
            );
            Ok(0)
        }
    }
}

pub fn run() -> anyhow::Result<i32> {
    let res = run_impl();
    let _ = trace::close();
    res
}

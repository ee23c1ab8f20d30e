//! Tests for dependencies discovered from depfiles.

use crate::*;

#[cfg(unix)]
const GENDEP_RULE: &str = "
rule gendep
  description = gendep $out
  command = echo \"$dep_content\" > $out.d && touch $out
  depfile = $out.d
  deps = gcc
";

/// A depfile-discovered header triggers rebuilds through the deps log.
#[cfg(unix)]
#[test]
fn discover_header_through_deps_log() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            GENDEP_RULE,
            "
build out: gendep
  dep_content = out: hdr.h
",
            "",
        ]
        .join("\n"),
    )?;
    space.write("hdr.h", "")?;

    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    // The depfile was consumed into the deps log.
    assert!(space.read("out.d").is_err());

    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "no work");

    // Touching the discovered header dirties the output again.
    space.tick();
    space.write("hdr.h", "changed")?;
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

/// A depfile without `deps =` is parsed during the scan and left on disk.
#[cfg(unix)]
#[test]
fn plain_depfile_rescanned_each_run() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule gendep
  command = echo \"out: hdr.h\" > out.d && touch $out
  depfile = out.d
build out: gendep
",
    )?;
    space.write("hdr.h", "")?;

    space.run_expect(&mut nib_command(vec!["out"]))?;
    assert!(space.read("out.d").is_ok());

    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "no work");

    space.tick();
    space.write("hdr.h", "changed")?;
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

/// The depfile contains invalid syntax.
#[cfg(unix)]
#[test]
fn bad_depfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            GENDEP_RULE,
            "
build out: gendep
  dep_content = garbage text
",
            "",
        ]
        .join("\n"),
    )?;

    let out = space.run(&mut nib_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "parse error:");
    Ok(())
}

/// A missing depfile after a run forces the next run to rebuild.
#[cfg(unix)]
#[test]
fn missing_depfile_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    // The command "forgets" to write its depfile.
    space.write(
        "build.ninja",
        "
rule baddep
  command = touch $out
  depfile = $out.d
build out: baddep
",
    )?;
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    // Without dep info we can never trust the output.
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

//! Tests for dyndep files: dependencies discovered while the build runs.

use crate::*;

#[cfg(unix)]
const DYNDEP_MANIFEST: &str = "
rule touch
  command = touch $out

rule gendd
  command = printf 'ninja_dyndep_version = 1\\nbuild out: dyndep | extra.h\\n' > $out

build dd: gendd
build out: touch || dd
  dyndep = dd
";

/// The dyndep file produced mid-build adds an implicit input to a build
/// later in the same run, and is consulted from disk on later runs.
#[cfg(unix)]
#[test]
fn dyndep_discovers_input() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", DYNDEP_MANIFEST)?;
    space.write("extra.h", "")?;

    // First run builds dd, loads it mid-build, then builds out.
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 2 tasks");

    // Nothing changed: the dyndep-discovered input is clean.
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "no work");

    // Touching the discovered input rebuilds only the consumer.
    space.tick();
    space.write("extra.h", "changed")?;
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

/// A dyndep file that doesn't mention a bound build is an error.
#[cfg(unix)]
#[test]
fn dyndep_must_mention_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule touch
  command = touch $out

rule gendd
  command = printf 'ninja_dyndep_version = 1\\n' > $out

build dd: gendd
build out: touch || dd
  dyndep = dd
",
    )?;
    let out = space.run(&mut nib_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "does not mention output 'out'");
    Ok(())
}

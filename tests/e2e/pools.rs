//! Tests for pool-limited scheduling.

use crate::*;

/// A depth-1 pool runs its members strictly one at a time.
#[cfg(unix)]
#[test]
fn depth_one_pool_serializes() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
pool serial
  depth = 1

rule slow
  command = echo start-$out >> order && sleep 0.2 && echo end-$out >> order && touch $out
  pool = serial

build a: slow
build b: slow
",
    )?;
    space.run_expect(&mut nib_command(vec!["-j", "4", "a", "b"]))?;

    let order = String::from_utf8(space.read("order")?)?;
    let lines: Vec<&str> = order.lines().collect();
    assert_eq!(lines.len(), 4);
    // Whatever the order of a and b, each start is followed by its own end.
    assert_eq!(lines[0].replace("start", "end"), lines[1]);
    assert_eq!(lines[2].replace("start", "end"), lines[3]);
    Ok(())
}

/// The console pool exists implicitly and runs builds to completion.
#[cfg(unix)]
#[test]
fn console_pool_runs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule touch_console
  command = touch $out
  pool = console

build out: touch_console
",
    )?;
    space.run_expect(&mut nib_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());
    Ok(())
}

/// Unknown pool names are manifest errors.
#[test]
fn unknown_pool_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule r
  command = whatever
  pool = nonesuch
build out: r
",
    )?;
    let out = space.run(&mut nib_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "unknown pool name 'nonesuch'");
    Ok(())
}

//! Tests for restat rules: commands that may leave their output unchanged.

use crate::*;

#[cfg(unix)]
const COPY_IF_CHANGED: &str = "
rule copy_if_changed
  command = cmp -s $in $out || cp $in $out
  restat = 1

rule append
  command = cat $in > $out && echo built >> log
";

/// Touching a source without changing its bytes runs the restat rule once
/// and nothing downstream.
#[cfg(unix)]
#[test]
fn restat_clean_propagates() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            COPY_IF_CHANGED,
            "build mid: copy_if_changed src",
            "build final: append mid",
            "",
        ]
        .join("\n"),
    )?;
    space.write("src", "contents")?;
    let out = space.run_expect(&mut nib_command(vec!["final"]))?;
    assert_output_contains(&out, "ran 2 tasks");

    // Rewrite src with identical contents: the mtime changes, the bytes
    // don't.  The copy runs, sees no change, and 'final' is spared.
    space.tick();
    space.write("src", "contents")?;
    let out = space.run_expect(&mut nib_command(vec!["final"]))?;
    assert_output_contains(&out, "ran 1 task");
    assert_eq!(space.read("log")?, b"built\n");

    // The restat verdict is durable: the next run has nothing to do.
    let out = space.run_expect(&mut nib_command(vec!["final"]))?;
    assert_output_contains(&out, "no work");
    Ok(())
}

/// An actual content change still rebuilds downstream.
#[cfg(unix)]
#[test]
fn restat_change_still_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            COPY_IF_CHANGED,
            "build mid: copy_if_changed src",
            "build final: append mid",
            "",
        ]
        .join("\n"),
    )?;
    space.write("src", "one")?;
    space.run_expect(&mut nib_command(vec!["final"]))?;

    space.tick();
    space.write("src", "two")?;
    let out = space.run_expect(&mut nib_command(vec!["final"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert_eq!(space.read("final")?, b"two");
    Ok(())
}

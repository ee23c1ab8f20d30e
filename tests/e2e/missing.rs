//! Tests for missing inputs.

use crate::*;

#[test]
fn missing_input_names_dependent() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch gone", ""].join("\n"),
    )?;
    let out = space.run(&mut nib_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(
        &out,
        "'gone', needed by 'out', missing and no known rule to make it",
    );
    Ok(())
}

/// Asking to "build" a plain source file that exists is a no-op.
#[test]
fn clean_source_target_is_no_work() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut nib_command(vec!["in"]))?;
    assert_output_contains(&out, "no work");
    Ok(())
}

use crate::*;

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut nib_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());

    Ok(())
}

#[test]
fn second_run_is_no_work() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "no work");
    Ok(())
}

#[test]
fn rebuild_on_input_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "v1")?;
    space.run_expect(&mut nib_command(vec!["out"]))?;

    space.tick();
    space.write("in", "v2")?;
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "no work");
    Ok(())
}

#[cfg(unix)]
#[test]
fn rebuild_on_command_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let manifest = |flag: &str| {
        format!(
            "rule gen\n  command = echo {} > $out\nbuild out: gen\n",
            flag
        )
    };
    space.write("build.ninja", &manifest("one"))?;
    space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"one\n");

    // Same graph, different command line: must rerun.
    space.write("build.ninja", &manifest("two"))?;
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    assert_eq!(space.read("out")?, b"two\n");
    Ok(())
}

#[test]
fn create_subdir() -> anyhow::Result<()> {
    // Run a build rule that needs a subdir to be automatically created.
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build subdir/out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut nib_command(vec!["subdir/out"]))?;
    assert!(space.read("subdir/out").is_ok());

    Ok(())
}

#[cfg(unix)]
#[test]
fn generate_rsp_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule cat
  command = cat ${out}.rsp > ${out}
  rspfile = ${out}.rsp
  rspfile_content = 1 $in 2 $in_newline 3

rule touch
  command = touch $out

build main: cat foo bar in
build foo: touch in
build bar: touch in
",
    )?;
    space.write("in", "go!")?;

    space.run_expect(&mut nib_command(vec!["main"]))?;

    // 'main' copied the contents of its rsp file into its output.
    let main = space.read("main")?;
    assert_eq!(main, b"1 foo bar in 2 foo\nbar\nin 3");
    // The rsp file itself was cleaned up afterwards.
    assert!(space.read("main.rsp").is_err());

    let out = space.run_expect(&mut nib_command(vec!["main"]))?;
    assert_output_contains(&out, "no work");
    Ok(())
}

#[cfg(unix)]
#[test]
fn keeps_rsp_with_debug_flag() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule cat
  command = cat ${out}.rsp > ${out}
  rspfile = ${out}.rsp
  rspfile_content = hello
build out: cat
",
    )?;
    space.run_expect(&mut nib_command(vec!["-d", "keeprsp", "out"]))?;
    assert_eq!(space.read("out.rsp")?, b"hello");
    Ok(())
}

/// Build with the same output listed multiple times.
#[test]
fn repeated_out() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "build dup dup: touch in",
            "build out: touch dup",
            "",
        ]
        .join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut nib_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());
    Ok(())
}

#[test]
fn phony_groups_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "build a: touch in",
            "build b: touch in",
            "build all: phony a b",
            "",
        ]
        .join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut nib_command(vec!["all"]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert!(space.read("a").is_ok());
    assert!(space.read("b").is_ok());
    Ok(())
}

#[test]
fn default_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "build a: touch in",
            "build b: touch in",
            "default a",
            "",
        ]
        .join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut nib_command(vec![]))?;
    assert!(space.read("a").is_ok());
    assert!(space.read("b").is_err());
    Ok(())
}

#[test]
fn specify_build_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build_specified.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut nib_command(vec!["-f", "build_specified.ninja", "out"]))?;
    assert!(space.read("out").is_ok());

    Ok(())
}

#[test]
fn unknown_target_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", &[TOUCH_RULE, ""].join("\n"))?;
    let out = space.run(&mut nib_command(vec!["nonesuch"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "unknown target");
    Ok(())
}

#[test]
fn dependency_cycle_fails() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build a: touch b", "build b: touch a", ""].join("\n"),
    )?;
    let out = space.run(&mut nib_command(vec!["a"]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "dependency cycle: a -> b -> a");
    Ok(())
}

#[cfg(unix)]
#[test]
fn failing_command_reports_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule fail
  command = echo boom && exit 1
build out: fail
",
    )?;
    let out = space.run(&mut nib_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "FAILED: out");
    assert_output_contains(&out, "boom");
    Ok(())
}

#[test]
fn dry_run_runs_nothing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run_expect(&mut nib_command(vec!["-n", "out"]))?;
    assert_output_contains(&out, "ran 1 task");
    assert!(space.read("out").is_err());
    // Nothing was recorded, so a real build still has work to do.
    let out = space.run_expect(&mut nib_command(vec!["out"]))?;
    assert_output_contains(&out, "ran 1 task");
    Ok(())
}

#[cfg(unix)]
#[test]
fn manifest_regeneration() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    // The manifest says how to rebuild itself from a source file, and is
    // older than that source, so the regen step runs first.
    space.write(
        "build.ninja",
        "
rule regen
  command = cp manifest.in $out
  generator = 1
rule touch
  command = touch $out
build build.ninja: regen manifest.in
build stale: touch in
",
    )?;
    space.tick();
    space.write(
        "manifest.in",
        "
rule regen
  command = cp manifest.in $out
  generator = 1
rule touch
  command = touch $out
build build.ninja: regen manifest.in
build out: touch in
",
    )?;
    space.write("in", "")?;
    // Regenerates build.ninja first, then builds 'out' from the new
    // manifest contents.
    space.run_expect(&mut nib_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());
    Ok(())
}

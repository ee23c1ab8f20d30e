//! The build log stores a line per command ever run, keyed by output path:
//! the command's hash, its start/end times, and the output's mtime.  The
//! next run's scan uses it to notice changed commands and interrupted
//! writes.
//!
//! Each run appends; on load, later entries for the same output win.  Once
//! the dead weight passes a threshold the log is rewritten ("recompacted")
//! on the next open.

use crate::disk::{Disk, MTime};
use crate::graph::{BuildId, Graph};
use crate::hash::hash_command;
use anyhow::anyhow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Write};

const VERSION_PREFIX: &str = "# ninja log v";
const CURRENT_VERSION: u32 = 5;
const OLDEST_SUPPORTED_VERSION: u32 = 4;

const MIN_COMPACTION_ENTRY_COUNT: usize = 100;
const COMPACTION_RATIO: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub output: String,
    pub command_hash: u64,
    /// Milliseconds from the start of the run.
    pub start_time: i32,
    pub end_time: i32,
    /// Nanoseconds; 0 when the output was missing after the command.
    pub mtime: i64,
}

#[derive(Default)]
pub struct BuildLog {
    entries: HashMap<String, LogEntry>,
    path: Option<String>,
    /// Opened lazily by the first record.
    file: Option<File>,
    needs_recompaction: bool,
}

impl BuildLog {
    pub fn new() -> Self {
        BuildLog::default()
    }

    /// Load the on-disk log.  A missing file is fine; a log older than the
    /// oldest supported version is silently deleted and treated as empty.
    pub fn load(&mut self, path: &str) -> anyhow::Result<()> {
        let f = match File::open(path) {
            Ok(f) => f,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(anyhow!("open {}: {}", path, err)),
        };
        let mut r = BufReader::new(f);

        let mut line = String::new();
        if read_line(&mut r, &mut line)?.is_none() {
            return Ok(());
        }
        let version: u32 = line
            .strip_prefix(VERSION_PREFIX)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        if version < OLDEST_SUPPORTED_VERSION {
            // Too old to read.  An empty log just means a full rebuild.
            drop(r);
            let _ = std::fs::remove_file(path);
            return Ok(());
        }

        let mut unique_count = 0usize;
        let mut total_count = 0usize;
        while read_line(&mut r, &mut line)?.is_some() {
            let mut fields = line.split('\t');
            let entry = (|| {
                let start_time: i32 = fields.next()?.parse().ok()?;
                let end_time: i32 = fields.next()?.parse().ok()?;
                let mtime: i64 = fields.next()?.parse().ok()?;
                let output = fields.next()?.to_string();
                let last = fields.next()?;
                let command_hash = if version >= 5 {
                    u64::from_str_radix(last, 16).ok()?
                } else {
                    hash_command(last)
                };
                Some(LogEntry {
                    output,
                    command_hash,
                    start_time,
                    end_time,
                    mtime,
                })
            })();
            let entry = match entry {
                Some(entry) => entry,
                None => continue, // Tolerate malformed lines.
            };
            total_count += 1;
            if self.entries.insert(entry.output.clone(), entry).is_none() {
                unique_count += 1;
            }
        }

        if version < CURRENT_VERSION
            || (total_count > MIN_COMPACTION_ENTRY_COUNT
                && total_count > unique_count * COMPACTION_RATIO)
        {
            self.needs_recompaction = true;
        }
        Ok(())
    }

    /// Prepare for writing; recompacts first when the load decided to.
    /// The file itself opens on the first record.
    pub fn open_for_write(
        &mut self,
        path: &str,
        is_dead: &dyn Fn(&str) -> bool,
    ) -> anyhow::Result<()> {
        if self.needs_recompaction {
            self.recompact(path, is_dead)?;
            self.needs_recompaction = false;
        }
        self.path = Some(path.to_string());
        Ok(())
    }

    fn ensure_open(&mut self) -> anyhow::Result<&mut File> {
        if self.file.is_none() {
            let path = self
                .path
                .as_ref()
                .ok_or_else(|| anyhow!("build log was not opened for writing"))?;
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map_err(|err| anyhow!("open {}: {}", path, err))?;
            if f.metadata()?.len() == 0 {
                writeln!(f, "{}{}", VERSION_PREFIX, CURRENT_VERSION)?;
            }
            self.file = Some(f);
        }
        Ok(self.file.as_mut().unwrap())
    }

    /// Record one finished command, appending an entry per output.
    pub fn record_command(
        &mut self,
        graph: &Graph,
        id: BuildId,
        start_time: i32,
        end_time: i32,
        mtime: MTime,
    ) -> anyhow::Result<()> {
        let command = graph.evaluate_command(id, true);
        let command_hash = hash_command(&command);
        let mtime = match mtime {
            MTime::Stamp(ns) => ns,
            MTime::Missing => 0,
        };
        for &out in &graph.build(id).outs {
            let entry = LogEntry {
                output: graph.file(out).name.clone(),
                command_hash,
                start_time,
                end_time,
                mtime,
            };
            let f = self.ensure_open()?;
            write_entry(f, &entry)?;
            self.entries.insert(entry.output.clone(), entry);
        }
        Ok(())
    }

    pub fn lookup(&self, output: &str) -> Option<&LogEntry> {
        self.entries.get(output)
    }

    /// Rewrite the log with only the live entries, atomically replacing the
    /// original.
    pub fn recompact(&mut self, path: &str, is_dead: &dyn Fn(&str) -> bool) -> anyhow::Result<()> {
        self.close();
        self.entries.retain(|output, _| !is_dead(output));
        let temp_path = format!("{}.recompact", path);
        self.write_all_entries(&temp_path)?;
        std::fs::rename(&temp_path, path)
            .map_err(|err| anyhow!("rename {}: {}", temp_path, err))?;
        Ok(())
    }

    /// Refresh recorded mtimes from disk, for all entries or just the named
    /// outputs, then rewrite the log.
    pub fn restat(
        &mut self,
        path: &str,
        disk: &dyn Disk,
        outputs: &[String],
    ) -> anyhow::Result<()> {
        self.close();
        for entry in self.entries.values_mut() {
            if !outputs.is_empty() && !outputs.contains(&entry.output) {
                continue;
            }
            entry.mtime = match disk.stat(&entry.output)? {
                MTime::Stamp(ns) => ns,
                MTime::Missing => 0,
            };
        }
        let temp_path = format!("{}.restat", path);
        self.write_all_entries(&temp_path)?;
        std::fs::rename(&temp_path, path)
            .map_err(|err| anyhow!("rename {}: {}", temp_path, err))?;
        Ok(())
    }

    fn write_all_entries(&self, path: &str) -> anyhow::Result<()> {
        let mut f = File::create(path).map_err(|err| anyhow!("create {}: {}", path, err))?;
        writeln!(f, "{}{}", VERSION_PREFIX, CURRENT_VERSION)?;
        let mut entries: Vec<&LogEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.output.cmp(&b.output));
        for entry in entries {
            write_entry(&mut f, entry)?;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
    }
}

/// Read one \n-terminated line; a partial line at EOF is discarded, since
/// it means the previous run died mid-append.
fn read_line(r: &mut impl BufRead, line: &mut String) -> anyhow::Result<Option<()>> {
    line.clear();
    let mut buf = Vec::new();
    r.read_until(b'\n', &mut buf)?;
    if !buf.ends_with(b"\n") {
        return Ok(None);
    }
    buf.pop();
    if buf.ends_with(b"\r") {
        buf.pop();
    }
    line.push_str(&String::from_utf8_lossy(&buf));
    Ok(Some(()))
}

fn write_entry(f: &mut File, entry: &LogEntry) -> std::io::Result<()> {
    writeln!(
        f,
        "{}\t{}\t{}\t{}\t{:x}",
        entry.start_time, entry.end_time, entry.mtime, entry.output, entry.command_hash
    )
}

//! The deps log stores dependencies discovered while running commands
//! (depfile or /showIncludes contents), so later scans can reuse them
//! without re-reading depfiles.
//!
//! On-disk it is an append-only stream of binary records.  Paths are
//! interned: a record with the high bit clear introduces a path and
//! implicitly assigns it the next dense id; a record with the high bit set
//! stores the deps for one output:
//!
//! ```text
//! name record:  u16 len, len bytes of path
//! deps record:  u16 (count | 0x8000), u24 output id, i64 mtime, count * u24 input id
//! ```
//!
//! All integers big-endian.  Later records for the same output win.

use crate::disk::MTime;
use crate::graph::{FileId, Graph};
use anyhow::{anyhow, bail};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};

/// Paths are represented as integers that are stable across executions.
#[derive(Debug, Clone, Copy)]
struct Id(u32);

const DEPS_MARK: u16 = 0x8000;
const MAX_ID: u32 = 1 << 24;

/// One output's recorded dependencies.
pub struct Deps {
    /// The output's mtime when the deps were recorded; a scan distrusts the
    /// record when the output is newer than this.
    pub mtime: i64,
    pub ins: Vec<FileId>,
}

/// An opened deps log: loaded state plus the append handle.
pub struct DepsLog {
    /// Maps db id to FileId.
    ids: Vec<FileId>,
    /// Maps FileId to db id.
    db_ids: HashMap<FileId, Id>,
    deps: HashMap<FileId, Deps>,
    w: BufWriter<File>,
}

/// Open an on-disk deps log, interning its paths into the graph.
pub fn open(path: &str, graph: &mut Graph) -> anyhow::Result<DepsLog> {
    match std::fs::OpenOptions::new().read(true).append(true).open(path) {
        Ok(f) => read(graph, f),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let f = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map_err(|err| anyhow!("create {}: {}", path, err))?;
            Ok(DepsLog::empty(f))
        }
        Err(err) => Err(anyhow!("open {}: {}", path, err)),
    }
}

enum Record {
    Name(String),
    Deps {
        out: u32,
        mtime: i64,
        ins: Vec<u32>,
    },
}

fn read_u16(r: &mut impl Read) -> std::io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u24(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 3];
    r.read_exact(&mut buf)?;
    Ok(((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32))
}

fn read_i64(r: &mut impl Read) -> std::io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

fn read_record(r: &mut impl Read) -> std::io::Result<Option<Record>> {
    let tag = match read_u16(r) {
        Ok(tag) => tag,
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    if tag & DEPS_MARK == 0 {
        let mut buf = vec![0; tag as usize];
        r.read_exact(&mut buf)?;
        let name = String::from_utf8(buf)
            .map_err(|_| std::io::Error::new(ErrorKind::InvalidData, "non-utf8 path"))?;
        Ok(Some(Record::Name(name)))
    } else {
        let count = (tag & !DEPS_MARK) as usize;
        let out = read_u24(r)?;
        let mtime = read_i64(r)?;
        let mut ins = Vec::with_capacity(count);
        for _ in 0..count {
            ins.push(read_u24(r)?);
        }
        Ok(Some(Record::Deps { out, mtime, ins }))
    }
}

fn read(graph: &mut Graph, mut f: File) -> anyhow::Result<DepsLog> {
    let mut log = DepsLogState::default();
    {
        let mut r = BufReader::new(&mut f);
        loop {
            match read_record(&mut r) {
                Ok(None) => break,
                // A truncated record at the tail means the previous run died
                // mid-write; everything before it is still good.
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
                Err(err) => bail!("read deps log: {}", err),
                Ok(Some(Record::Name(name))) => {
                    let file = graph.file_id(&name);
                    log.db_ids.insert(file, Id(log.ids.len() as u32));
                    log.ids.push(file);
                }
                Ok(Some(Record::Deps { out, mtime, ins })) => {
                    let resolve = |id: u32| -> anyhow::Result<FileId> {
                        log.ids
                            .get(id as usize)
                            .copied()
                            .ok_or_else(|| anyhow!("deps log references unknown path id {}", id))
                    };
                    let out = resolve(out)?;
                    let ins = ins.into_iter().map(resolve).collect::<anyhow::Result<_>>()?;
                    log.deps.insert(out, Deps { mtime, ins });
                }
            }
        }
    }
    Ok(DepsLog {
        ids: log.ids,
        db_ids: log.db_ids,
        deps: log.deps,
        w: BufWriter::new(f),
    })
}

#[derive(Default)]
struct DepsLogState {
    ids: Vec<FileId>,
    db_ids: HashMap<FileId, Id>,
    deps: HashMap<FileId, Deps>,
}

impl DepsLog {
    fn empty(f: File) -> Self {
        DepsLog {
            ids: Vec::new(),
            db_ids: HashMap::new(),
            deps: HashMap::new(),
            w: BufWriter::new(f),
        }
    }

    pub fn get_deps(&self, output: FileId) -> Option<&Deps> {
        self.deps.get(&output)
    }

    fn ensure_id(&mut self, graph: &Graph, file: FileId) -> anyhow::Result<Id> {
        if let Some(&id) = self.db_ids.get(&file) {
            return Ok(id);
        }
        let id = Id(self.ids.len() as u32);
        if id.0 >= MAX_ID {
            bail!("too many paths in deps log");
        }
        let name = &graph.file(file).name;
        if name.len() >= DEPS_MARK as usize {
            bail!("path too long for deps log: {}", name);
        }
        self.w.write_all(&(name.len() as u16).to_be_bytes())?;
        self.w.write_all(name.as_bytes())?;
        self.db_ids.insert(file, id);
        self.ids.push(file);
        Ok(id)
    }

    fn write_id(&mut self, id: Id) -> std::io::Result<()> {
        let n = id.0;
        self.w.write_all(&[(n >> 16) as u8, (n >> 8) as u8, n as u8])
    }

    /// Record one output's discovered deps, skipping the write when the
    /// stored record already matches.
    pub fn record_deps(
        &mut self,
        graph: &Graph,
        output: FileId,
        mtime: MTime,
        ins: &[FileId],
    ) -> anyhow::Result<()> {
        let mtime = match mtime {
            MTime::Stamp(ns) => ns,
            MTime::Missing => 0,
        };
        if let Some(existing) = self.deps.get(&output) {
            if existing.mtime == mtime && existing.ins == ins {
                return Ok(());
            }
        }
        if ins.len() >= DEPS_MARK as usize {
            bail!("too many deps for one output");
        }

        let mut db_ins = Vec::with_capacity(ins.len());
        for &input in ins {
            db_ins.push(self.ensure_id(graph, input)?);
        }
        let db_out = self.ensure_id(graph, output)?;

        self.w
            .write_all(&(ins.len() as u16 | DEPS_MARK).to_be_bytes())?;
        self.write_id(db_out)?;
        self.w.write_all(&mtime.to_be_bytes())?;
        for id in db_ins {
            self.write_id(id)?;
        }
        self.w.flush()?;

        self.deps.insert(
            output,
            Deps {
                mtime,
                ins: ins.to_vec(),
            },
        );
        Ok(())
    }
}

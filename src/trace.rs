//! Chrome trace output, for `-d trace`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_complete(&mut self, name: &str, tid: usize, start: Instant, end: Instant) {
        let _ = write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ph\": \"X\", \"ts\": {}, \"dur\": {} }},\n",
            tid,
            name,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros(),
        );
    }

    fn close(&mut self) -> std::io::Result<()> {
        let end = Instant::now();
        self.write_complete("main", 0, self.start, end);
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    *TRACE.lock().unwrap() = Some(trace);
    Ok(())
}

pub fn if_enabled(f: impl FnOnce(&mut dyn FnMut(&str, usize, Instant, Instant))) {
    let mut guard = TRACE.lock().unwrap();
    if let Some(trace) = guard.as_mut() {
        f(&mut |name, tid, start, end| trace.write_complete(name, tid, start, end));
    }
}

/// Time a scope and record it in the trace, when tracing is on.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    let end = Instant::now();
    if_enabled(|write| write(name, 0, start, end));
    result
}

pub fn write_task(name: &str, tid: usize, start: Instant, end: Instant) {
    if_enabled(|write| write(name, tid, start, end));
}

pub fn close() -> std::io::Result<()> {
    let mut guard = TRACE.lock().unwrap();
    if let Some(trace) = guard.as_mut() {
        trace.close()?;
    }
    *guard = None;
    Ok(())
}

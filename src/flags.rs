//! Process-wide debugging switches, set once from the command line before
//! the build starts and only read afterwards.

use std::sync::atomic::{AtomicBool, Ordering};

static EXPLAINING: AtomicBool = AtomicBool::new(false);
static KEEP_RSP: AtomicBool = AtomicBool::new(false);
static KEEP_DEPFILE: AtomicBool = AtomicBool::new(false);

pub fn set_explaining(on: bool) {
    EXPLAINING.store(on, Ordering::Relaxed);
}
pub fn explaining() -> bool {
    EXPLAINING.load(Ordering::Relaxed)
}

pub fn set_keep_rsp(on: bool) {
    KEEP_RSP.store(on, Ordering::Relaxed);
}
pub fn keep_rsp() -> bool {
    KEEP_RSP.load(Ordering::Relaxed)
}

pub fn set_keep_depfile(on: bool) {
    KEEP_DEPFILE.store(on, Ordering::Relaxed);
}
pub fn keep_depfile() -> bool {
    KEEP_DEPFILE.load(Ordering::Relaxed)
}

/// Print a line explaining a dirtiness decision when `-d explain` is on.
macro_rules! explain {
    ($($args:tt)*) => {
        if $crate::flags::explaining() {
            eprintln!("explain: {}", format!($($args)*));
        }
    };
}
pub(crate) use explain;

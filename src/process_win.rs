//! Implements run_command on Windows using native Windows calls.
//! See run_command comments for why.

use crate::process::Termination;
use std::io::Read;
use std::os::windows::io::{FromRawHandle, OwnedHandle};
use windows_sys::Win32::{
    Foundation::*, Security::SECURITY_ATTRIBUTES, System::Pipes::CreatePipe,
    System::Threading::*,
};

/// Construct an error from GetLastError().
fn windows_error(func: &str) -> anyhow::Error {
    let err = unsafe { GetLastError() };
    anyhow::anyhow!("{}: error {:#x}", func, err)
}

macro_rules! win_bail {
    ($func:ident) => {
        return Err(windows_error(stringify!($func)));
    };
}

/// Wrapper for PROCESS_INFORMATION that cleans up on Drop.
struct ProcessInformation(PROCESS_INFORMATION);

impl ProcessInformation {
    fn new() -> Self {
        Self(unsafe { std::mem::zeroed() })
    }
    fn as_mut_ptr(&mut self) -> *mut PROCESS_INFORMATION {
        &mut self.0
    }
}

impl Drop for ProcessInformation {
    fn drop(&mut self) {
        unsafe {
            if !self.0.hProcess.is_null() {
                CloseHandle(self.0.hProcess);
            }
            if !self.0.hThread.is_null() {
                CloseHandle(self.0.hThread);
            }
        }
    }
}

fn to_wstr(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Execute a command via `cmd /c`-less CreateProcess (the command line is
/// passed through unchanged).  Ordinarily stdout and stderr are merged into
/// a single inheritable pipe; a console command inherits our console.
pub fn run_command(cmdline: &str, use_console: bool) -> anyhow::Result<(Termination, Vec<u8>)> {
    let mut pipe_read: HANDLE = std::ptr::null_mut();
    let mut pipe_write: HANDLE = std::ptr::null_mut();
    let mut startup_info: STARTUPINFOW = unsafe { std::mem::zeroed() };
    startup_info.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
    let mut reader = None;

    if !use_console {
        let mut security_attributes = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: std::ptr::null_mut(),
            bInheritHandle: TRUE,
        };
        unsafe {
            if CreatePipe(
                &mut pipe_read,
                &mut pipe_write,
                &mut security_attributes,
                0,
            ) == 0
            {
                win_bail!(CreatePipe);
            }
            // Only the write end may leak into the child.
            if SetHandleInformation(pipe_read, HANDLE_FLAG_INHERIT, 0) == 0 {
                win_bail!(SetHandleInformation);
            }
        }
        startup_info.dwFlags = STARTF_USESTDHANDLES;
        startup_info.hStdInput = INVALID_HANDLE_VALUE;
        startup_info.hStdOutput = pipe_write;
        startup_info.hStdError = pipe_write;
        reader = Some(unsafe { OwnedHandle::from_raw_handle(pipe_read as _) });
    }

    let mut process_info = ProcessInformation::new();
    let mut cmdline_w = to_wstr(&format!("cmd.exe /c {}", cmdline));

    let ok = unsafe {
        CreateProcessW(
            std::ptr::null(),
            cmdline_w.as_mut_ptr(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            /*inherit handles=*/ TRUE,
            if use_console { 0 } else { CREATE_NEW_PROCESS_GROUP },
            std::ptr::null_mut(),
            std::ptr::null(),
            &startup_info,
            process_info.as_mut_ptr(),
        )
    };
    if ok == 0 {
        win_bail!(CreateProcessW);
    }

    // Close our copy of the write end so the pipe reports EOF once the
    // child exits.
    if !use_console {
        unsafe { CloseHandle(pipe_write) };
    }

    let mut output = Vec::new();
    if let Some(handle) = reader {
        let mut f = std::fs::File::from(handle);
        let _ = f.read_to_end(&mut output);
    }

    unsafe {
        WaitForSingleObject(process_info.0.hProcess, INFINITE);
    }

    let mut exit_code: u32 = 0;
    unsafe {
        GetExitCodeProcess(process_info.0.hProcess, &mut exit_code);
    }

    let termination = match exit_code {
        0 => Termination::Success,
        0xC000013A => Termination::Interrupted,
        _ => Termination::Failure,
    };

    Ok((termination, output))
}

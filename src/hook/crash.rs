//! Crash guard around line editing
//!
//! While a `CrashGuard` is alive, a fault on the guarded thread writes a
//! crash report to the guard's path and a notice to stderr, then carries on
//! with whatever handling was in place before. Dropping the guard restores
//! the previous handler, so guards nest.
//!
//! Rust panics go through a dispatching panic hook installed once per
//! process; the active report path lives in a per-thread stack. On Windows
//! the top-level SEH filter is swapped as well, for faults that never become
//! panics. That filter also writes a minidump, then calls the filter that was
//! installed before the outermost guard.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Once;

use tracing::error;

/// Report file name inside the configuration directory
pub const CRASH_REPORT_FILE: &str = "crash_report.txt";

/// Minidump written next to the report on Windows faults
pub const MINIDUMP_FILE: &str = "mini_dump.dmp";

thread_local! {
    static REPORT_PATHS: RefCell<Vec<PathBuf>> = const { RefCell::new(Vec::new()) };
}

static PANIC_HOOK: Once = Once::new();

/// Report path of the innermost live guard on this thread
pub fn active_report_path() -> Option<PathBuf> {
    REPORT_PATHS
        .try_with(|paths| paths.try_borrow().ok().and_then(|p| p.last().cloned()))
        .ok()
        .flatten()
}

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(path) = active_report_path() {
                let mut body = String::new();
                let message = info
                    .payload()
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| info.payload().downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                let _ = writeln!(body, "panic: {}", message);
                if let Some(location) = info.location() {
                    let _ = writeln!(body, "location: {}", location);
                }
                let thread = std::thread::current();
                let _ = writeln!(body, "thread: {}", thread.name().unwrap_or("<unnamed>"));
                let _ = writeln!(
                    body,
                    "\nbacktrace:\n{}",
                    std::backtrace::Backtrace::force_capture()
                );
                write_report(&path, &body);
            }
            previous(info);
        }));
    });
}

/// Write a crash report and tell the user where it went.
///
/// A report that cannot be written is skipped; the notice is still printed.
pub fn write_report(path: &Path, body: &str) {
    let mut stderr = std::io::stderr();
    let _ = write!(
        stderr,
        "\n!!! conline has crashed.\n!!! Something went wrong while editing the line.\n!!! Writing crash report to: {}\n",
        path.display()
    );

    let header = format!("conline {} crash report\n\n", env!("CARGO_PKG_VERSION"));
    if let Err(e) = fs::write(path, header + body) {
        let _ = writeln!(stderr, "!!! Failed to write crash report: {}", e);
    }
    error!("Crash report written to {}", path.display());
}

/// Scoped fault handler. Not `Send`: it belongs to the installing thread.
pub struct CrashGuard {
    depth: usize,
    #[cfg(windows)]
    previous_filter: seh::Filter,
    _thread_bound: PhantomData<*const ()>,
}

impl CrashGuard {
    /// Install a guard that reports into `report_path`
    pub fn install(report_path: PathBuf) -> Self {
        install_panic_hook();

        let depth = REPORT_PATHS.with(|paths| {
            let mut paths = paths.borrow_mut();
            paths.push(report_path);
            paths.len()
        });

        Self {
            depth,
            #[cfg(windows)]
            previous_filter: seh::install(),
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        #[cfg(windows)]
        seh::restore(self.previous_filter);

        let _ = REPORT_PATHS.try_with(|paths| {
            if let Ok(mut paths) = paths.try_borrow_mut() {
                paths.truncate(self.depth - 1);
            }
        });
    }
}

#[cfg(windows)]
mod seh {
    use std::fmt::Write as _;
    use std::fs::File;
    use std::os::windows::io::AsRawHandle;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use windows::Win32::Foundation::{FALSE, HANDLE};
    use windows::Win32::System::Diagnostics::Debug::{
        MiniDumpNormal, MiniDumpWriteDump, SetUnhandledExceptionFilter, EXCEPTION_POINTERS,
        LPTOP_LEVEL_EXCEPTION_FILTER, MINIDUMP_EXCEPTION_INFORMATION,
    };
    use windows::Win32::System::Threading::{
        GetCurrentProcess, GetCurrentProcessId, GetCurrentThreadId,
    };

    use super::MINIDUMP_FILE;

    const EXCEPTION_CONTINUE_SEARCH: i32 = 0;

    pub type Filter = LPTOP_LEVEL_EXCEPTION_FILTER;
    type FilterFn = unsafe extern "system" fn(*const EXCEPTION_POINTERS) -> i32;

    /// The filter that was in place before the outermost guard, 0 if none
    static CHAINED: AtomicUsize = AtomicUsize::new(0);

    fn is_ours(filter: Filter) -> bool {
        filter.map(|f| f as usize) == Some(exception_filter as FilterFn as usize)
    }

    unsafe fn write_minidump(path: &Path, info: *const EXCEPTION_POINTERS) {
        let Ok(file) = File::create(path) else {
            return;
        };
        let exception = MINIDUMP_EXCEPTION_INFORMATION {
            ThreadId: GetCurrentThreadId(),
            ExceptionPointers: info as *mut EXCEPTION_POINTERS,
            ClientPointers: FALSE,
        };
        let exception = (!info.is_null()).then_some(&exception as *const _);

        let _ = MiniDumpWriteDump(
            GetCurrentProcess(),
            GetCurrentProcessId(),
            HANDLE(file.as_raw_handle()),
            MiniDumpNormal,
            exception,
            None,
            None,
        );
    }

    pub(super) unsafe extern "system" fn exception_filter(info: *const EXCEPTION_POINTERS) -> i32 {
        if let Some(path) = super::active_report_path() {
            let mut body = String::new();
            if !info.is_null() && !(*info).ExceptionRecord.is_null() {
                let record = &*(*info).ExceptionRecord;
                let _ = writeln!(body, "exception code: {:#010x}", record.ExceptionCode.0 as u32);
                let _ = writeln!(body, "address: {:p}", record.ExceptionAddress);
            }
            let _ = writeln!(body, "thread id: {}", GetCurrentThreadId());
            super::write_report(&path, &body);

            if let Some(dir) = path.parent() {
                write_minidump(&dir.join(MINIDUMP_FILE), info);
            }
        }

        // Hand the fault on to whoever handled it before us.
        match CHAINED.load(Ordering::Acquire) {
            0 => EXCEPTION_CONTINUE_SEARCH,
            raw => {
                let previous = std::mem::transmute::<usize, FilterFn>(raw);
                previous(info)
            }
        }
    }

    pub fn install() -> Filter {
        let previous = unsafe { SetUnhandledExceptionFilter(Some(exception_filter)) };
        if !is_ours(previous) {
            let raw = previous.map(|f| f as usize).unwrap_or(0);
            CHAINED.store(raw, Ordering::Release);
        }
        previous
    }

    pub fn restore(previous: Filter) {
        unsafe {
            SetUnhandledExceptionFilter(previous);
        }
        if !is_ours(previous) {
            CHAINED.store(0, Ordering::Release);
        }
    }
}

//! Win32 implementations of the console, shared segment and host seams

use std::ffi::c_void;
use std::io;
use std::sync::Mutex;

use tracing::{info, warn};
use windows::core::{w, PCSTR, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Console::{
    GetConsoleAliasW, GetConsoleMode, GetStdHandle, ReadConsoleW, WriteConsoleW, CONSOLE_MODE,
    CONSOLE_READCONSOLE_CONTROL, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::Memory::{
    MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualQuery, FILE_MAP_READ,
    MEMORY_BASIC_INFORMATION,
};

use super::iat;
use crate::channel::SegmentSource;
use crate::hook::RealConsole;
use crate::shell::{join_command_line, HookError, HostEnvironment};

fn wide_z(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn os_error(e: windows::core::Error) -> io::Error {
    io::Error::from_raw_os_error(e.code().0)
}

/// The real console behind a pair of handles
pub struct Win32Console {
    input: HANDLE,
    output: HANDLE,
    control: Option<*const CONSOLE_READCONSOLE_CONTROL>,
}

// Safety: console handles are process-wide and usable from any thread
unsafe impl Send for Win32Console {}

impl Win32Console {
    pub fn new(input: HANDLE, output: HANDLE) -> Self {
        Self {
            input,
            output,
            control: None,
        }
    }

    /// The process's standard input and output
    pub fn std() -> Self {
        unsafe {
            Self::new(
                GetStdHandle(STD_INPUT_HANDLE).unwrap_or_default(),
                GetStdHandle(STD_OUTPUT_HANDLE).unwrap_or_default(),
            )
        }
    }

    /// Pass the host's read control block through to genuine reads
    pub fn with_control(mut self, control: *const CONSOLE_READCONSOLE_CONTROL) -> Self {
        self.control = (!control.is_null()).then_some(control);
        self
    }
}

impl RealConsole for Win32Console {
    fn write(&mut self, text: &[u16]) -> io::Result<usize> {
        let mut written: u32 = 0;
        unsafe {
            WriteConsoleW(self.output, text, Some(&mut written), None).map_err(os_error)?;
        }
        Ok(written as usize)
    }

    fn read(&mut self, buffer: &mut [u16]) -> io::Result<usize> {
        let mut read: u32 = 0;
        unsafe {
            ReadConsoleW(
                self.input,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len() as u32,
                &mut read,
                self.control,
            )
            .map_err(os_error)?;
        }
        Ok(read as usize)
    }
}

/// Look up a doskey alias defined for `exe_name`
pub fn console_alias(name: &str, exe_name: &str) -> Option<String> {
    let source = wide_z(name);
    let exe = wide_z(exe_name);
    let mut target = vec![0u16; 8192];

    let ok = unsafe {
        GetConsoleAliasW(
            PCWSTR(source.as_ptr()),
            &mut target,
            PCWSTR(exe.as_ptr()),
        )
    };
    if ok == 0 {
        return None;
    }

    let len = target.iter().position(|&c| c == 0).unwrap_or(target.len());
    Some(String::from_utf16_lossy(&target[..len]))
}

/// Named file mappings published by the injector
pub struct Win32Segments;

impl SegmentSource for Win32Segments {
    fn read_segment(&self, name: &str, len: usize) -> Option<Vec<u8>> {
        let wide = wide_z(name);

        unsafe {
            let mapping = OpenFileMappingW(FILE_MAP_READ.0, false, PCWSTR(wide.as_ptr())).ok()?;
            let view = MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, 0);
            if view.Value.is_null() {
                let _ = CloseHandle(mapping);
                return None;
            }

            // Never read past the mapped region, however short it is.
            let mut region = MEMORY_BASIC_INFORMATION::default();
            let queried = VirtualQuery(
                Some(view.Value as *const c_void),
                &mut region,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            );
            let available = if queried == 0 { 0 } else { region.RegionSize };
            let bytes =
                std::slice::from_raw_parts(view.Value as *const u8, len.min(available)).to_vec();

            let _ = UnmapViewOfFile(view);
            let _ = CloseHandle(mapping);
            Some(bytes)
        }
    }
}

/// A console function to redirect and the replacement to route it to
pub struct HookSpec {
    pub function: &'static str,
    pub replacement: usize,
    /// Installation fails if no import of a required function is found
    pub required: bool,
}

/// The real host process
pub struct Win32Host {
    hooks: Vec<HookSpec>,
    /// (original, replacement) pairs currently patched in
    patched: Mutex<Vec<(usize, usize)>>,
}

impl Win32Host {
    pub fn new(hooks: Vec<HookSpec>) -> Self {
        Self {
            hooks,
            patched: Mutex::new(Vec::new()),
        }
    }

    fn host_base() -> Result<*const u8, HookError> {
        unsafe {
            GetModuleHandleW(PCWSTR::null())
                .map(|module| module.0 as *const u8)
                .map_err(|_| HookError::BadImage("host module handle unavailable"))
        }
    }

    /// Addresses the loader may have bound `function` to
    fn real_addresses(function: &str) -> Vec<usize> {
        let name: Vec<u8> = function.bytes().chain(std::iter::once(0)).collect();
        let mut found = Vec::new();

        for module in [w!("kernelbase.dll"), w!("kernel32.dll")] {
            unsafe {
                let Ok(handle) = GetModuleHandleW(module) else {
                    continue;
                };
                if let Some(proc) = GetProcAddress(handle, PCSTR(name.as_ptr())) {
                    let address = proc as usize;
                    if !found.contains(&address) {
                        found.push(address);
                    }
                }
            }
        }
        found
    }

    fn unpatch(base: *const u8, patched: &mut Vec<(usize, usize)>) {
        for (original, replacement) in patched.drain(..).rev() {
            if let Err(e) = unsafe { iat::patch(base, replacement, original) } {
                warn!("Failed to restore import: {}", e);
            }
        }
    }
}

impl HostEnvironment for Win32Host {
    fn command_line(&self) -> String {
        join_command_line(std::env::args_os())
    }

    fn has_console_input(&self) -> bool {
        unsafe {
            let Ok(input) = GetStdHandle(STD_INPUT_HANDLE) else {
                return false;
            };
            let mut mode = CONSOLE_MODE(0);
            GetConsoleMode(input, &mut mode).is_ok()
        }
    }

    fn install_hooks(&self) -> Result<(), HookError> {
        let base = Self::host_base()?;
        let mut patched = self.patched.lock().unwrap_or_else(|e| e.into_inner());

        for hook in &self.hooks {
            let mut count = 0;
            for original in Self::real_addresses(hook.function) {
                match unsafe { iat::patch(base, original, hook.replacement) } {
                    Ok(0) => {}
                    Ok(n) => {
                        patched.push((original, hook.replacement));
                        count += n;
                    }
                    Err(e) => {
                        Self::unpatch(base, &mut patched);
                        return Err(e);
                    }
                }
            }

            if count == 0 && hook.required {
                Self::unpatch(base, &mut patched);
                return Err(HookError::ImportNotFound(hook.function));
            }
            info!("Hooked {} ({} import slots)", hook.function, count);
        }
        Ok(())
    }

    fn remove_hooks(&self) {
        let Ok(base) = Self::host_base() else {
            return;
        };
        let mut patched = self.patched.lock().unwrap_or_else(|e| e.into_inner());
        Self::unpatch(base, &mut patched);
        info!("Console hooks removed");
    }
}

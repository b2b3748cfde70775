//! DLL entry point and the hooked console functions.
//!
//! The injector loads this library into the shell process. `DllMain` wires a
//! [`Controller`] and an [`Interceptor`] together from the injected options
//! and the settings on disk; the hooked functions below route the host's
//! console traffic through the interceptor until detach.

use std::ffi::c_void;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use windows::Win32::Foundation::{BOOL, FALSE, HANDLE, HINSTANCE, TRUE};
use windows::Win32::System::Console::{
    GetStdHandle, ReadConsoleInputA, ReadConsoleW, WriteConsoleW, CONSOLE_READCONSOLE_CONTROL,
    INPUT_RECORD, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

use crate::attach::Controller;
use crate::config::SettingsStore;
use crate::editor::NativeEditor;
use crate::hook::{AliasExpander, Interceptor};
use crate::logging;
use crate::platform::win32::{console_alias, HookSpec, Win32Console, Win32Host, Win32Segments};
use crate::shell::{host_executable_name, ShellRegistry};

static INTERCEPTOR: Mutex<Option<Interceptor>> = Mutex::new(None);
static CONTROLLER: Mutex<Option<Controller>> = Mutex::new(None);

fn std_handle(which: windows::Win32::System::Console::STD_HANDLE) -> HANDLE {
    unsafe { GetStdHandle(which).unwrap_or_default() }
}

unsafe extern "system" fn hooked_write_console_w(
    output: HANDLE,
    buffer: *const c_void,
    length: u32,
    written: *mut u32,
    reserved: *const c_void,
) -> BOOL {
    let text: &[u16] = if buffer.is_null() || length == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(buffer as *const u16, length as usize)
    };

    let Ok(mut slot) = INTERCEPTOR.try_lock() else {
        return forward_write(output, text, written, reserved);
    };
    let Some(hook) = slot.as_mut() else {
        return forward_write(output, text, written, reserved);
    };

    let mut console = Win32Console::new(std_handle(STD_INPUT_HANDLE), output);
    let n = hook.on_write(&mut console, text);
    if !written.is_null() {
        *written = n as u32;
    }
    TRUE
}

unsafe fn forward_write(
    output: HANDLE,
    text: &[u16],
    written: *mut u32,
    reserved: *const c_void,
) -> BOOL {
    let written = (!written.is_null()).then_some(written);
    let reserved = (!reserved.is_null()).then_some(reserved);
    BOOL::from(WriteConsoleW(output, text, written, reserved).is_ok())
}

unsafe extern "system" fn hooked_read_console_w(
    input: HANDLE,
    buffer: *mut c_void,
    capacity: u32,
    read: *mut u32,
    control: *const CONSOLE_READCONSOLE_CONTROL,
) -> BOOL {
    let forward = || {
        let control = (!control.is_null()).then_some(control);
        BOOL::from(ReadConsoleW(input, buffer, capacity, read, control).is_ok())
    };
    if buffer.is_null() {
        return forward();
    }

    let Ok(mut slot) = INTERCEPTOR.try_lock() else {
        return forward();
    };
    let Some(hook) = slot.as_mut() else {
        return forward();
    };

    let chars = std::slice::from_raw_parts_mut(buffer as *mut u16, capacity as usize);
    let mut console = Win32Console::new(input, std_handle(STD_OUTPUT_HANDLE)).with_control(control);
    match hook.on_read(&mut console, chars) {
        Ok(n) => {
            if !read.is_null() {
                *read = n as u32;
            }
            TRUE
        }
        Err(e) => {
            warn!("Console read failed: {}", e);
            FALSE
        }
    }
}

unsafe extern "system" fn hooked_read_console_input_a(
    input: HANDLE,
    records: *mut INPUT_RECORD,
    length: u32,
    read: *mut u32,
) -> BOOL {
    if let Ok(mut slot) = INTERCEPTOR.try_lock() {
        if let Some(hook) = slot.as_mut() {
            let mut console = Win32Console::new(input, std_handle(STD_OUTPUT_HANDLE));
            hook.on_read_input(&mut console);
        }
    }

    let records: &mut [INPUT_RECORD] = if records.is_null() || length == 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(records, length as usize)
    };
    BOOL::from(ReadConsoleInputA(input, records, read).is_ok())
}

fn console_hooks() -> Vec<HookSpec> {
    vec![
        HookSpec {
            function: "ReadConsoleW",
            replacement: hooked_read_console_w as *const () as usize,
            required: true,
        },
        HookSpec {
            function: "WriteConsoleW",
            replacement: hooked_write_console_w as *const () as usize,
            required: true,
        },
        HookSpec {
            function: "ReadConsoleInputA",
            replacement: hooked_read_console_input_a as *const () as usize,
            required: false,
        },
    ]
}

fn on_attach() -> bool {
    let mut controller = Controller::new();
    controller.load_options(&Win32Segments, std::process::id());
    let config_dir = controller.config_dir().to_path_buf();

    let settings = SettingsStore::load(&config_dir);
    logging::init(&config_dir, &settings.settings().log_level);

    let exe_name = host_executable_name().unwrap_or_default();
    info!("conline attaching to '{}' (pid {})", exe_name, std::process::id());

    let editor = NativeEditor::new(
        Win32Console::std(),
        &config_dir,
        settings.settings().history_limit,
    );
    let alias_exe = exe_name.clone();
    let interceptor = Interceptor::new(Box::new(editor), settings, &config_dir)
        .with_expander(Box::new(AliasExpander::new(move |name: &str| {
            console_alias(name, &alias_exe)
        })));

    // The hooks may fire as soon as they are installed.
    *INTERCEPTOR.lock().unwrap_or_else(|e| e.into_inner()) = Some(interceptor);

    let registry = ShellRegistry::builtin(Arc::new(Win32Host::new(console_hooks())));
    if controller.attach(&exe_name, &registry).is_err() {
        INTERCEPTOR.lock().unwrap_or_else(|e| e.into_inner()).take();
        return false;
    }

    *CONTROLLER.lock().unwrap_or_else(|e| e.into_inner()) = Some(controller);
    true
}

fn on_detach() {
    let Some(mut controller) = CONTROLLER.lock().unwrap_or_else(|e| e.into_inner()).take() else {
        return;
    };
    // Hooks fall through to the real console from here on.
    let Some(mut interceptor) = INTERCEPTOR.lock().unwrap_or_else(|e| e.into_inner()).take() else {
        return;
    };

    controller.detach(&mut interceptor);
    info!("conline detached");
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn DllMain(_module: HINSTANCE, reason: u32, _reserved: *mut c_void) -> BOOL {
    match reason {
        DLL_PROCESS_ATTACH => BOOL::from(on_attach()),
        DLL_PROCESS_DETACH => {
            on_detach();
            TRUE
        }
        _ => TRUE,
    }
}

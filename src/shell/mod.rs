//! Shell adapters - per-host binding of the hook lifecycle.
//!
//! - **cmd**: `cmd.exe`, refuses non-interactive instances
//! - **powershell**: `powershell.exe`
//! - **generic**: any other console host, only bound when host checks are off
//!
//! Exactly one adapter is selected at attach time by matching the host
//! executable name against the registry, first match wins.

pub mod cmd;
pub mod generic;
pub mod powershell;

use std::ffi::OsString;
use std::sync::Arc;

use thiserror::Error;

pub use cmd::CmdShell;
pub use generic::GenericShell;
pub use powershell::PowerShell;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Host module image is malformed: {0}")]
    BadImage(&'static str),

    #[error("No import of {0} found in the host module")]
    ImportNotFound(&'static str),

    #[error("Failed to change page protection: {0}")]
    Protect(String),

    #[error("Console hooks are not supported on this platform")]
    Unsupported,
}

/// Lifecycle of a supported shell
pub trait ShellAdapter: Send {
    /// Display name used in logs and the banner
    fn name(&self) -> &str;

    /// Check that the host can be hooked. Must not allocate anything.
    fn validate(&mut self) -> bool;

    /// Install the hooks. Cleans up after itself on failure.
    fn initialise(&mut self) -> bool;

    fn shutdown(&mut self);
}

/// What adapters need to know about, and do to, the host process
pub trait HostEnvironment: Send + Sync {
    /// Raw command line of the host
    fn command_line(&self) -> String;

    /// Whether standard input is an interactive console
    fn has_console_input(&self) -> bool;

    /// Route the host's console reads and writes through the interceptor
    fn install_hooks(&self) -> Result<(), HookError>;

    /// Undo `install_hooks`
    fn remove_hooks(&self);
}

type Factory = Box<dyn Fn() -> Box<dyn ShellAdapter> + Send + Sync>;

/// Host name to adapter table plus the generic fallback
pub struct ShellRegistry {
    shells: Vec<(String, Factory)>,
    generic: Factory,
}

impl ShellRegistry {
    pub fn new<F>(generic: F) -> Self
    where
        F: Fn() -> Box<dyn ShellAdapter> + Send + Sync + 'static,
    {
        Self {
            shells: Vec::new(),
            generic: Box::new(generic),
        }
    }

    /// The supported shells, all sharing one host environment
    pub fn builtin(host: Arc<dyn HostEnvironment>) -> Self {
        let cmd_host = host.clone();
        let ps_host = host.clone();
        Self::new(move || Box::new(GenericShell::new(host.clone())))
            .register("cmd.exe", move || Box::new(CmdShell::new(cmd_host.clone())))
            .register("powershell.exe", move || Box::new(PowerShell::new(ps_host.clone())))
    }

    pub fn register<F>(mut self, exe_name: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ShellAdapter> + Send + Sync + 'static,
    {
        self.shells.push((exe_name.to_string(), Box::new(factory)));
        self
    }

    /// Pick the adapter for `exe_name` (case-insensitive). Unknown hosts get
    /// the generic adapter only when `allow_generic` is set.
    pub fn select(&self, exe_name: &str, allow_generic: bool) -> Option<Box<dyn ShellAdapter>> {
        if let Some((_, factory)) = self
            .shells
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(exe_name))
        {
            return Some(factory());
        }

        allow_generic.then(|| (self.generic)())
    }
}

/// Rebuild a command line from raw arguments. Arguments that are not valid
/// Unicode are converted lossily instead of failing.
pub fn join_command_line<I>(args: I) -> String
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Base name of the running executable
pub fn host_executable_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_name().map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Host environment that records what adapters do to it
    #[derive(Default)]
    pub struct FakeHost {
        pub command_line: String,
        pub no_console: bool,
        pub fail_install: bool,
        pub calls: Mutex<Vec<&'static str>>,
    }

    impl FakeHost {
        pub fn interactive() -> Arc<Self> {
            Arc::new(Self {
                command_line: "C:\\Windows\\system32\\cmd.exe".to_string(),
                ..Default::default()
            })
        }

        pub fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl HostEnvironment for FakeHost {
        fn command_line(&self) -> String {
            self.command_line.clone()
        }

        fn has_console_input(&self) -> bool {
            !self.no_console
        }

        fn install_hooks(&self) -> Result<(), HookError> {
            self.calls.lock().unwrap().push("install");
            if self.fail_install {
                Err(HookError::ImportNotFound("ReadConsoleW"))
            } else {
                Ok(())
            }
        }

        fn remove_hooks(&self) {
            self.calls.lock().unwrap().push("remove");
        }
    }
}

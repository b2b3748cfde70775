//! Attach / detach lifecycle
//!
//! ```text
//! Unattached -> OptionsLoaded -> ShellSelected -> Validated -> Initialised -> Running
//!      ^                                                                        |
//!      +------------------------------- ShuttingDown <--------------------------+
//! ```
//!
//! Any failure before `Running` drops straight back to `Unattached` with no
//! shell bound, so detach has nothing to tear down.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::channel::{self, InjectionOptions, SegmentSource};
use crate::config;
use crate::hook::Teardown;
use crate::shell::{ShellAdapter, ShellRegistry};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Unattached,
    OptionsLoaded,
    ShellSelected,
    Validated,
    Initialised,
    Running,
    ShuttingDown,
}

#[derive(Error, Debug, PartialEq)]
pub enum AttachError {
    #[error("Unsupported shell '{0}'")]
    UnsupportedHost(String),

    #[error("Shell '{0}' failed validation")]
    ValidationFailed(String),

    #[error("Shell '{0}' failed to initialise")]
    InitialiseFailed(String),
}

/// Drives one attach/detach cycle
pub struct Controller {
    state: AttachState,
    options: InjectionOptions,
    config_dir: Option<PathBuf>,
    shell: Option<Box<dyn ShellAdapter>>,
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Controller printing its banner and diagnostics to the given streams
    pub fn with_output(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self {
            state: AttachState::Unattached,
            options: InjectionOptions::default(),
            config_dir: None,
            shell: None,
            out,
            err,
        }
    }

    pub fn state(&self) -> AttachState {
        self.state
    }

    pub fn options(&self) -> &InjectionOptions {
        &self.options
    }

    /// Configuration directory, honouring the profile override
    pub fn config_dir(&mut self) -> &Path {
        let override_path = self.options.profile_override.as_deref();
        self.config_dir
            .get_or_insert_with(|| config::resolve_config_dir(override_path))
            .as_path()
    }

    pub fn shell_name(&self) -> Option<&str> {
        self.shell.as_deref().map(|s| s.name())
    }

    /// Read the injector's options for `process_id`
    pub fn load_options(&mut self, source: &dyn SegmentSource, process_id: u32) -> &InjectionOptions {
        self.set_options(channel::load_options(source, process_id))
    }

    /// Use already decoded options
    pub fn set_options(&mut self, options: InjectionOptions) -> &InjectionOptions {
        self.options = options;
        self.config_dir = None;
        self.state = AttachState::OptionsLoaded;
        &self.options
    }

    /// Bind, validate and initialise the shell for `exe_name`.
    ///
    /// On failure nothing stays bound and the state is `Unattached`.
    pub fn attach(&mut self, exe_name: &str, registry: &ShellRegistry) -> Result<(), AttachError> {
        if self.state == AttachState::Unattached {
            // No channel read yet: go on with whatever options are set.
            self.state = AttachState::OptionsLoaded;
        }

        let result = self.bind(exe_name, registry);
        match &result {
            Ok(()) => {
                self.state = AttachState::Running;
                self.success();
            }
            Err(e) => {
                info!("Attach declined: {}", e);
                self.shell = None;
                self.state = AttachState::Unattached;
            }
        }
        result
    }

    fn bind(&mut self, exe_name: &str, registry: &ShellRegistry) -> Result<(), AttachError> {
        let Some(shell) = registry.select(exe_name, self.options.no_host_check) else {
            return Err(AttachError::UnsupportedHost(exe_name.to_string()));
        };
        info!("Host '{}' bound to shell adapter '{}'", exe_name, shell.name());
        let shell = self.shell.insert(shell);
        self.state = AttachState::ShellSelected;

        if !shell.validate() {
            return Err(AttachError::ValidationFailed(shell.name().to_string()));
        }
        self.state = AttachState::Validated;

        if !shell.initialise() {
            let name = shell.name().to_string();
            self.failed();
            return Err(AttachError::InitialiseFailed(name));
        }
        self.state = AttachState::Initialised;
        Ok(())
    }

    fn success(&mut self) {
        if self.options.quiet {
            return;
        }
        let shell = self.shell_name().unwrap_or("unknown").to_string();
        let _ = writeln!(self.out, "conline {}", VERSION);
        let _ = writeln!(self.out, "  ** Line editing enabled for {} **\n", shell);
        let _ = self.out.flush();
    }

    fn failed(&mut self) {
        let dir = self.config_dir().display().to_string();
        error!("Failed to load conline (config dir {})", dir);
        let _ = writeln!(self.err, "Failed to load conline.\nSee log for details ({}).", dir);
        let _ = self.err.flush();
    }

    /// Tear everything down. Every step runs even if an earlier one fails.
    pub fn detach(&mut self, teardown: &mut dyn Teardown) -> bool {
        let Some(mut shell) = self.shell.take() else {
            self.state = AttachState::Unattached;
            return true;
        };

        self.state = AttachState::ShuttingDown;
        info!("Shutting down shell adapter '{}'", shell.name());
        shell.shutdown();

        if let Err(e) = teardown.save_history() {
            warn!("History not saved: {:#}", e);
        }
        if let Err(e) = teardown.shutdown_editor() {
            warn!("Line editor shutdown failed: {:#}", e);
        }
        if let Err(e) = teardown.shutdown_settings() {
            warn!("Settings shutdown failed: {:#}", e);
        }

        self.state = AttachState::Unattached;
        true
    }
}

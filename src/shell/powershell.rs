//! `powershell.exe` adapter

use std::sync::Arc;

use tracing::{error, info};

use super::{HostEnvironment, ShellAdapter};

pub struct PowerShell {
    host: Arc<dyn HostEnvironment>,
    hooked: bool,
}

impl PowerShell {
    pub fn new(host: Arc<dyn HostEnvironment>) -> Self {
        Self {
            host,
            hooked: false,
        }
    }
}

impl ShellAdapter for PowerShell {
    fn name(&self) -> &str {
        "powershell.exe"
    }

    fn validate(&mut self) -> bool {
        if !self.host.has_console_input() {
            info!("powershell.exe has no console input");
            return false;
        }
        true
    }

    fn initialise(&mut self) -> bool {
        match self.host.install_hooks() {
            Ok(()) => {
                self.hooked = true;
                true
            }
            Err(e) => {
                error!("Failed to hook powershell.exe: {}", e);
                false
            }
        }
    }

    fn shutdown(&mut self) {
        if self.hooked {
            self.host.remove_hooks();
            self.hooked = false;
        }
    }
}

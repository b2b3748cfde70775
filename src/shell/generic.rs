//! Fallback adapter for console hosts that are not known shells

use std::sync::Arc;

use tracing::error;

use super::{HostEnvironment, ShellAdapter};

pub struct GenericShell {
    host: Arc<dyn HostEnvironment>,
    hooked: bool,
}

impl GenericShell {
    pub fn new(host: Arc<dyn HostEnvironment>) -> Self {
        Self {
            host,
            hooked: false,
        }
    }
}

impl ShellAdapter for GenericShell {
    fn name(&self) -> &str {
        "generic"
    }

    fn validate(&mut self) -> bool {
        self.host.has_console_input()
    }

    fn initialise(&mut self) -> bool {
        match self.host.install_hooks() {
            Ok(()) => {
                self.hooked = true;
                true
            }
            Err(e) => {
                error!("Failed to hook host: {}", e);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::testing::FakeHost;

    #[test]
    fn test_ignores_command_line() {
        let host = Arc::new(FakeHost {
            command_line: "python.exe -c pass".to_string(),
            ..Default::default()
        });
        let mut shell = GenericShell::new(host.clone());

        assert!(shell.validate());
        assert!(shell.initialise());
        shell.shutdown();
        assert_eq!(host.calls(), vec!["install", "remove"]);
    }
}

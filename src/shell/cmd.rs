//! `cmd.exe` adapter

use std::sync::Arc;

use tracing::{error, info};

use super::{HostEnvironment, ShellAdapter};

pub struct CmdShell {
    host: Arc<dyn HostEnvironment>,
    hooked: bool,
}

impl CmdShell {
    pub fn new(host: Arc<dyn HostEnvironment>) -> Self {
        Self {
            host,
            hooked: false,
        }
    }
}

/// `cmd /c ...` runs a command and exits; only `/k` (or no switch) leaves a
/// prompt worth editing.
pub fn is_interactive(command_line: &str) -> bool {
    let mut run_and_exit = false;
    let mut keep = false;

    // The switch may be glued to its argument: `/cdir`, `/c"x.bat"`.
    for token in command_line.split_whitespace().skip(1) {
        let token = token.trim_start_matches('"').as_bytes();
        if token.len() < 2 || token[0] != b'/' {
            continue;
        }
        match token[1].to_ascii_lowercase() {
            b'c' => run_and_exit = true,
            b'k' => keep = true,
            _ => {}
        }
    }

    !run_and_exit || keep
}

impl ShellAdapter for CmdShell {
    fn name(&self) -> &str {
        "cmd.exe"
    }

    fn validate(&mut self) -> bool {
        if !self.host.has_console_input() {
            info!("cmd.exe has no console input");
            return false;
        }

        let command_line = self.host.command_line();
        if !is_interactive(&command_line) {
            info!("cmd.exe is not interactive: {}", command_line);
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
                error!("Failed to hook cmd.exe: {}", e);
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
    fn test_interactive_detection() {
        assert!(is_interactive("cmd.exe"));
        assert!(is_interactive("C:\\Windows\\system32\\cmd.exe /k doskey /macrofile=m.txt"));
        assert!(is_interactive("cmd /C foo /K"));
        assert!(!is_interactive("cmd.exe /c dir"));
        assert!(!is_interactive("cmd.exe /Q /C \"build.bat\""));
    }

    #[test]
    fn test_switch_joined_to_argument() {
        assert!(!is_interactive("cmd /cdir"));
        assert!(!is_interactive("cmd /C\"build.bat\""));
        assert!(!is_interactive("cmd \"/c\" ver"));
        assert!(is_interactive("cmd /kdoskey"));
        assert!(is_interactive("cmd /Q /D"));
    }

    #[test]
    fn test_validate_rejects_batch_runs() {
        let host = Arc::new(FakeHost {
            command_line: "cmd.exe /c build.bat".to_string(),
            ..Default::default()
        });
        let mut shell = CmdShell::new(host.clone());
        assert!(!shell.validate());
        assert!(host.calls().is_empty());
    }

    #[test]
    fn test_validate_requires_console() {
        let host = Arc::new(FakeHost {
            command_line: "cmd.exe".to_string(),
            no_console: true,
            ..Default::default()
        });
        assert!(!CmdShell::new(host).validate());
    }

    #[test]
    fn test_lifecycle() {
        let host = FakeHost::interactive();
        let mut shell = CmdShell::new(host.clone());

        assert!(shell.validate());
        assert!(shell.initialise());
        shell.shutdown();
        shell.shutdown();
        assert_eq!(host.calls(), vec!["install", "remove"]);
    }

    #[test]
    fn test_failed_install_leaves_nothing_to_remove() {
        let host = Arc::new(FakeHost {
            fail_install: true,
            ..Default::default()
        });
        let mut shell = CmdShell::new(host.clone());

        assert!(!shell.initialise());
        shell.shutdown();
        assert_eq!(host.calls(), vec!["install"]);
    }
}

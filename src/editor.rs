//! Line-editing engine interface
//!
//! The interception layer only needs three things from an engine: edit one
//! line given a prompt, persist its history, and shut down. `NativeEditor`
//! is the built-in engine. It hands the line to the console's own cooked
//! input and keeps a history file.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::history::CommandHistory;
use crate::hook::RealConsole;

/// Ctrl-Z, the console's end-of-file marker in cooked mode
const CTRL_Z: u16 = 0x1a;

/// Result of one editing session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditedLine {
    pub text: String,
    /// The user asked for end-of-file (e.g. Ctrl-D)
    pub eof: bool,
}

impl EditedLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            eof: false,
        }
    }

    pub fn eof() -> Self {
        Self {
            text: String::new(),
            eof: true,
        }
    }
}

/// A line-editing engine
pub trait LineEditor {
    /// Edit one line. `capacity` is the host buffer size in UTF-16 units.
    fn edit_line(&mut self, prompt: &str, capacity: usize) -> EditedLine;

    fn save_history(&mut self) -> anyhow::Result<()>;

    fn shutdown(&mut self) -> anyhow::Result<()>;
}

/// Cooked console input plus history
pub struct NativeEditor<C> {
    console: C,
    history: Option<CommandHistory>,
}

impl<C: RealConsole> NativeEditor<C> {
    pub fn new(console: C, config_dir: &Path, history_limit: usize) -> Self {
        Self {
            console,
            history: Some(CommandHistory::open(config_dir, history_limit)),
        }
    }

    pub fn history(&self) -> Option<&CommandHistory> {
        self.history.as_ref()
    }
}

impl<C: RealConsole> LineEditor for NativeEditor<C> {
    fn edit_line(&mut self, prompt: &str, capacity: usize) -> EditedLine {
        if !prompt.is_empty() {
            let wide: Vec<u16> = prompt.encode_utf16().collect();
            let _ = self.console.write(&wide);
        }

        let mut buffer = vec![0u16; capacity.max(2)];
        let read = match self.console.read(&mut buffer) {
            Ok(n) => n.min(buffer.len()),
            Err(e) => {
                tracing::warn!("Console read failed: {}", e);
                return EditedLine::eof();
            }
        };

        let mut line = &buffer[..read];
        if line.is_empty() || line[0] == CTRL_Z {
            return EditedLine::eof();
        }
        while let [rest @ .., last] = line {
            if *last == b'\r' as u16 || *last == b'\n' as u16 {
                line = rest;
            } else {
                break;
            }
        }

        let text = String::from_utf16_lossy(line);
        if let Some(history) = self.history.as_mut() {
            history.add(&text);
        }
        EditedLine::new(text)
    }

    fn save_history(&mut self) -> anyhow::Result<()> {
        let Some(history) = self.history.as_ref() else {
            return Ok(());
        };
        history
            .save()
            .with_context(|| format!("saving history to {}", history.path().display()))?;
        info!("Saved {} history entries", history.entries().len());
        Ok(())
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        if self.history.take().is_none() {
            anyhow::bail!("line editor already shut down");
        }
        info!("Line editor shut down");
        Ok(())
    }
}

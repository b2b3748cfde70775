//! Command history for the native line editor
//!
//! Lines are kept in memory while the hook runs and written out once at
//! teardown.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// History file name inside the configuration directory
pub const HISTORY_FILE: &str = "history";

/// A single history entry
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    /// The command text
    pub command: String,
    /// Unix timestamp
    pub timestamp: u64,
}

/// Command history storage
#[derive(Debug)]
pub struct CommandHistory {
    /// All history entries (newest last)
    entries: Vec<HistoryEntry>,
    /// File path for persistence
    file_path: PathBuf,
    /// Maximum entries
    max_entries: usize,
}

impl CommandHistory {
    /// Open the history stored in `dir`, loading whatever is already there
    pub fn open(dir: &Path, max_entries: usize) -> Self {
        let mut history = Self {
            entries: Vec::new(),
            file_path: dir.join(HISTORY_FILE),
            max_entries,
        };
        history.load();
        history
    }

    /// Load history from file
    fn load(&mut self) {
        let Ok(content) = fs::read_to_string(&self.file_path) else {
            return;
        };

        for line in content.lines() {
            if let Some((ts_str, cmd)) = line.split_once(';') {
                if let Ok(timestamp) = ts_str.parse::<u64>() {
                    self.entries.push(HistoryEntry {
                        command: cmd.to_string(),
                        timestamp,
                    });
                }
            }
        }
        self.trim();
    }

    /// Write history to file
    pub fn save(&self) -> io::Result<()> {
        let content: String = self
            .entries
            .iter()
            .map(|e| format!("{};{}\n", e.timestamp, e.command))
            .collect();
        fs::write(&self.file_path, content)
    }

    /// Add a command to history
    pub fn add(&mut self, command: &str) {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return;
        }

        // Dedup consecutive
        if let Some(last) = self.entries.last() {
            if last.command == trimmed {
                return;
            }
        }

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.entries.push(HistoryEntry {
            command: trimmed.to_string(),
            timestamp,
        });
        self.trim();
    }

    fn trim(&mut self) {
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
    }

    /// Entries, oldest first
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

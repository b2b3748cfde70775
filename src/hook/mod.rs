//! Console read/write interception.
//!
//! This module contains the state shared by the hooked console entry points:
//!
//! - **cache**: double-buffered write cache (de-flicker + prompt capture)
//! - **line**: NUL-terminated view over the host's read buffer, CRLF framing
//! - **answer**: automatic answers for single-character prompts
//! - **crash**: scoped crash guard around line editing
//! - **doskey**: macro expansion of the edited line
//!
//! # Flow
//!
//! ```text
//! host WriteConsole ──> Interceptor::on_write ──> WriteCache ──> real console
//!                                                    │ (pending slot = prompt)
//! host ReadConsole ───> Interceptor::on_read ────────┘
//!                         ├── capacity == 1: auto-answer or real read
//!                         └── otherwise: CrashGuard + LineEditor + doskey + CRLF
//! ```
//!
//! The host calls these entry points serially, so an `Interceptor` is a plain
//! `&mut` context with no internal locking.

pub mod answer;
pub mod cache;
pub mod crash;
pub mod doskey;
pub mod line;

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::SettingsStore;
use crate::editor::{EditedLine, LineEditor};

pub use answer::{AnswerClassifier, AutoAnswerTracker, AutoReply, NoAutoAnswer, PromptClassifier};
pub use cache::{CachedWrite, WriteCache, SLOT_CAPACITY};
pub use crash::{CrashGuard, CRASH_REPORT_FILE};
pub use doskey::{AliasExpander, MacroExpander, NoMacros};
pub use line::LineBuffer;

/// The console underneath the hooks
pub trait RealConsole {
    /// Write text to the real console output
    fn write(&mut self, text: &[u16]) -> io::Result<usize>;

    /// Perform a genuine read from the real console input
    fn read(&mut self, buffer: &mut [u16]) -> io::Result<usize>;
}

/// Best-effort teardown steps run at detach, in this order
pub trait Teardown {
    fn save_history(&mut self) -> anyhow::Result<()>;
    fn shutdown_editor(&mut self) -> anyhow::Result<()>;
    fn shutdown_settings(&mut self) -> anyhow::Result<()>;
}

/// Process-wide hook state
pub struct Interceptor {
    cache: WriteCache,
    tracker: AutoAnswerTracker,
    editor: Box<dyn LineEditor + Send>,
    classifier: Box<dyn AnswerClassifier + Send>,
    expander: Box<dyn MacroExpander + Send>,
    settings: SettingsStore,
    crash_report: PathBuf,
}

impl Interceptor {
    /// Create the hook state. The classifier comes from the settings and no
    /// macro expansion is applied until an expander is set.
    pub fn new(
        editor: Box<dyn LineEditor + Send>,
        settings: SettingsStore,
        config_dir: &Path,
    ) -> Self {
        let classifier = PromptClassifier::new(&settings.settings().auto_answer);
        Self {
            cache: WriteCache::new(),
            tracker: AutoAnswerTracker::new(),
            editor,
            classifier: Box::new(classifier),
            expander: Box::new(NoMacros),
            settings,
            crash_report: config_dir.join(CRASH_REPORT_FILE),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn AnswerClassifier + Send>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_expander(mut self, expander: Box<dyn MacroExpander + Send>) -> Self {
        self.expander = expander;
        self
    }

    pub fn cache(&self) -> &WriteCache {
        &self.cache
    }

    pub fn tracker(&self) -> &AutoAnswerTracker {
        &self.tracker
    }

    /// Hooked console write. Always reports the full length as written.
    pub fn on_write(&mut self, console: &mut dyn RealConsole, text: &[u16]) -> usize {
        let written = self.cache.write(console, text);
        // The old prompt was flushed, so any half-finished answer is void.
        if written.flushed_pending {
            self.tracker.reset();
        }
        written.len
    }

    /// Hooked console read.
    ///
    /// A capacity of one selects single-character semantics; anything larger
    /// reads a whole line through the editor and cannot fail.
    pub fn on_read(&mut self, console: &mut dyn RealConsole, buffer: &mut [u16]) -> io::Result<usize> {
        match buffer.len() {
            0 => Ok(0),
            1 => self.read_single(console, buffer),
            _ => Ok(self.read_line(buffer)),
        }
    }

    /// Flush the pending prompt before the host reads raw input events
    pub fn on_read_input(&mut self, console: &mut dyn RealConsole) {
        self.cache.dispatch_pending(console);
        self.tracker.reset();
    }

    fn read_single(&mut self, console: &mut dyn RealConsole, buffer: &mut [u16]) -> io::Result<usize> {
        let prompt = String::from_utf16_lossy(self.cache.pending());

        let Some(reply) = self.classifier.classify(&prompt) else {
            self.cache.dispatch_pending(console);
            self.tracker.reset();
            return console.read(buffer);
        };

        let c = match self.tracker.visit(reply) {
            AutoReply::Answer(c) => {
                debug!("Auto-answering '{}'", c);
                c
            }
            AutoReply::Newline => {
                self.cache.invalidate_pending();
                '\n'
            }
        };

        let mut units = [0u16; 2];
        buffer[0] = c.encode_utf16(&mut units)[0];
        Ok(1)
    }

    fn read_line(&mut self, buffer: &mut [u16]) -> usize {
        let prompt = String::from_utf16_lossy(self.cache.pending());
        let capacity = buffer.len();

        let edited = {
            let _guard = CrashGuard::install(self.crash_report.clone());
            let editor = &mut self.editor;
            catch_unwind(AssertUnwindSafe(|| editor.edit_line(&prompt, capacity)))
        };

        let mut line = LineBuffer::new(buffer);
        match edited {
            Ok(EditedLine { eof: true, .. }) if self.settings.settings().ctrld_exits => {
                info!("End of file from line editor, exiting shell");
                line.set("exit");
            }
            Ok(edited) => line.set(&edited.text),
            Err(_) => {
                warn!("Line editor faulted; returning an empty line");
                line.set("");
            }
        }

        // The prompt has been shown by the editor; it must not be flushed later.
        self.cache.invalidate_pending();
        self.tracker.reset();

        self.expander.expand(&mut line);
        line.append_crlf();
        line.len()
    }
}

impl Teardown for Interceptor {
    fn save_history(&mut self) -> anyhow::Result<()> {
        self.editor.save_history()
    }

    fn shutdown_editor(&mut self) -> anyhow::Result<()> {
        self.editor.shutdown()
    }

    fn shutdown_settings(&mut self) -> anyhow::Result<()> {
        self.settings.shutdown()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::testing::FakeConsole;
    use super::*;
    use crate::config::{AutoAnswerMode, Settings};

    /// Editor returning scripted lines and remembering the prompts it saw
    struct ScriptedEditor {
        lines: Vec<EditedLine>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl LineEditor for ScriptedEditor {
        fn edit_line(&mut self, prompt: &str, _capacity: usize) -> EditedLine {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.lines.is_empty() {
                panic!("scripted editor ran out of lines");
            }
            self.lines.remove(0)
        }

        fn save_history(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn shutdown(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        hook: Interceptor,
        console: FakeConsole,
        prompts: Arc<Mutex<Vec<String>>>,
        _dir: tempfile::TempDir,
    }

    fn fixture(lines: Vec<EditedLine>, settings: Settings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let editor = ScriptedEditor {
            lines,
            prompts: prompts.clone(),
        };
        let hook = Interceptor::new(
            Box::new(editor),
            SettingsStore::from_settings(settings),
            dir.path(),
        );
        Fixture {
            hook,
            console: FakeConsole::default(),
            prompts,
            _dir: dir,
        }
    }

    fn auto_yes() -> Settings {
        let mut settings = Settings::default();
        settings.auto_answer.mode = AutoAnswerMode::Yes;
        settings
    }

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn read_line(f: &mut Fixture, capacity: usize) -> String {
        let mut buffer = vec![0u16; capacity];
        let n = f.hook.on_read(&mut f.console, &mut buffer).unwrap();
        String::from_utf16_lossy(&buffer[..n])
    }

    #[test]
    fn test_prompt_goes_to_editor_not_console() {
        let mut f = fixture(vec![EditedLine::new("dir")], Settings::default());

        assert_eq!(f.hook.on_write(&mut f.console, &wide("C:\\>")), 4);
        assert_eq!(read_line(&mut f, 256), "dir\r\n");

        assert_eq!(*f.prompts.lock().unwrap(), vec!["C:\\>".to_string()]);
        assert!(f.hook.cache().pending().is_empty());

        // the consumed prompt is not flushed by the next write either
        f.hook.on_write(&mut f.console, &wide("output"));
        assert_eq!(f.console.output(), "");
    }

    #[test]
    fn test_earlier_output_flushed_before_prompt() {
        let mut f = fixture(vec![EditedLine::new("")], Settings::default());

        f.hook.on_write(&mut f.console, &wide("Volume in drive C\r\n"));
        f.hook.on_write(&mut f.console, &wide("\r\nC:\\>"));
        assert_eq!(f.console.output(), "Volume in drive C\r\n");

        assert_eq!(read_line(&mut f, 64), "\r\n");
        assert_eq!(*f.prompts.lock().unwrap(), vec!["\r\nC:\\>".to_string()]);
    }

    #[test]
    fn test_second_read_sees_empty_prompt() {
        let mut f = fixture(
            vec![EditedLine::new("a"), EditedLine::new("b")],
            Settings::default(),
        );
        f.hook.on_write(&mut f.console, &wide("P>"));
        read_line(&mut f, 32);
        read_line(&mut f, 32);
        assert_eq!(*f.prompts.lock().unwrap(), vec!["P>".to_string(), String::new()]);
    }

    #[test]
    fn test_eof_becomes_exit() {
        let mut f = fixture(vec![EditedLine::eof()], Settings::default());
        assert_eq!(read_line(&mut f, 32), "exit\r\n");

        let mut settings = Settings::default();
        settings.ctrld_exits = false;
        let mut f = fixture(vec![EditedLine::eof()], settings);
        assert_eq!(read_line(&mut f, 32), "\r\n");
    }

    #[test]
    fn test_result_truncated_to_capacity() {
        let mut f = fixture(vec![EditedLine::new("echo hello")], Settings::default());
        let mut buffer = vec![0xffffu16; 8];
        let n = f.hook.on_read(&mut f.console, &mut buffer).unwrap();

        assert_eq!(n, 7);
        assert_eq!(String::from_utf16_lossy(&buffer[..n]), "echo he");
        assert_eq!(buffer[7], 0);
    }

    #[test]
    fn test_macro_expanded_before_crlf() {
        let mut f = fixture(vec![EditedLine::new("ll src")], Settings::default());
        f.hook = f.hook.with_expander(Box::new(AliasExpander::new(|name: &str| {
            (name == "ll").then(|| "dir /w $*".to_string())
        })));
        assert_eq!(read_line(&mut f, 64), "dir /w src\r\n");
    }

    #[test]
    fn test_editor_fault_is_contained() {
        let mut f = fixture(Vec::new(), Settings::default());
        f.hook.on_write(&mut f.console, &wide("C:\\>"));

        assert_eq!(read_line(&mut f, 64), "\r\n");
        assert!(f.hook.cache().pending().is_empty());
        assert!(f._dir.path().join(CRASH_REPORT_FILE).exists());
        assert_eq!(crash::active_report_path(), None);
    }

    #[test]
    fn test_auto_answer_two_step() {
        let mut f = fixture(Vec::new(), auto_yes());
        f.hook.on_write(&mut f.console, &wide("Terminate batch job (Y/N)? "));

        let mut c = [0u16; 1];
        assert_eq!(f.hook.on_read(&mut f.console, &mut c).unwrap(), 1);
        assert_eq!(c[0], b'y' as u16);
        assert_eq!(f.hook.tracker().visit_count(), 1);
        assert!(!f.hook.cache().pending().is_empty());

        assert_eq!(f.hook.on_read(&mut f.console, &mut c).unwrap(), 1);
        assert_eq!(c[0], b'\n' as u16);
        assert_eq!(f.hook.tracker().visit_count(), 0);
        assert!(f.hook.cache().pending().is_empty());

        assert_eq!(f.console.reads, 0);
        assert_eq!(f.console.output(), "");
    }

    #[test]
    fn test_new_prompt_restarts_answer_cadence() {
        let mut f = fixture(Vec::new(), auto_yes());
        let prompt = wide("Terminate batch job (Y/N)? ");
        let mut c = [0u16; 1];

        f.hook.on_write(&mut f.console, &prompt);
        f.hook.on_read(&mut f.console, &mut c).unwrap();
        assert_eq!(c[0], b'y' as u16);
        assert_eq!(f.hook.tracker().visit_count(), 1);

        // the first prompt is flushed by the second one
        f.hook.on_write(&mut f.console, &prompt);
        assert_eq!(f.hook.tracker().visit_count(), 0);
        assert_eq!(f.console.output(), "Terminate batch job (Y/N)? ");

        assert_eq!(f.hook.on_read(&mut f.console, &mut c).unwrap(), 1);
        assert_eq!(c[0], b'y' as u16);
    }

    #[test]
    fn test_unrecognised_prompt_reads_for_real() {
        let mut f = fixture(Vec::new(), auto_yes());
        f.console = FakeConsole::with_input(&["n"]);
        f.hook.on_write(&mut f.console, &wide("Overwrite foo.txt? (Yes/No/All): "));

        let mut c = [0u16; 1];
        assert_eq!(f.hook.on_read(&mut f.console, &mut c).unwrap(), 1);
        assert_eq!(c[0], b'n' as u16);
        assert_eq!(f.console.reads, 1);
        assert_eq!(f.console.output(), "Overwrite foo.txt? (Yes/No/All): ");
        assert!(f.hook.cache().pending().is_empty());
    }

    #[test]
    fn test_line_read_resets_half_finished_answer() {
        let mut f = fixture(vec![EditedLine::new("x")], auto_yes());
        f.hook.on_write(&mut f.console, &wide("Terminate batch job (Y/N)? "));

        let mut c = [0u16; 1];
        f.hook.on_read(&mut f.console, &mut c).unwrap();
        assert_eq!(f.hook.tracker().visit_count(), 1);

        read_line(&mut f, 16);
        assert_eq!(f.hook.tracker().visit_count(), 0);
    }

    #[test]
    fn test_read_input_flushes_prompt() {
        let mut f = fixture(Vec::new(), Settings::default());
        f.hook.on_write(&mut f.console, &wide("Press any key . . ."));
        f.hook.on_read_input(&mut f.console);
        assert_eq!(f.console.output(), "Press any key . . .");
    }

    #[test]
    fn test_teardown_order_reaches_settings() {
        let mut f = fixture(Vec::new(), Settings::default());
        assert!(f.hook.save_history().is_ok());
        assert!(f.hook.shutdown_editor().is_ok());
        assert!(f.hook.shutdown_settings().is_ok());
        assert!(f.hook.shutdown_settings().is_err());
    }
}

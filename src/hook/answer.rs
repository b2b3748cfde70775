//! Automatic answers for single-character confirmation prompts
//!
//! The host's confirmation loop reads one character at a time until it sees
//! a newline, so an automatic reply takes two reads: the answer, then `\n`.

use crate::config::AutoAnswerSettings;

/// Decides whether a pending prompt gets an automatic reply
pub trait AnswerClassifier {
    /// The reply character for `prompt`, if any
    fn classify(&self, prompt: &str) -> Option<char>;
}

/// Never answers
pub struct NoAutoAnswer;

impl AnswerClassifier for NoAutoAnswer {
    fn classify(&self, _prompt: &str) -> Option<char> {
        None
    }
}

/// Matches the pending prompt against configured fragments
#[derive(Debug, Clone)]
pub struct PromptClassifier {
    reply: Option<char>,
    patterns: Vec<String>,
}

impl PromptClassifier {
    pub fn new(settings: &AutoAnswerSettings) -> Self {
        Self {
            reply: settings.mode.reply(),
            patterns: settings
                .prompts
                .iter()
                .filter(|p| !p.trim().is_empty())
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }
}

impl AnswerClassifier for PromptClassifier {
    fn classify(&self, prompt: &str) -> Option<char> {
        let reply = self.reply?;
        if prompt.is_empty() {
            return None;
        }

        let prompt = prompt.to_lowercase();
        self.patterns
            .iter()
            .any(|p| prompt.contains(p.as_str()))
            .then_some(reply)
    }
}

/// What the single-character read should hand back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoReply {
    /// The answer itself; the prompt stays cached
    Answer(char),
    /// Line terminator; the prompt is consumed
    Newline,
}

/// Visit counter for the answer / newline cadence
#[derive(Debug, Default)]
pub struct AutoAnswerTracker {
    visit_count: u32,
}

impl AutoAnswerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visit_count(&self) -> u32 {
        self.visit_count
    }

    /// Count one single-character read against an answerable prompt
    pub fn visit(&mut self, reply: char) -> AutoReply {
        self.visit_count += 1;
        if self.visit_count >= 2 {
            self.visit_count = 0;
            AutoReply::Newline
        } else {
            AutoReply::Answer(reply)
        }
    }

    /// Forget any half-finished cadence
    pub fn reset(&mut self) {
        self.visit_count = 0;
    }
}

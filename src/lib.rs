//! conline - line editing for console shells
//!
//! conline is loaded into a running shell process (cmd.exe, powershell.exe or,
//! on request, any console program) and takes over its console line reads. Whole-line
//! reads go through a line editor; everything the shell writes in between is
//! cached so the current prompt can be handed to the editor instead of being
//! printed twice.
//!
//! # Features
//!
//! - **Prompt capture**: double-buffered write cache keeps the last write back
//! - **Line editing**: pluggable editor with persistent history
//! - **Auto-answer**: optional replies to `Terminate batch job (Y/N)?`
//! - **Doskey macros**: aliases expanded before the shell sees the line
//! - **Crash containment**: an editor fault yields an empty line, not a dead shell
//!
//! # Layout
//!
//! ```text
//! channel   injector -> library option record
//! attach    attach/detach lifecycle and shell selection
//! shell     per-shell adapters (cmd.exe, powershell.exe, generic)
//! hook      the interception core
//! editor    line editor seam and the built-in editor
//! config    settings.toml and the config directory
//! platform  Win32 bindings and import table patching
//! ```

pub mod attach;
pub mod channel;
pub mod config;
pub mod editor;
pub mod history;
pub mod hook;
pub mod logging;
pub mod platform;
pub mod shell;

#[cfg(windows)]
mod dll;

//! Platform glue.
//!
//! - **iat**: import table walking (portable) and patching (Windows)
//! - **win32**: real console, shared segments, host environment (Windows)

pub mod iat;

#[cfg(windows)]
pub mod win32;

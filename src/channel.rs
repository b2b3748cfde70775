//! Argument channel between the injector and the hooked process.
//!
//! The injector publishes a fixed-size record in a named shared segment
//! (`conline_args_<pid>`) before the module is loaded. The module reads it
//! once at attach time. Anything wrong with the segment degrades to default
//! options.
//!
//! # Record layout (little-endian)
//!
//! ```text
//! offset  size  field
//!      0     4  magic         0x4E4C4E43
//!      4     2  version       1
//!      6     2  size          1040
//!      8     4  flags         bit 0 QUIET, bit 1 NO_HOST_CHECK
//!     12     4  reserved
//!     16  1024  profile_path  [u16; 512], NUL terminated
//! ```

use std::path::PathBuf;

use bitflags::bitflags;
use thiserror::Error;
use tracing::{info, warn};

/// Tag the segment name is derived from
pub const CHANNEL_TAG: &str = "conline_args";

pub const RECORD_MAGIC: u32 = 0x4E4C_4E43;
pub const RECORD_VERSION: u16 = 1;
/// Capacity of the profile path field, in UTF-16 units including the NUL
pub const PROFILE_PATH_UNITS: usize = 512;
const HEADER_SIZE: usize = 16;
pub const RECORD_SIZE: usize = HEADER_SIZE + PROFILE_PATH_UNITS * 2;

bitflags! {
    /// Boolean options packed into the record
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OptionFlags: u32 {
        const QUIET = 1 << 0;
        const NO_HOST_CHECK = 1 << 1;
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ChannelError {
    #[error("Shared segment {0} is not available")]
    Unavailable(String),

    #[error("Record too short: {0} bytes")]
    Truncated(usize),

    #[error("Bad record magic: {0:#010x}")]
    BadMagic(u32),

    #[error("Unsupported record version {version} (size {size})")]
    Version { version: u16, size: u16 },

    #[error("Profile path is not valid UTF-16")]
    BadProfilePath,
}

/// Options handed over by the injector. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectionOptions {
    /// Suppress the startup banner
    pub quiet: bool,
    /// Replaces the default configuration directory
    pub profile_override: Option<PathBuf>,
    /// Bind the generic shell adapter to unknown hosts
    pub no_host_check: bool,
}

impl InjectionOptions {
    /// Decode a published record
    pub fn decode(bytes: &[u8]) -> Result<Self, ChannelError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ChannelError::Truncated(bytes.len()));
        }

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != RECORD_MAGIC {
            return Err(ChannelError::BadMagic(magic));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        let size = u16::from_le_bytes([bytes[6], bytes[7]]);
        if version != RECORD_VERSION || size as usize != RECORD_SIZE {
            return Err(ChannelError::Version { version, size });
        }
        if bytes.len() < RECORD_SIZE {
            return Err(ChannelError::Truncated(bytes.len()));
        }

        let flags = OptionFlags::from_bits_truncate(u32::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11],
        ]));

        let path: Vec<u16> = bytes[HEADER_SIZE..RECORD_SIZE]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        let path = String::from_utf16(&path).map_err(|_| ChannelError::BadProfilePath)?;

        Ok(Self {
            quiet: flags.contains(OptionFlags::QUIET),
            profile_override: (!path.is_empty()).then(|| PathBuf::from(path)),
            no_host_check: flags.contains(OptionFlags::NO_HOST_CHECK),
        })
    }

    /// Encode into the published record form.
    ///
    /// Profile paths longer than the field are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let mut record = Vec::with_capacity(RECORD_SIZE);
        record.extend_from_slice(&RECORD_MAGIC.to_le_bytes());
        record.extend_from_slice(&RECORD_VERSION.to_le_bytes());
        record.extend_from_slice(&(RECORD_SIZE as u16).to_le_bytes());

        let mut flags = OptionFlags::empty();
        flags.set(OptionFlags::QUIET, self.quiet);
        flags.set(OptionFlags::NO_HOST_CHECK, self.no_host_check);
        record.extend_from_slice(&flags.bits().to_le_bytes());
        record.extend_from_slice(&0u32.to_le_bytes());

        let path: Vec<u16> = self
            .profile_override
            .as_ref()
            .map(|p| p.to_string_lossy().encode_utf16().collect())
            .unwrap_or_default();
        for i in 0..PROFILE_PATH_UNITS {
            let unit = if i < PROFILE_PATH_UNITS - 1 {
                path.get(i).copied().unwrap_or(0)
            } else {
                0
            };
            record.extend_from_slice(&unit.to_le_bytes());
        }
        record
    }
}

/// Something that can hand out the contents of a named shared segment
pub trait SegmentSource {
    /// Copy up to `len` bytes out of the segment `name`
    fn read_segment(&self, name: &str, len: usize) -> Option<Vec<u8>>;
}

/// Segment name for a process
pub fn segment_name(process_id: u32) -> String {
    format!("{}_{}", CHANNEL_TAG, process_id)
}

/// Read the options published for `process_id`.
///
/// One-shot: never retries, never fails. Any problem yields defaults.
pub fn load_options(source: &dyn SegmentSource, process_id: u32) -> InjectionOptions {
    let name = segment_name(process_id);
    let result = source
        .read_segment(&name, RECORD_SIZE)
        .ok_or_else(|| ChannelError::Unavailable(name.clone()))
        .and_then(|bytes| InjectionOptions::decode(&bytes));

    match result {
        Ok(options) => {
            info!(
                "Injection options: quiet={} no_host_check={} profile={:?}",
                options.quiet, options.no_host_check, options.profile_override
            );
            options
        }
        Err(e) => {
            warn!("Using default options: {}", e);
            InjectionOptions::default()
        }
    }
}

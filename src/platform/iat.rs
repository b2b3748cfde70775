//! Import address table patching
//!
//! The hooks are placed by rewriting the host module's import table entries
//! that currently point at the real console functions. Walking the table is
//! plain pointer arithmetic over the loaded image; only the write needs
//! page protection changes.

use crate::shell::HookError;

const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D;
const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;

const DOS_LFANEW_OFFSET: usize = 0x3c;
const FILE_HEADER_SIZE: usize = 20;
const IMPORT_DESCRIPTOR_SIZE: usize = 20;

// Runaway guards for corrupt images
const MAX_DESCRIPTORS: usize = 4096;
const MAX_THUNKS: usize = 65536;

unsafe fn read_u16(base: *const u8, offset: usize) -> u16 {
    std::ptr::read_unaligned(base.add(offset) as *const u16)
}

unsafe fn read_u32(base: *const u8, offset: usize) -> u32 {
    std::ptr::read_unaligned(base.add(offset) as *const u32)
}

/// Offset of the import directory entry within the optional header
fn import_directory_offset(magic: u16) -> Result<usize, HookError> {
    let expected = if cfg!(target_pointer_width = "64") {
        PE32_PLUS_MAGIC
    } else {
        PE32_MAGIC
    };
    if magic != expected {
        return Err(HookError::BadImage("optional header magic does not match this architecture"));
    }

    // data directories start at 112 (PE32+) / 96 (PE32); import is entry 1
    Ok(if magic == PE32_PLUS_MAGIC { 112 + 8 } else { 96 + 8 })
}

/// Every import slot in the image at `base` that currently holds `target`.
///
/// # Safety
///
/// `base` must point at a mapped PE image laid out the way the loader maps
/// it (RVAs are offsets from `base`).
pub unsafe fn find_slots(base: *const u8, target: usize) -> Result<Vec<*mut usize>, HookError> {
    if base.is_null() {
        return Err(HookError::BadImage("null module base"));
    }
    if read_u16(base, 0) != IMAGE_DOS_SIGNATURE {
        return Err(HookError::BadImage("missing MZ signature"));
    }

    let nt = read_u32(base, DOS_LFANEW_OFFSET) as usize;
    if read_u32(base, nt) != IMAGE_NT_SIGNATURE {
        return Err(HookError::BadImage("missing PE signature"));
    }

    let optional = nt + 4 + FILE_HEADER_SIZE;
    let directory = optional + import_directory_offset(read_u16(base, optional))?;
    let imports_rva = read_u32(base, directory) as usize;
    if imports_rva == 0 {
        return Ok(Vec::new());
    }

    let mut slots = Vec::new();
    for i in 0..MAX_DESCRIPTORS {
        let descriptor = imports_rva + i * IMPORT_DESCRIPTOR_SIZE;
        let name_rva = read_u32(base, descriptor + 12);
        let first_thunk = read_u32(base, descriptor + 16) as usize;
        if name_rva == 0 && first_thunk == 0 {
            break;
        }
        if first_thunk == 0 {
            continue;
        }

        let thunks = base.add(first_thunk) as *mut usize;
        for j in 0..MAX_THUNKS {
            let slot = thunks.add(j);
            let value = std::ptr::read_unaligned(slot);
            if value == 0 {
                break;
            }
            if value == target {
                slots.push(slot);
            }
        }
    }
    Ok(slots)
}

/// Point every import of `from` in the image at `base` to `to`.
///
/// Returns the number of slots rewritten.
///
/// # Safety
///
/// Same as [`find_slots`]; `to` must be a function with the signature of
/// `from`.
#[cfg(windows)]
pub unsafe fn patch(base: *const u8, from: usize, to: usize) -> Result<usize, HookError> {
    use windows::Win32::System::Memory::{VirtualProtect, PAGE_PROTECTION_FLAGS, PAGE_READWRITE};

    let slots = find_slots(base, from)?;
    for &slot in &slots {
        let mut old = PAGE_PROTECTION_FLAGS(0);
        VirtualProtect(slot as *const _, std::mem::size_of::<usize>(), PAGE_READWRITE, &mut old)
            .map_err(|e| HookError::Protect(e.to_string()))?;
        std::ptr::write_unaligned(slot, to);
        let mut restored = PAGE_PROTECTION_FLAGS(0);
        let _ = VirtualProtect(slot as *const _, std::mem::size_of::<usize>(), old, &mut restored);
    }
    Ok(slots.len())
}

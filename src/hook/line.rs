//! NUL-terminated view over the host's read buffer

/// Line terminator the host expects after every cooked line
pub const CRLF: [u16; 2] = [b'\r' as u16, b'\n' as u16];

/// The caller-supplied wide buffer, treated as a NUL-terminated string.
///
/// Writes never go past the end of the slice.
pub struct LineBuffer<'a> {
    buf: &'a mut [u16],
}

impl<'a> LineBuffer<'a> {
    pub fn new(buf: &'a mut [u16]) -> Self {
        Self { buf }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Characters before the first NUL (or the whole buffer if there is none)
    pub fn len(&self) -> usize {
        self.buf.iter().position(|&c| c == 0).unwrap_or(self.buf.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_wide(&self) -> &[u16] {
        &self.buf[..self.len()]
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(self.as_wide())
    }

    /// Replace the content, keeping room for the NUL
    pub fn set_wide(&mut self, text: &[u16]) {
        if self.buf.is_empty() {
            return;
        }
        let n = text.len().min(self.buf.len() - 1);
        self.buf[..n].copy_from_slice(&text[..n]);
        self.buf[n] = 0;
    }

    pub fn set(&mut self, text: &str) {
        let wide: Vec<u16> = text.encode_utf16().collect();
        self.set_wide(&wide);
    }

    /// Append `\r\n`, then force the last slot to NUL.
    ///
    /// When the line nearly fills the buffer the terminator comes out short
    /// (a lone `\r`, or nothing at all).
    pub fn append_crlf(&mut self) {
        let cap = self.buf.len();
        if cap == 0 {
            return;
        }

        let mut at = self.len();
        for &c in CRLF.iter() {
            if at >= cap {
                break;
            }
            self.buf[at] = c;
            at += 1;
        }
        if at < cap {
            self.buf[at] = 0;
        }
        self.buf[cap - 1] = 0;
    }
}

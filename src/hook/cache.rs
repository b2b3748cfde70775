//! Double-buffered console write cache
//!
//! Every hooked write lands in the active slot and the *previous* slot is
//! flushed to the real console. The slot written last therefore stays
//! pending until the next write, which lets a read take it as the prompt and
//! drop it instead of letting the host draw it.

use super::RealConsole;

/// Maximum number of UTF-16 units a slot keeps
pub const SLOT_CAPACITY: usize = 0xffff;

/// One half of the ping-pong pair
#[derive(Debug, Default)]
pub struct CacheSlot {
    /// Allocated on first use, then kept for the process lifetime
    buffer: Option<Vec<u16>>,
}

impl CacheSlot {
    fn fill(&mut self, text: &[u16]) {
        let buffer = self
            .buffer
            .get_or_insert_with(|| Vec::with_capacity(SLOT_CAPACITY + 1));
        buffer.clear();
        buffer.extend_from_slice(&text[..text.len().min(SLOT_CAPACITY)]);
    }

    fn invalidate(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.clear();
        }
    }

    pub fn text(&self) -> &[u16] {
        self.buffer.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.text().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }
}

/// Outcome of a cached write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedWrite {
    /// Length to report back to the host
    pub len: usize,
    /// A non-empty pending slot was flushed and emptied
    pub flushed_pending: bool,
}

/// The two slots plus the index of the one being filled next
#[derive(Debug, Default)]
pub struct WriteCache {
    slots: [CacheSlot; 2],
    active: usize,
}

impl WriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the slot holding the most recent write
    pub fn pending_index(&self) -> usize {
        (self.active + 1) & 1
    }

    /// Index of the slot the next write goes to
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Text of the most recent, not yet flushed write
    pub fn pending(&self) -> &[u16] {
        self.slots[self.pending_index()].text()
    }

    pub fn slot(&self, index: usize) -> Option<&CacheSlot> {
        self.slots.get(index)
    }

    /// Cache `text` and flush the previously cached write.
    ///
    /// The reported length is the full requested length even when the cached
    /// copy was truncated.
    pub fn write(&mut self, console: &mut dyn RealConsole, text: &[u16]) -> CachedWrite {
        let index = self.active;
        let previous = (index + 1) & 1;
        self.active = previous;

        let flushed_pending = !self.slots[previous].is_empty();
        self.slots[index].fill(text);
        self.dispatch(console, previous);

        CachedWrite {
            len: text.len(),
            flushed_pending,
        }
    }

    /// Write a slot to the real console and empty it
    pub fn dispatch(&mut self, console: &mut dyn RealConsole, index: usize) {
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };

        if !slot.is_empty() {
            if let Err(e) = console.write(slot.text()) {
                tracing::debug!("Cached write dropped: {}", e);
            }
        }
        slot.invalidate();
    }

    /// Flush whatever is pending
    pub fn dispatch_pending(&mut self, console: &mut dyn RealConsole) {
        let index = self.pending_index();
        self.dispatch(console, index);
    }

    /// Drop a slot's content without writing it
    pub fn invalidate(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.invalidate();
        }
    }

    pub fn invalidate_pending(&mut self) {
        let index = self.pending_index();
        self.invalidate(index);
    }

    /// Number of slots holding unflushed text
    pub fn pending_count(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::testing::FakeConsole;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_write_defers_flush_by_one() {
        let mut cache = WriteCache::new();
        let mut console = FakeConsole::default();

        assert_eq!(cache.write(&mut console, &wide("first")).len, 5);
        assert_eq!(console.output(), "");
        assert_eq!(cache.pending(), wide("first").as_slice());

        cache.write(&mut console, &wide("second"));
        assert_eq!(console.output(), "first");
        assert_eq!(cache.pending(), wide("second").as_slice());
    }

    #[test]
    fn test_at_most_one_slot_pending() {
        let mut cache = WriteCache::new();
        let mut console = FakeConsole::default();

        for i in 0..7 {
            cache.write(&mut console, &wide(&format!("line {}", i)));
            assert_eq!(cache.pending_count(), 1);
            assert_eq!(cache.pending(), wide(&format!("line {}", i)).as_slice());
        }
        assert_eq!(console.output(), "line 0line 1line 2line 3line 4line 5");
    }

    #[test]
    fn test_oversized_write_truncated_but_fully_reported() {
        let mut cache = WriteCache::new();
        let mut console = FakeConsole::default();
        let text = vec![b'a' as u16; SLOT_CAPACITY + 100];

        assert_eq!(cache.write(&mut console, &text).len, SLOT_CAPACITY + 100);
        assert_eq!(cache.pending().len(), SLOT_CAPACITY);
    }

    #[test]
    fn test_slots_allocated_lazily_and_kept() {
        let mut cache = WriteCache::new();
        let mut console = FakeConsole::default();
        assert!(!cache.slot(0).unwrap().is_allocated());

        cache.write(&mut console, &wide("x"));
        assert!(cache.slot(0).unwrap().is_allocated());
        assert!(!cache.slot(1).unwrap().is_allocated());

        cache.invalidate_pending();
        assert!(cache.slot(0).unwrap().is_allocated());
        assert!(cache.pending().is_empty());
    }

    #[test]
    fn test_invalidated_prompt_is_never_flushed() {
        let mut cache = WriteCache::new();
        let mut console = FakeConsole::default();

        cache.write(&mut console, &wide("C:\\>"));
        cache.invalidate_pending();
        cache.write(&mut console, &wide("next"));

        assert_eq!(console.output(), "");
    }

    #[test]
    fn test_write_reports_flushed_prompt() {
        let mut cache = WriteCache::new();
        let mut console = FakeConsole::default();

        assert!(!cache.write(&mut console, &wide("P>")).flushed_pending);
        assert!(cache.write(&mut console, &wide("more")).flushed_pending);

        cache.invalidate_pending();
        assert!(!cache.write(&mut console, &wide("again")).flushed_pending);
    }

    #[test]
    fn test_out_of_range_index_ignored() {
        let mut cache = WriteCache::new();
        let mut console = FakeConsole::default();
        cache.dispatch(&mut console, 2);
        cache.invalidate(5);
        assert!(cache.slot(2).is_none());
    }
}

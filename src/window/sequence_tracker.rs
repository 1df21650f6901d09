/// Lower bound of the span of sequence numbers a [SequenceTracker] knows about
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WindowStart {
    /// nothing was recorded since creation or the last [SequenceTracker::clear]
    Empty,
    /// the earliest recorded sequence number, unmasked
    Tracking(u32),
    /// the recorded span exceeded the window's capacity, so the whole window is valid
    Full,
}

/// A ring of presence bits for the most recent `size` sequence numbers of a stream of `u32`
///  sequence numbers, with wraparound at `u32::MAX`.
///
/// Sequence numbers arrive roughly in ascending order. Moving the tail forward by more than one
///  clears the bits that were skipped, so a slot that is reused after a full turn of the ring
///  does not keep the previous turn's bit. Arrivals that are 'behind' the tail by more than half
///  the window are treated as late (reordered) and only set their bit.
///
/// `first` and `last` are stored unmasked to allow distance arithmetic modulo 2^32.
pub struct SequenceTracker {
    first: WindowStart,
    last: Option<u32>,
    mask: u32,
    word_mask: u32,
    words: Vec<u32>,
}

impl SequenceTracker {
    /// `size` is the number of tracked slots. It must be a power of two and at least 32.
    pub fn new(size: u32) -> SequenceTracker {
        assert!(size.is_power_of_two(), "window size must be a power of two, was {}", size);
        assert!(size >= 32, "window size must be at least 32, was {}", size);

        SequenceTracker {
            first: WindowStart::Empty,
            last: None,
            mask: size - 1,
            word_mask: size / 32 - 1,
            words: vec![0; (size / 32) as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.mask + 1
    }

    pub fn first(&self) -> WindowStart {
        self.first
    }

    /// the 'highest' sequence number seen so far, i.e. the tail of the window
    pub fn last(&self) -> Option<u32> {
        self.last
    }

    /// Forgets the tracked span. The bit words are zeroed as well, so no slot of the previous
    ///  span can show up as present in the next one.
    pub fn clear(&mut self) {
        self.first = WindowStart::Empty;
        self.last = None;
        self.words.fill(0);
    }

    pub fn set(&mut self, seq: u32) {
        match self.first {
            WindowStart::Empty => self.first = WindowStart::Tracking(seq),
            WindowStart::Tracking(first) => {
                let distance = seq.wrapping_sub(first);
                if distance >= 1 << 31 {
                    // out of order: seq precedes first
                    self.first = WindowStart::Tracking(seq);
                }
                else if distance > self.mask {
                    self.first = WindowStart::Full;
                }
            }
            WindowStart::Full => {}
        }

        match self.last {
            None => self.last = Some(seq),
            Some(last) => {
                let distance = seq.wrapping_sub(last) & self.mask;
                if distance <= self.mask / 2 {
                    if distance > 1 {
                        self.clear_between(last, seq);
                    }
                    self.last = Some(seq);
                }
            }
        }

        let slot = seq & self.mask;
        self.words[(slot / 32) as usize] |= 1 << (slot % 32);
    }

    /// clears the bits strictly between `from` and `to`
    fn clear_between(&mut self, from: u32, to: u32) {
        let idx_start = (from & self.mask) / 32;
        let idx_end = (to & self.mask) / 32;
        let keep_start = u32::MAX >> (31 - from % 32);
        let keep_end = u32::MAX << (to % 32);

        if idx_start == idx_end {
            self.words[idx_start as usize] &= keep_start | keep_end;
        }
        else {
            let mut i = (idx_start + 1) & self.word_mask;
            while i != idx_end {
                self.words[i as usize] = 0;
                i = (i + 1) & self.word_mask;
            }
            self.words[idx_start as usize] &= keep_start;
            self.words[idx_end as usize] &= keep_end;
        }
    }

    /// Counts the present sequence numbers in `[lo, hi]` (inclusive, wrapping at the window
    ///  size), returning `(present, total)`. The span starts no earlier than the first tracked
    ///  sequence number.
    pub fn count(&self, lo: u32, hi: u32) -> (u32, u32) {
        if self.first == WindowStart::Empty {
            return (0, 0);
        }

        let mut lo = lo & self.mask;
        let hi = hi & self.mask;

        if let WindowStart::Tracking(first) = self.first {
            let f = first & self.mask;
            let contains_first = if lo <= hi {
                lo <= f && f <= hi
            }
            else {
                f >= lo || f <= hi
            };
            if contains_first {
                lo = f;
            }
        }

        let idx_start = lo / 32;
        let idx_end = hi / 32;
        let from_lo = u32::MAX << (lo % 32);
        let up_to_hi = u32::MAX >> (31 - hi % 32);

        let mut ones = 0;
        if idx_start == idx_end && lo <= hi {
            ones += (self.words[idx_start as usize] & from_lo & up_to_hi).count_ones();
        }
        else {
            let mut i = (idx_start + 1) & self.word_mask;
            while i != idx_end {
                ones += self.words[i as usize].count_ones();
                i = (i + 1) & self.word_mask;
            }
            ones += (self.words[idx_start as usize] & from_lo).count_ones();
            ones += (self.words[idx_end as usize] & up_to_hi).count_ones();
        }

        let total = match hi.wrapping_sub(lo).wrapping_add(1) & self.mask {
            0 => self.size(),
            n => n,
        };
        (ones, total)
    }

    #[cfg(test)]
    fn words(&self) -> &[u32] {
        &self.words
    }
}

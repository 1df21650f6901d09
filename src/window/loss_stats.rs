use std::time::{Duration, Instant};
use crate::window::sequence_tracker::SequenceTracker;

/// loss figures for the `count` most recent packet ids
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WindowLoss {
    pub lost: u32,
    pub count: u32,
}

/// Rolling packet loss statistics per sender, based on the packet ids of received frames.
///
/// Statistics are republished at most once per [LossStats::PUBLISH_INTERVAL], and only after the
///  tail moved by at least [LossStats::PUBLISH_STEP] ids.
pub struct LossStats {
    pub last_100: WindowLoss,
    pub last_1000: WindowLoss,
    pub last_10000: WindowLoss,

    tracker: SequenceTracker,
    published_tail: Option<u32>,
    published_at: Option<Instant>,
}

impl Default for LossStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LossStats {
    pub const WINDOW_SIZE: u32 = 1 << 16;
    /// a jump of more than this in both directions is treated as a restart of the sender
    pub const BREAK_THRESHOLD: u32 = 1000;
    pub const PUBLISH_STEP: u32 = 100;
    pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new() -> LossStats {
        LossStats {
            last_100: WindowLoss::default(),
            last_1000: WindowLoss::default(),
            last_10000: WindowLoss::default(),
            tracker: SequenceTracker::new(Self::WINDOW_SIZE),
            published_tail: None,
            published_at: None,
        }
    }

    /// Records a packet id, returning `true` if the loss figures were refreshed
    pub fn update(&mut self, packet_id: u32) -> bool {
        self.update_at(packet_id, Instant::now())
    }

    pub fn update_at(&mut self, packet_id: u32, now: Instant) -> bool {
        if let Some(tail) = self.tracker.last() {
            if tail.wrapping_sub(packet_id) > Self::BREAK_THRESHOLD
                && packet_id.wrapping_sub(tail) > Self::BREAK_THRESHOLD
            {
                self.tracker.clear();
            }
        }

        self.tracker.set(packet_id);
        let tail = match self.tracker.last() {
            Some(tail) => tail,
            None => return false,
        };

        let advance = tail.wrapping_sub(self.published_tail.unwrap_or(0));
        let interval_elapsed = match self.published_at {
            Some(at) => now.saturating_duration_since(at) >= Self::PUBLISH_INTERVAL,
            None => true,
        };
        if advance < Self::PUBLISH_STEP || !interval_elapsed {
            return false;
        }

        if self.published_tail.is_some() && advance < Self::WINDOW_SIZE / 4 {
            self.last_100 = self.tail_loss(100);
            self.last_1000 = self.tail_loss(1000);
            self.last_10000 = self.tail_loss(10000);
            self.published_tail = Some(tail);
            self.published_at = Some(now);
            true
        }
        else {
            // first publication, or an implausible jump: re-anchor without publishing
            self.published_tail = Some(tail);
            false
        }
    }

    fn tail_loss(&self, len: u32) -> WindowLoss {
        let tail = match self.tracker.last() {
            Some(tail) => tail,
            None => return WindowLoss::default(),
        };
        let (present, total) = self.tracker.count(tail.wrapping_sub(len - 1), tail);
        WindowLoss {
            lost: total - present,
            count: total,
        }
    }
}

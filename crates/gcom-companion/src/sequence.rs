//! Image sequence gap detection.
//!
//! Images carry an 8-bit sequence number that wraps from 255 to 0. A gap is
//! any jump other than the next value modulo 256.

use tracing::debug;

/// A break in the image sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    /// Last sequence number seen before the gap.
    pub from: u8,
    /// Sequence number that arrived out of order.
    pub to: u8,
}

impl SequenceGap {
    /// Number of images that would have fit between `from` and `to`.
    pub fn missing(&self) -> u8 {
        self.to.wrapping_sub(self.from).wrapping_sub(1)
    }
}

/// Tracks the last observed image sequence number.
#[derive(Debug, Default, Clone)]
pub struct ImageSequenceTracker {
    previous: Option<u8>,
}

impl ImageSequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sequence` and report a gap if it does not follow the previous one.
    pub fn observe(&mut self, sequence: u8) -> Option<SequenceGap> {
        let gap = match self.previous {
            Some(prev) if sequence != prev.wrapping_add(1) => Some(SequenceGap {
                from: prev,
                to: sequence,
            }),
            _ => None,
        };
        if let Some(gap) = gap {
            debug!("image sequence gap {} -> {} ({} missing)", gap.from, gap.to, gap.missing());
        }
        self.previous = Some(sequence);
        gap
    }

    /// Forget the previous sequence number.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn previous(&self) -> Option<u8> {
        self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaps(sequence: &[u8]) -> Vec<SequenceGap> {
        let mut tracker = ImageSequenceTracker::new();
        sequence.iter().filter_map(|&s| tracker.observe(s)).collect()
    }

    #[test]
    fn test_contiguous_run_has_no_gaps() {
        assert!(gaps(&[0, 1, 2, 3]).is_empty());
    }

    #[test]
    fn test_wraparound_is_not_a_gap() {
        assert!(gaps(&[254, 255, 0, 1]).is_empty());
    }

    #[test]
    fn test_single_skip_reports_one_gap() {
        assert_eq!(gaps(&[0, 2]), vec![SequenceGap { from: 0, to: 2 }]);
        assert_eq!(SequenceGap { from: 0, to: 2 }.missing(), 1);
    }

    #[test]
    fn test_gap_across_wrap() {
        let found = gaps(&[253, 1]);
        assert_eq!(found, vec![SequenceGap { from: 253, to: 1 }]);
        assert_eq!(found[0].missing(), 3);
    }

    #[test]
    fn test_repeat_and_reset() {
        let mut tracker = ImageSequenceTracker::new();
        assert_eq!(tracker.observe(10), None);
        assert_eq!(tracker.observe(10), Some(SequenceGap { from: 10, to: 10 }));
        tracker.reset();
        assert_eq!(tracker.previous(), None);
        assert_eq!(tracker.observe(99), None);
    }
}

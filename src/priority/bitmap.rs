//! Two-level priority bitmap.
//!
//! `major` has bit `i` set iff `minor[i]` is non-zero; `minor[i]` bit `j`
//! stands for priority level `16 * i + j`. Both lookups are a single
//! `trailing_zeros`, so finding the most important non-empty level is O(1)
//! regardless of how many levels are in use.

use super::PriorityLevel;

/// Priority bitmap for up to [`PriorityBitmap::LEVELS`] levels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityBitmap {
    major: u16,
    minor: [u16; 16],
}

impl PriorityBitmap {
    /// Number of priority levels the bitmap can track.
    pub const LEVELS: usize = 256;

    pub const fn new() -> Self {
        Self {
            major: 0,
            minor: [0; 16],
        }
    }

    #[inline]
    fn split(level: PriorityLevel) -> (usize, u16) {
        debug_assert!((level as usize) < Self::LEVELS, "priority {} out of range", level);
        ((level as usize >> 4) & 0xf, 1u16 << (level & 0xf))
    }

    /// Mark `level` as having ready nodes.
    pub fn add(&mut self, level: PriorityLevel) {
        let (major, bit) = Self::split(level);
        self.minor[major] |= bit;
        self.major |= 1 << major;
    }

    /// Mark `level` as empty.
    pub fn remove(&mut self, level: PriorityLevel) {
        let (major, bit) = Self::split(level);
        self.minor[major] &= !bit;
        if self.minor[major] == 0 {
            self.major &= !(1 << major);
        }
    }

    pub fn contains(&self, level: PriorityLevel) -> bool {
        let (major, bit) = Self::split(level);
        self.minor[major] & bit != 0
    }

    pub fn is_empty(&self) -> bool {
        self.major == 0
    }

    /// Most important (numerically lowest) marked level.
    pub fn highest(&self) -> Option<PriorityLevel> {
        if self.major == 0 {
            return None;
        }
        let major = self.major.trailing_zeros();
        let minor = self.minor[major as usize].trailing_zeros();
        Some((major << 4) | minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bitmap() {
        let bitmap = PriorityBitmap::new();
        assert!(bitmap.is_empty());
        assert_eq!(bitmap.highest(), None);
    }

    #[test]
    fn test_highest_tracks_adds_and_removes() {
        let mut bitmap = PriorityBitmap::new();
        bitmap.add(200);
        bitmap.add(17);
        bitmap.add(255);
        assert_eq!(bitmap.highest(), Some(17));

        bitmap.add(16);
        assert_eq!(bitmap.highest(), Some(16));

        bitmap.remove(16);
        bitmap.remove(17);
        assert_eq!(bitmap.highest(), Some(200));
        assert!(bitmap.contains(255));
        assert!(!bitmap.contains(17));

        bitmap.remove(200);
        bitmap.remove(255);
        assert!(bitmap.is_empty());
    }

    #[test]
    fn test_level_zero() {
        let mut bitmap = PriorityBitmap::new();
        bitmap.add(0);
        bitmap.add(1);
        assert_eq!(bitmap.highest(), Some(0));
        bitmap.remove(0);
        assert_eq!(bitmap.highest(), Some(1));
    }
}

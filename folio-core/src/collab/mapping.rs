//! Position mapping through document changes.
//!
//! Every applied [`Step`](super::Step) yields a [`StepMap`]: the list of
//! replaced ranges expressed in the coordinates of the document *before* the
//! step. A [`Mapping`] chains step maps so a position remembered before a
//! transaction can be carried to the document after it.

use serde::{Deserialize, Serialize};

/// Which side a position sticks to when content is inserted exactly at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    /// Stay before inserted content.
    Before,
    /// Move past inserted content.
    After,
}

/// Capability to carry a position through document changes.
pub trait PositionMapper {
    fn map_pos(&self, pos: usize, bias: Bias) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ReplacedRange {
    start: usize,
    old_len: usize,
    new_len: usize,
}

/// Replaced ranges of one step, sorted by start, non-overlapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMap {
    ranges: Vec<ReplacedRange>,
}

impl StepMap {
    pub fn identity() -> Self {
        Self::default()
    }

    /// A single replacement of `old_len` bytes at `start` by `new_len` bytes.
    pub fn replace(start: usize, old_len: usize, new_len: usize) -> Self {
        if old_len == 0 && new_len == 0 {
            return Self::identity();
        }
        Self {
            ranges: vec![ReplacedRange { start, old_len, new_len }],
        }
    }

    pub fn is_identity(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl PositionMapper for StepMap {
    fn map_pos(&self, pos: usize, bias: Bias) -> usize {
        let mut diff: isize = 0;
        for range in &self.ranges {
            if range.start > pos {
                break;
            }
            let end = range.start + range.old_len;
            if pos <= end {
                let stick_before = if range.old_len == 0 {
                    bias == Bias::Before
                } else if pos == range.start {
                    true
                } else if pos == end {
                    false
                } else {
                    bias == Bias::Before
                };
                let base = (range.start as isize + diff) as usize;
                return if stick_before { base } else { base + range.new_len };
            }
            diff += range.new_len as isize - range.old_len as isize;
        }
        (pos as isize + diff).max(0) as usize
    }
}

/// An ordered chain of step maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    maps: Vec<StepMap>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, map: StepMap) {
        if !map.is_identity() {
            self.maps.push(map);
        }
    }

    /// Append every map of `other` after this mapping's maps.
    pub fn extend(&mut self, other: Mapping) {
        self.maps.extend(other.maps);
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl PositionMapper for Mapping {
    fn map_pos(&self, pos: usize, bias: Bias) -> usize {
        self.maps.iter().fold(pos, |pos, map| map.map_pos(pos, bias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_shifts_following_positions() {
        let map = StepMap::replace(5, 0, 3);
        assert_eq!(map.map_pos(2, Bias::After), 2);
        assert_eq!(map.map_pos(9, Bias::After), 12);
    }

    #[test]
    fn test_bias_at_insertion_point() {
        let map = StepMap::replace(5, 0, 3);
        assert_eq!(map.map_pos(5, Bias::Before), 5);
        assert_eq!(map.map_pos(5, Bias::After), 8);
    }

    #[test]
    fn test_deletion_collapses_positions_inside() {
        let map = StepMap::replace(4, 6, 0);
        assert_eq!(map.map_pos(7, Bias::After), 4);
        assert_eq!(map.map_pos(10, Bias::After), 4);
        assert_eq!(map.map_pos(12, Bias::After), 6);
    }

    #[test]
    fn test_mapping_chains_steps() {
        let mut mapping = Mapping::new();
        mapping.push(StepMap::replace(0, 0, 4));
        mapping.push(StepMap::identity());
        mapping.push(StepMap::replace(2, 2, 0));
        assert_eq!(mapping.map_pos(3, Bias::After), 5);
        assert!(!mapping.is_empty());
    }
}

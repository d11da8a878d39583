//! Frame index: maps frame numbers to byte ranges in the data file.
//!
//! The index is the only way into the data file. Entries are write-once;
//! the single field ever rewritten is `finalized`, flipped in bulk when the
//! first full encoding pass of an animation completes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Frame number within an animation.
pub type FrameNumber = u32;

/// On-disk layout version of the serialized index.
pub const INDEX_VERSION: u32 = 1;

/// Location of one compressed frame blob inside the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    /// Byte offset from the start of the data file.
    pub offset: u64,
    /// Blob length in bytes.
    pub length: u64,
    /// Whether the animation had completed a full pass when this was last persisted.
    pub finalized: bool,
}

impl FrameDescriptor {
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length,
            finalized: false,
        }
    }

    /// One past the last byte of this blob, `None` if the range overflows.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

/// Playback metadata recorded by the renderer on first use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimationInfo {
    pub fps: u32,
    pub start_frame: FrameNumber,
    pub end_frame: FrameNumber,
}

impl AnimationInfo {
    /// Number of frames in `[start_frame, end_frame]`; zero for an inverted range.
    pub fn frame_count(&self) -> u64 {
        if self.end_frame < self.start_frame {
            return 0;
        }
        u64::from(self.end_frame - self.start_frame) + 1
    }

    /// Frame numbers of one full pass.
    pub fn frames(&self) -> std::ops::RangeInclusive<FrameNumber> {
        self.start_frame..=self.end_frame
    }
}

/// Frame number → descriptor mapping plus the animation-wide finalized flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameIndexMap {
    version: u32,
    finalized: bool,
    info: Option<AnimationInfo>,
    frames: BTreeMap<FrameNumber, FrameDescriptor>,
}

impl FrameIndexMap {
    /// Create an empty, unfinalized map.
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            ..Default::default()
        }
    }

    pub fn get(&self, frame: FrameNumber) -> Option<&FrameDescriptor> {
        self.frames.get(&frame)
    }

    pub fn contains(&self, frame: FrameNumber) -> bool {
        self.frames.contains_key(&frame)
    }

    /// Record a descriptor. Returns `false` and leaves the map untouched if the
    /// frame is already present.
    pub fn insert(&mut self, frame: FrameNumber, mut descriptor: FrameDescriptor) -> bool {
        if self.frames.contains_key(&frame) {
            return false;
        }
        descriptor.finalized = self.finalized;
        self.frames.insert(frame, descriptor);
        true
    }

    /// Drop a descriptor whose blob turned out to be unreadable.
    pub fn remove(&mut self, frame: FrameNumber) -> Option<FrameDescriptor> {
        self.frames.remove(&frame)
    }

    /// Rewrite the finalized flag on the map and on every descriptor.
    pub fn mark_all_finalized(&mut self, flag: bool) {
        self.finalized = flag;
        for descriptor in self.frames.values_mut() {
            descriptor.finalized = flag;
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn info(&self) -> Option<AnimationInfo> {
        self.info
    }

    pub fn set_info(&mut self, info: AnimationInfo) {
        self.info = Some(info);
    }

    /// Known frame numbers in ascending order.
    pub fn frames(&self) -> impl Iterator<Item = FrameNumber> + '_ {
        self.frames.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Largest end offset over all descriptors; the data file must be at least this long.
    pub fn data_extent(&self) -> u64 {
        self.frames
            .values()
            .filter_map(FrameDescriptor::end)
            .max()
            .unwrap_or(0)
    }

    /// Drop every descriptor reaching past `len` bytes. Returns how many were dropped.
    pub fn retain_within(&mut self, len: u64) -> usize {
        let before = self.frames.len();
        self.frames.retain(|_, d| d.end().is_some_and(|end| end <= len));
        before - self.frames.len()
    }

    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a serialized index. Anything unreadable, from another layout
    /// version, or with overlapping ranges yields an empty map.
    pub fn deserialize(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::new();
        }
        match serde_json::from_slice::<FrameIndexMap>(bytes) {
            Ok(map) if map.version != INDEX_VERSION => {
                warn!(version = map.version, "Index layout version mismatch, starting cold");
                Self::new()
            }
            Ok(map) if !map.ranges_are_disjoint() => {
                warn!("Index contains overlapping or overflowing ranges, starting cold");
                Self::new()
            }
            Ok(map) => map,
            Err(e) => {
                warn!("Unreadable frame index, starting cold: {e}");
                Self::new()
            }
        }
    }

    fn ranges_are_disjoint(&self) -> bool {
        let mut ranges = Vec::with_capacity(self.frames.len());
        for descriptor in self.frames.values() {
            match descriptor.end() {
                Some(end) => ranges.push((descriptor.offset, end)),
                None => return false,
            }
        }
        ranges.sort_unstable();
        ranges.windows(2).all(|w| w[0].1 <= w[1].0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_write_once() {
        let mut map = FrameIndexMap::new();
        assert!(map.insert(3, FrameDescriptor::new(0, 100)));
        assert!(!map.insert(3, FrameDescriptor::new(100, 50)));

        let d = map.get(3).unwrap();
        assert_eq!((d.offset, d.length), (0, 100));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_mark_all_finalized() {
        let mut map = FrameIndexMap::new();
        map.insert(0, FrameDescriptor::new(0, 10));
        map.insert(1, FrameDescriptor::new(10, 10));
        assert!(!map.is_finalized());

        map.mark_all_finalized(true);
        assert!(map.is_finalized());
        assert!(map.get(0).unwrap().finalized);
        assert!(map.get(1).unwrap().finalized);

        // Late inserts inherit the map-wide flag.
        map.insert(2, FrameDescriptor::new(20, 10));
        assert!(map.get(2).unwrap().finalized);
    }

    #[test]
    fn test_serialize_roundtrip_with_info() {
        let mut map = FrameIndexMap::new();
        map.insert(0, FrameDescriptor::new(0, 42));
        map.insert(7, FrameDescriptor::new(42, 8));
        map.set_info(AnimationInfo {
            fps: 30,
            start_frame: 0,
            end_frame: 59,
        });
        map.mark_all_finalized(true);

        let bytes = map.serialize().unwrap();
        let decoded = FrameIndexMap::deserialize(&bytes);
        assert_eq!(decoded, map);
        assert_eq!(decoded.info().unwrap().frame_count(), 60);
        assert_eq!(decoded.data_extent(), 50);
    }

    #[test]
    fn test_garbage_yields_empty_map() {
        let map = FrameIndexMap::deserialize(b"\x00\xffnot json at all");
        assert!(map.is_empty());
        assert!(!map.is_finalized());
    }

    #[test]
    fn test_version_mismatch_yields_empty_map() {
        let json = br#"{"version":99,"finalized":true,"info":null,"frames":{"0":{"offset":0,"length":4,"finalized":true}}}"#;
        let map = FrameIndexMap::deserialize(json);
        assert!(map.is_empty());
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let json = br#"{"version":1,"finalized":true,"info":null,"frames":{"0":{"offset":0,"length":10,"finalized":true},"1":{"offset":5,"length":10,"finalized":true}}}"#;
        let map = FrameIndexMap::deserialize(json);
        assert!(map.is_empty());
    }

    #[test]
    fn test_overflowing_ranges_rejected() {
        let json = format!(
            r#"{{"version":1,"finalized":true,"info":null,"frames":{{"0":{{"offset":{},"length":10,"finalized":true}},"1":{{"offset":{},"length":1,"finalized":true}}}}}}"#,
            u64::MAX - 1,
            u64::MAX
        );
        let map = FrameIndexMap::deserialize(json.as_bytes());
        assert!(map.is_empty());
    }

    #[test]
    fn test_retain_within_drops_out_of_bounds() {
        let mut map = FrameIndexMap::new();
        map.insert(0, FrameDescriptor::new(0, 10));
        map.insert(1, FrameDescriptor::new(10, 10));
        map.insert(2, FrameDescriptor::new(20, u64::MAX));

        assert_eq!(map.retain_within(15), 2);
        assert_eq!(map.frames().collect::<Vec<_>>(), vec![0]);
        assert_eq!(map.data_extent(), 10);
    }

    #[test]
    fn test_frame_count_edges() {
        let full = AnimationInfo {
            fps: 30,
            start_frame: 0,
            end_frame: u32::MAX,
        };
        assert_eq!(full.frame_count(), u64::from(u32::MAX) + 1);

        let inverted = AnimationInfo {
            fps: 30,
            start_frame: 10,
            end_frame: 5,
        };
        assert_eq!(inverted.frame_count(), 0);
        assert_eq!(inverted.frames().count(), 0);
    }
}

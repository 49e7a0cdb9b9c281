// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! In-memory index over closed (and still-open) recording segments, keyed
//! by `(camera_id, started_at)` so per-camera history is naturally ordered
//! and range queries are a `BTreeMap` range scan (§3 Segment, §8).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::pipeline::Segment;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IndexKey {
    camera_id: String,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SegmentIndex {
    entries: BTreeMap<IndexKey, Segment>,
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a segment's record (an update happens when a
    /// segment is later reported with an `ended_at`).
    pub fn insert(&mut self, segment: Segment) {
        let key = IndexKey {
            camera_id: segment.camera_id.clone(),
            started_at: segment.started_at,
        };
        self.entries.insert(key, segment);
    }

    pub fn segments_for_camera(&self, camera_id: &str) -> Vec<&Segment> {
        self.entries
            .iter()
            .filter(|(k, _)| k.camera_id == camera_id)
            .map(|(_, v)| v)
            .collect()
    }

    /// Segments whose lifetime overlaps `[from, to)`. An open segment
    /// (`ended_at` is `None`) is treated as extending to "now".
    pub fn segments_in_range(
        &self,
        camera_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<&Segment> {
        self.entries
            .iter()
            .filter(|(k, _)| k.camera_id == camera_id)
            .map(|(_, v)| v)
            .filter(|seg| {
                let end = seg.ended_at.unwrap_or_else(Utc::now);
                seg.started_at < to && end > from
            })
            .collect()
    }

    pub fn all_segments(&self) -> Vec<&Segment> {
        self.entries.values().collect()
    }

    /// Paths of segments still open (no `ended_at` yet); retention sweeps
    /// must never delete these regardless of file mtime.
    pub fn open_segment_paths(&self) -> Vec<PathBuf> {
        self.entries
            .values()
            .filter(|s| s.ended_at.is_none())
            .map(|s| s.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seg(camera_id: &str, started_at: DateTime<Utc>, ended: Option<DateTime<Utc>>) -> Segment {
        Segment {
            camera_id: camera_id.to_string(),
            path: PathBuf::from(format!("{camera_id}_{}.mp4", started_at.timestamp())),
            started_at,
            ended_at: ended,
            byte_size: 1024,
        }
    }

    #[test]
    fn range_query_finds_overlapping_segments_only() {
        let mut idx = SegmentIndex::new();
        let t0 = Utc::now();
        idx.insert(seg("cam_1", t0, Some(t0 + Duration::seconds(60))));
        idx.insert(seg("cam_1", t0 + Duration::seconds(120), Some(t0 + Duration::seconds(180))));

        let hits = idx.segments_in_range("cam_1", t0 + Duration::seconds(30), t0 + Duration::seconds(90));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn open_segment_is_excluded_from_retention_candidates_by_path() {
        let mut idx = SegmentIndex::new();
        let t0 = Utc::now();
        idx.insert(seg("cam_1", t0, None));
        assert_eq!(idx.open_segment_paths().len(), 1);
    }
}

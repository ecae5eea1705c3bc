use anyhow::Result;
use serde::Deserialize;

use super::{Track, TrackState, Tracker};
use crate::detect::Detection;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Consecutive matches before a track is confirmed.
    pub n_init: u32,
    /// Missed frames a confirmed track survives.
    pub max_age: u32,
    /// Minimum IoU for a detection to continue a track.
    pub min_iou: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            n_init: 3,
            max_age: 30,
            min_iou: 0.3,
        }
    }
}

/// Greedy IoU association, best overlaps first. Matching ignores labels; a
/// track takes the label of its latest detection.
pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
    frame: u64,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            frame: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn spawn(&mut self, detection: &Detection) {
        let state = if self.config.n_init <= 1 {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };
        self.tracks.push(Track {
            id: self.next_id,
            bbox: detection.bbox.clone(),
            label: detection.label.clone(),
            state,
            hits: 1,
            time_since_update: 0,
            last_seen_frame: self.frame,
        });
        self.next_id += 1;
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Tracker for IouTracker {
    fn name(&self) -> &'static str {
        "iou"
    }

    fn update(&mut self, detections: &[Detection]) -> Result<Vec<Track>> {
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.min_iou && iou > 0.0 {
                    pairs.push((ti, di, iou));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        for (ti, di, _) in pairs {
            if track_matched[ti] || det_used[di] {
                continue;
            }
            track_matched[ti] = true;
            det_used[di] = true;
            let det = &detections[di];
            let track = &mut self.tracks[ti];
            track.bbox = det.bbox.clone();
            track.label = det.label.clone();
            track.hits += 1;
            track.time_since_update = 0;
            track.last_seen_frame = self.frame;
            if track.state == TrackState::Tentative && track.hits >= self.config.n_init {
                track.state = TrackState::Confirmed;
                log::trace!("track {} confirmed", track.id);
            }
        }

        for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
            if *matched {
                continue;
            }
            track.time_since_update += 1;
            match track.state {
                TrackState::Tentative => track.state = TrackState::Deleted,
                TrackState::Confirmed if track.time_since_update > self.config.max_age => {
                    track.state = TrackState::Deleted
                }
                _ => {}
            }
        }
        self.tracks.retain(|t| !t.is_deleted());

        for (di, det) in detections.iter().enumerate() {
            if !det_used[di] {
                self.spawn(det);
            }
        }

        self.frame += 1;
        Ok(self.tracks.clone())
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
        self.frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    fn det(x: i32) -> Detection {
        Detection::new(BoundingBox::new(x, 10, x + 40, 90), 0.9, "person")
    }

    #[test]
    fn confirms_after_n_init_matches() -> Result<()> {
        let mut tracker = IouTracker::default();
        let t1 = tracker.update(&[det(0)])?;
        assert_eq!(t1.len(), 1);
        assert_eq!(t1[0].state, TrackState::Tentative);
        tracker.update(&[det(4)])?;
        let t3 = tracker.update(&[det(8)])?;
        assert!(t3[0].is_confirmed());
        assert_eq!(t3[0].id, 1);
        assert_eq!(t3[0].hits, 3);
        Ok(())
    }

    #[test]
    fn tentative_track_dies_on_first_miss() -> Result<()> {
        let mut tracker = IouTracker::default();
        tracker.update(&[det(0)])?;
        assert!(tracker.update(&[])?.is_empty());
        let fresh = tracker.update(&[det(0)])?;
        assert_eq!(fresh[0].id, 2);
        Ok(())
    }

    #[test]
    fn confirmed_track_survives_max_age_misses() -> Result<()> {
        let mut tracker = IouTracker::new(TrackerConfig {
            max_age: 2,
            ..TrackerConfig::default()
        });
        for _ in 0..3 {
            tracker.update(&[det(0)])?;
        }
        assert_eq!(tracker.update(&[])?.len(), 1);
        let aged = tracker.update(&[])?;
        assert_eq!(aged[0].time_since_update, 2);
        assert!(tracker.update(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn distant_detections_start_new_tracks() -> Result<()> {
        let mut tracker = IouTracker::default();
        tracker.update(&[det(0)])?;
        let tracks = tracker.update(&[det(200)])?;
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 2);
        Ok(())
    }

    #[test]
    fn reset_restarts_ids() -> Result<()> {
        let mut tracker = IouTracker::default();
        tracker.update(&[det(0), det(100)])?;
        tracker.reset();
        let tracks = tracker.update(&[det(0)])?;
        assert_eq!(tracks[0].id, 1);
        Ok(())
    }
}

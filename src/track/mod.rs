//! Multi-object tracking for clip analysis.
//!
//! A `Tracker` turns per-frame detections into persistent identities. Only
//! confirmed tracks are meant to be reported; tentative ones may still be
//! noise.

mod iou;

use anyhow::Result;

use crate::detect::Detection;
use crate::geometry::BoundingBox;

pub use iou::{IouTracker, TrackerConfig};

/// Track lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrackState {
    /// Created from an unmatched detection, not yet trusted.
    #[default]
    Tentative,
    /// Matched on enough consecutive frames.
    Confirmed,
    /// Gone; never handed out again.
    Deleted,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: u64,
    pub bbox: BoundingBox,
    pub label: String,
    pub state: TrackState,
    /// Matched detections so far.
    pub hits: u32,
    /// Frames since the last matched detection.
    pub time_since_update: u32,
    /// Tracker frame counter at the last match (0-based).
    pub last_seen_frame: u64,
}

impl Track {
    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    pub fn is_deleted(&self) -> bool {
        self.state == TrackState::Deleted
    }
}

pub trait Tracker: Send {
    fn name(&self) -> &'static str;

    /// Feed one frame's detections; returns every live track.
    fn update(&mut self, detections: &[Detection]) -> Result<Vec<Track>>;

    /// Forget all tracks and restart identities.
    fn reset(&mut self);
}

impl<T: Tracker + ?Sized> Tracker for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn update(&mut self, detections: &[Detection]) -> Result<Vec<Track>> {
        (**self).update(detections)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

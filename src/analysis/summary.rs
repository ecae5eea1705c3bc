use std::collections::HashSet;
use std::time::Duration;

use crate::track::Track;

/// First sighting of a confirmed track within one clip.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryEntry {
    /// Clip-relative time of the frame the track was first seen confirmed.
    pub timestamp: Duration,
    pub track_id: u64,
    pub label: String,
}

impl SummaryEntry {
    /// `Person detected at 1.23 seconds, Track ID: 4`
    pub fn line(&self) -> String {
        format!(
            "{} detected at {:.2} seconds, Track ID: {}",
            capitalize(&self.label),
            self.timestamp.as_secs_f64(),
            self.track_id
        )
    }
}

/// Ordered summary of one clip; each track id appears at most once.
#[derive(Debug, Default)]
pub struct SummaryRecord {
    entries: Vec<SummaryEntry>,
    seen: HashSet<u64>,
}

impl SummaryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `track` at `timestamp` unless its id was already recorded.
    pub fn record_first(&mut self, track: &Track, timestamp: Duration) -> bool {
        if !self.seen.insert(track.id) {
            return false;
        }
        self.entries.push(SummaryEntry {
            timestamp,
            track_id: track.id,
            label: track.label.clone(),
        });
        true
    }

    pub fn entries(&self) -> &[SummaryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().map(SummaryEntry::line)
    }

    pub fn into_entries(self) -> Vec<SummaryEntry> {
        self.entries
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::track::TrackState;

    fn track(id: u64, label: &str) -> Track {
        Track {
            id,
            bbox: BoundingBox::new(0, 0, 10, 10),
            label: label.to_string(),
            state: TrackState::Confirmed,
            hits: 3,
            time_since_update: 0,
            last_seen_frame: 0,
        }
    }

    #[test]
    fn each_track_recorded_once() {
        let mut summary = SummaryRecord::new();
        assert!(summary.record_first(&track(1, "person"), Duration::from_millis(330)));
        assert!(!summary.record_first(&track(1, "person"), Duration::from_secs(2)));
        assert!(summary.record_first(&track(2, "dog"), Duration::from_secs(2)));
        let lines: Vec<String> = summary.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Person detected at 0.33 seconds, Track ID: 1",
                "Dog detected at 2.00 seconds, Track ID: 2",
            ]
        );
    }
}

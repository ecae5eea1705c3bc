//! Publishing analysed footage to the footage catalogue.
//!
//! `FootageStore` is the seam: the HTTP store talks to the catalogue API, the
//! in-memory store records calls for tests and dry runs.

mod api;

use anyhow::Result;
use std::sync::{Arc, Mutex};

pub use api::{HttpFootageStore, DEFAULT_API_URL};

/// Event type attached to every uploaded clip.
pub const EVENT_TYPE: &str = "Person Detected";

/// Event title for a stored footage row.
pub fn event_title(footage_id: i64) -> String {
    format!("Footage ID {footage_id}")
}

pub trait FootageStore: Send {
    /// Register a video by file name and length in seconds.
    fn insert_footage(&self, file_path: &str, duration: f64) -> Result<i64>;

    /// Attach an event to previously stored footage.
    fn insert_event(&self, event_type: &str, title: &str, footage_id: i64) -> Result<i64>;
}

impl<S: FootageStore + ?Sized> FootageStore for Box<S> {
    fn insert_footage(&self, file_path: &str, duration: f64) -> Result<i64> {
        (**self).insert_footage(file_path, duration)
    }

    fn insert_event(&self, event_type: &str, title: &str, footage_id: i64) -> Result<i64> {
        (**self).insert_event(event_type, title, footage_id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FootageRecord {
    pub id: i64,
    pub file_path: String,
    pub duration: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub title: String,
    pub footage_id: i64,
}

#[derive(Debug, Default)]
struct Records {
    footage: Vec<FootageRecord>,
    events: Vec<EventRecord>,
}

/// Store that keeps rows in memory. Clones share the same rows.
#[derive(Clone, Debug, Default)]
pub struct InMemoryFootageStore {
    records: Arc<Mutex<Records>>,
}

impl InMemoryFootageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn footage(&self) -> Vec<FootageRecord> {
        self.records
            .lock()
            .map(|r| r.footage.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|r| r.events.clone())
            .unwrap_or_default()
    }
}

impl FootageStore for InMemoryFootageStore {
    fn insert_footage(&self, file_path: &str, duration: f64) -> Result<i64> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("footage store lock poisoned"))?;
        let id = records.footage.len() as i64 + 1;
        records.footage.push(FootageRecord {
            id,
            file_path: file_path.to_string(),
            duration,
        });
        Ok(id)
    }

    fn insert_event(&self, event_type: &str, title: &str, footage_id: i64) -> Result<i64> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("footage store lock poisoned"))?;
        if !records.footage.iter().any(|f| f.id == footage_id) {
            anyhow::bail!("unknown footage id {footage_id}");
        }
        let id = records.events.len() as i64 + 1;
        records.events.push(EventRecord {
            id,
            event_type: event_type.to_string(),
            title: title.to_string(),
            footage_id,
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_links_events_to_footage() -> Result<()> {
        let store = InMemoryFootageStore::new();
        let footage_id = store.insert_footage("a_r.mp4", 4.5)?;
        let event_id = store.insert_event(EVENT_TYPE, &event_title(footage_id), footage_id)?;
        assert_eq!((footage_id, event_id), (1, 1));
        assert_eq!(store.events()[0].title, "Footage ID 1");
        assert!(store.insert_event(EVENT_TYPE, "x", 42).is_err());
        Ok(())
    }
}

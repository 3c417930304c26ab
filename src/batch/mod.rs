pub mod labels;

pub use labels::LabelSet;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

/// A single log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

/// Entries sharing one label set within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub labels: LabelSet,
    pub entries: Vec<Entry>,
}

/// An in-flight group of log entries, grouped into streams by label set.
///
/// Size is the sum of the byte lengths of all lines. Age is measured on the
/// tokio clock so it stays monotonic and can be paused in tests.
#[derive(Debug)]
pub struct Batch {
    id: u64,
    streams: BTreeMap<LabelSet, Stream>,
    bytes: usize,
    created_at: Instant,
}

impl Batch {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            streams: BTreeMap::new(),
            bytes: 0,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Add an entry to the stream matching `labels`, creating it if needed.
    pub fn add(&mut self, labels: LabelSet, timestamp: DateTime<Utc>, line: String) {
        self.bytes += line.len();

        let entry = Entry { timestamp, line };
        match self.streams.get_mut(&labels) {
            Some(stream) => stream.entries.push(entry),
            None => {
                self.streams.insert(
                    labels.clone(),
                    Stream {
                        labels,
                        entries: vec![entry],
                    },
                );
            }
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes
    }

    /// Size the batch would have if `line` were added.
    pub fn size_bytes_after(&self, line: &str) -> usize {
        self.bytes + line.len()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn entry_count(&self) -> usize {
        self.streams.values().map(|s| s.entries.len()).sum()
    }

    /// Streams in label set order.
    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn into_streams(self) -> impl Iterator<Item = Stream> {
        self.streams.into_values()
    }

    /// Order every stream's entries by ascending timestamp. Entries with equal
    /// timestamps keep their arrival order.
    pub fn sort(&mut self) {
        for stream in self.streams.values_mut() {
            stream.entries.sort_by_key(|e| e.timestamp);
        }
    }
}

//! In-memory replay source

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::Result;
use crate::source::{RecordSource, SourcePoll};

/// Deterministic source over a preloaded vector of records. Used by tests,
/// benches and loopback demos.
#[derive(Debug)]
pub struct MemorySource<T> {
    records: VecDeque<T>,
    label: String,
}

impl<T> MemorySource<T> {
    /// Source that will yield `records` in order, then `EndOfInput`.
    pub fn new(label: impl Into<String>, records: Vec<T>) -> MemorySource<T> {
        MemorySource {
            records: records.into(),
            label: label.into(),
        }
    }

    /// Records not yet consumed.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl<T: Send> RecordSource<T> for MemorySource<T> {
    fn describe(&self) -> &str {
        &self.label
    }

    fn has_next(&self) -> bool {
        !self.records.is_empty()
    }

    async fn next(&mut self) -> Result<SourcePoll<T>> {
        Ok(match self.records.pop_front() {
            Some(record) => SourcePoll::Record(record),
            None => SourcePoll::EndOfInput,
        })
    }
}

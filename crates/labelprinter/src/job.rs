//! Print job descriptor: page batches, optional tag payload, media parameters.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::profile::paper;

/// One page of packed monochrome pixel data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    data: Vec<u8>,
}

impl Page {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for Page {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Radio tag payload: a primary segment and an optional second segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagPayload {
    pub primary: Vec<u8>,
    pub secondary: Option<Vec<u8>>,
}

impl TagPayload {
    pub fn new(primary: Vec<u8>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// Builder: attach a second segment written after the primary one.
    pub fn with_secondary(mut self, secondary: Vec<u8>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }
}

/// Media and flow parameters of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobParams {
    pub paper_type: u8,
    pub gap: u8,
    pub speed: u16,
    pub density: u8,
    pub cut_type: u8,
    /// Pages the device may hold ahead of the printed counter.
    pub keep_on_print: u16,
    /// Pages expected in total. `0` means the sum of all batches.
    pub target_pages: u16,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            paper_type: paper::CONTINUOUS,
            gap: 8,
            speed: 60,
            density: 8,
            cut_type: 0,
            keep_on_print: 0,
            target_pages: 0,
        }
    }
}

/// A complete job handed to [`Engine::start`](crate::Engine::start).
#[derive(Debug, Clone, Default)]
pub struct PrintJob {
    pub batches: VecDeque<Vec<Page>>,
    pub tag: Option<TagPayload>,
    pub params: JobParams,
}

impl PrintJob {
    pub fn new(params: JobParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Builder: append a batch of pages.
    pub fn with_batch(mut self, pages: Vec<Page>) -> Self {
        if !pages.is_empty() {
            self.batches.push_back(pages);
        }
        self
    }

    /// Builder: attach a tag payload.
    pub fn with_tag(mut self, tag: TagPayload) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn total_pages(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn has_pages(&self) -> bool {
        self.total_pages() > 0
    }

    /// Target page count, defaulting to the pages submitted.
    pub fn target_pages(&self) -> u16 {
        match self.params.target_pages {
            0 => u16::try_from(self.total_pages()).unwrap_or(u16::MAX),
            n => n,
        }
    }

    pub fn has_tag(&self) -> bool {
        self.tag.as_ref().is_some_and(|tag| !tag.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batches_are_skipped() {
        let job = PrintJob::new(JobParams::default())
            .with_batch(vec![])
            .with_batch(vec![Page::new(vec![1]), Page::new(vec![2])]);
        assert_eq!(job.batches.len(), 1);
        assert_eq!(job.total_pages(), 2);
        assert_eq!(job.target_pages(), 2);
    }

    #[test]
    fn test_explicit_target_wins() {
        let params = JobParams {
            target_pages: 10,
            ..JobParams::default()
        };
        let job = PrintJob::new(params).with_batch(vec![Page::new(vec![0])]);
        assert_eq!(job.target_pages(), 10);
    }

    #[test]
    fn test_empty_tag_does_not_count() {
        let job = PrintJob::default().with_tag(TagPayload::new(vec![]));
        assert!(!job.has_tag());
        let job = PrintJob::default().with_tag(TagPayload::new(vec![1, 2]).with_secondary(vec![3]));
        assert!(job.has_tag());
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: JobParams = serde_json::from_str(r#"{"paper_type":3,"speed":20}"#).unwrap();
        assert_eq!(params.paper_type, 3);
        assert_eq!(params.speed, 20);
        assert_eq!(params.gap, 8);
    }
}

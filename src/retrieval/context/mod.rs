#[cfg(test)]
mod tests;

use itertools::Itertools;
use tracing::{debug, warn};

use super::LineSource;
use crate::config::RetrievalConfig;
use crate::database::StoredRecord;

const ELLIPSIS: &str = "...";

/// Expands a matched line into the surrounding lines of the same source file
#[derive(Debug, Clone, Copy)]
pub struct ContextWindowAssembler {
    radius: u32,
    max_length: usize,
}

impl ContextWindowAssembler {
    #[inline]
    pub fn new(radius: u32, max_length: usize) -> Self {
        Self { radius, max_length }
    }

    #[inline]
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.context_window_radius, config.max_context_length)
    }

    /// Inclusive line range around `line`, never below line 1
    #[inline]
    pub fn window_for(&self, line: i64) -> (i64, i64) {
        let radius = i64::from(self.radius);
        (
            line.saturating_sub(radius).max(1),
            line.saturating_add(radius),
        )
    }

    /// Expanded text for `record`; any missing metadata, empty window or
    /// lookup failure yields the record's own content
    #[inline]
    pub async fn expand<S>(&self, source: &S, record: &StoredRecord) -> String
    where
        S: LineSource + ?Sized,
    {
        let (Some(filename), Some(line)) = (
            record.metadata.source_filename(),
            record.metadata.source_line(),
        ) else {
            return record.content.clone();
        };

        let (first, last) = self.window_for(line);
        match source.lines_between(filename, first, last).await {
            Ok(lines) if !lines.is_empty() => {
                debug!(
                    "Expanded {}:{} with {} neighboring lines",
                    filename,
                    line,
                    lines.len()
                );
                self.join_window(&lines)
            }
            Ok(_) => record.content.clone(),
            Err(e) => {
                warn!(
                    "Context lookup failed for {}:{}, using matched line only: {}",
                    filename, line, e
                );
                record.content.clone()
            }
        }
    }

    /// Join with single spaces, truncating to `max_length` chars plus an ellipsis
    #[inline]
    pub fn join_window(&self, lines: &[StoredRecord]) -> String {
        let joined = lines.iter().map(|line| line.content.as_str()).join(" ");
        if joined.chars().count() <= self.max_length {
            return joined;
        }

        let mut truncated: String = joined.chars().take(self.max_length).collect();
        truncated.push_str(ELLIPSIS);
        truncated
    }
}

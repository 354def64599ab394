//! Paragraph Aggregator: batches text fragments up to a paragraph boundary before handing them
//! to the code-block extractor and URL validator, bounding the granularity those components see.
//!
//! A paragraph boundary is a double newline or a fence marker (```); the fence marker itself is
//! flushed together with the preceding text so the code-block extractor still sees it as the
//! start of its own fragment.

const FENCE: &str = "```";

#[derive(Default)]
pub struct ParagraphAggregator {
    buffer: String,
}

impl ParagraphAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one text fragment from the chunk classifier. Returns zero or more paragraph-sized
    /// units ready for downstream processing; anything not yet at a boundary stays buffered.
    pub fn feed(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut out = Vec::new();

        loop {
            let double_newline = self.buffer.find("\n\n");
            let fence = self.buffer.find(FENCE);

            let boundary = match (double_newline, fence) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };

            let Some(at) = boundary else { break };
            let is_fence = self.buffer[at..].starts_with(FENCE);
            let split_at = if is_fence { at } else { at + 2 };

            if split_at == 0 {
                // Fence at the very start: emit it as its own unit once we know where it ends,
                // but we don't have enough lookahead here, so just flush the fence marker alone.
                let (head, tail) = self.buffer.split_at(FENCE.len());
                out.push(head.to_string());
                self.buffer = tail.to_string();
                continue;
            }

            let (head, tail) = self.buffer.split_at(split_at);
            out.push(head.to_string());
            self.buffer = tail.to_string();
        }

        out
    }

    /// Flush any remaining buffered text at stream end.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_double_newline() {
        let mut agg = ParagraphAggregator::new();
        let out = agg.feed("first paragraph\n\nsecond paragraph");
        assert_eq!(out, vec!["first paragraph\n\n".to_string()]);
        assert_eq!(agg.flush(), Some("second paragraph".to_string()));
    }

    #[test]
    fn splits_before_a_fence_marker() {
        let mut agg = ParagraphAggregator::new();
        let out = agg.feed("some text before```python\ncode\n```");
        assert_eq!(out[0], "some text before");
    }

    #[test]
    fn buffers_incomplete_paragraphs_across_fragments() {
        let mut agg = ParagraphAggregator::new();
        assert!(agg.feed("partial ").is_empty());
        let out = agg.feed("sentence\n\nnext");
        assert_eq!(out, vec!["partial sentence\n\n".to_string()]);
    }

    #[test]
    fn flush_returns_none_when_buffer_already_empty() {
        let mut agg = ParagraphAggregator::new();
        agg.feed("whole paragraph\n\n");
        assert_eq!(agg.flush(), None);
    }
}

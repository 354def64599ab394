//! Fenced code-block detection over a text-fragment stream.
//!
//! Each state is an explicit tagged variant rather than a flag bag, per the pipeline-of-small-
//! state-machines shape this crate's streaming components share. A fragment in, zero-or-more
//! downstream text fragments (or an embed-reference marker) out.

use regex::Regex;
use std::sync::OnceLock;

fn language_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_+#-]*$").unwrap())
}

const FENCE: &str = "```";
const MAX_LANGUAGE_LEN: usize = 20;

#[derive(Debug, Clone)]
enum State {
    Outside,
    /// Saw a bare fence with no language; the next fragment's first line may carry one.
    AwaitingLanguage,
    Inside {
        language: Option<String>,
        filename: Option<String>,
        buffer: String,
    },
}

/// An effect the extractor wants the caller to apply: forward text downstream, or emit/refresh
/// a code embed.
#[derive(Debug, Clone)]
pub enum CodeBlockEffect {
    /// Pass this text through unchanged (outside any fence, or a JSON embed-reference fence).
    PassThrough(String),
    /// Create a new `processing` code embed and emit a JSON embed-reference block in its place.
    CreateEmbed {
        language: Option<String>,
        filename: Option<String>,
    },
    /// Create and immediately finalize a code embed (open+close fence landed in one fragment).
    CreateAndFinalizeEmbed {
        language: Option<String>,
        filename: Option<String>,
        code: String,
        line_count: usize,
    },
    /// Opportunistic per-line update of the currently open code embed; status stays `processing`.
    UpdateEmbedContent { code: String },
    /// Finalize the currently open code embed.
    FinalizeEmbed { code: String, line_count: usize },
}

/// Stateful extractor; one instance per streamed assistant turn.
pub struct CodeBlockExtractor {
    state: State,
}

impl Default for CodeBlockExtractor {
    fn default() -> Self {
        Self { state: State::Outside }
    }
}

impl CodeBlockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one text fragment, returning the effects it produces in order.
    pub fn feed(&mut self, fragment: &str) -> Vec<CodeBlockEffect> {
        if is_embed_reference_fence(fragment) {
            return vec![CodeBlockEffect::PassThrough(fragment.to_string())];
        }

        match std::mem::replace(&mut self.state, State::Outside) {
            State::Outside => self.feed_outside(fragment),
            State::AwaitingLanguage => self.feed_awaiting_language(fragment),
            State::Inside { language, filename, buffer } => {
                self.feed_inside(fragment, language, filename, buffer)
            }
        }
    }

    fn feed_outside(&mut self, fragment: &str) -> Vec<CodeBlockEffect> {
        if let Some(rest) = fragment.strip_prefix(FENCE) {
            if rest.trim().is_empty() {
                self.state = State::AwaitingLanguage;
                return vec![];
            }
            let (header_line, remainder) = split_first_line(rest);
            let (language, filename) = parse_fence_header(header_line);
            if let Some(close_at) = remainder.find(FENCE) {
                let code = remainder[..close_at].trim_end_matches('\n').to_string();
                let line_count = count_lines(&code);
                self.state = State::Outside;
                return vec![CodeBlockEffect::CreateAndFinalizeEmbed {
                    language,
                    filename,
                    code,
                    line_count,
                }];
            }
            self.state = State::Inside {
                language,
                filename,
                buffer: remainder.to_string(),
            };
            return vec![CodeBlockEffect::CreateEmbed { language: self.inside_language(), filename: self.inside_filename() }];
        }
        self.state = State::Outside;
        vec![CodeBlockEffect::PassThrough(fragment.to_string())]
    }

    fn feed_awaiting_language(&mut self, fragment: &str) -> Vec<CodeBlockEffect> {
        let (first_line, remainder) = split_first_line(fragment);
        let language = if first_line.len() <= MAX_LANGUAGE_LEN && language_pattern().is_match(first_line) {
            Some(first_line.to_string())
        } else {
            None
        };
        let content_start = if language.is_some() { remainder } else { fragment };
        if let Some(close_at) = content_start.find(FENCE) {
            let code = content_start[..close_at].trim_end_matches('\n').to_string();
            let line_count = count_lines(&code);
            self.state = State::Outside;
            return vec![CodeBlockEffect::CreateAndFinalizeEmbed {
                language,
                filename: None,
                code,
                line_count,
            }];
        }
        self.state = State::Inside {
            language: language.clone(),
            filename: None,
            buffer: content_start.to_string(),
        };
        vec![CodeBlockEffect::CreateEmbed { language, filename: None }]
    }

    fn feed_inside(
        &mut self,
        fragment: &str,
        language: Option<String>,
        filename: Option<String>,
        mut buffer: String,
    ) -> Vec<CodeBlockEffect> {
        if let Some(close_at) = fragment.find(FENCE) {
            buffer.push_str(&fragment[..close_at]);
            let code = buffer.trim_end_matches('\n').to_string();
            let line_count = count_lines(&code);
            self.state = State::Outside;
            return vec![CodeBlockEffect::FinalizeEmbed { code, line_count }];
        }

        buffer.push_str(fragment);
        let mut effects = Vec::new();
        if fragment.contains('\n') {
            effects.push(CodeBlockEffect::UpdateEmbedContent { code: buffer.clone() });
        }
        self.state = State::Inside { language, filename, buffer };
        effects
    }

    fn inside_language(&self) -> Option<String> {
        match &self.state {
            State::Inside { language, .. } => language.clone(),
            _ => None,
        }
    }

    fn inside_filename(&self) -> Option<String> {
        match &self.state {
            State::Inside { filename, .. } => filename.clone(),
            _ => None,
        }
    }

    /// Called when the outer stream terminates with a code block still open: finalize whatever
    /// was accumulated so far with `status=finished`.
    pub fn finalize_on_stream_end(&mut self) -> Option<CodeBlockEffect> {
        match std::mem::replace(&mut self.state, State::Outside) {
            State::Inside { buffer, .. } => {
                let code = buffer.trim_end_matches('\n').to_string();
                let line_count = count_lines(&code);
                Some(CodeBlockEffect::FinalizeEmbed { code, line_count })
            }
            _ => None,
        }
    }
}

fn is_embed_reference_fence(fragment: &str) -> bool {
    let trimmed = fragment.trim();
    if !trimmed.starts_with('{') {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .map(|v| v.get("embed_id").is_some() || v.get("embed_ids").is_some())
        .unwrap_or(false)
}

fn split_first_line(text: &str) -> (&str, &str) {
    match text.find('\n') {
        Some(idx) => (&text[..idx], &text[idx + 1..]),
        None => (text, ""),
    }
}

fn parse_fence_header(header: &str) -> (Option<String>, Option<String>) {
    let header = header.trim();
    if header.is_empty() {
        return (None, None);
    }
    match header.split_once(':') {
        Some((lang, file)) => (non_empty(lang), non_empty(file)),
        None => (non_empty(header), None),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn count_lines(code: &str) -> usize {
    if code.is_empty() {
        0
    } else {
        code.lines().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_with_both_fences_creates_and_finalizes_in_one_step() {
        let mut extractor = CodeBlockExtractor::new();
        let effects = extractor.feed("```python\nprint(1)\n```");
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            CodeBlockEffect::CreateAndFinalizeEmbed { language, code, line_count, .. } => {
                assert_eq!(language.as_deref(), Some("python"));
                assert_eq!(code, "print(1)");
                assert_eq!(*line_count, 1);
            }
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn code_block_split_across_three_fragments() {
        let mut extractor = CodeBlockExtractor::new();

        let e1 = extractor.feed("```");
        assert!(e1.is_empty());

        let e2 = extractor.feed("python:hello.py\nprint(1)\n");
        assert_eq!(e2.len(), 1);
        match &e2[0] {
            CodeBlockEffect::CreateEmbed { language, filename } => {
                assert_eq!(language.as_deref(), Some("python"));
                assert_eq!(filename.as_deref(), Some("hello.py"));
            }
            other => panic!("unexpected effect: {:?}", other),
        }

        let e3 = extractor.feed("```");
        assert_eq!(e3.len(), 1);
        match &e3[0] {
            CodeBlockEffect::FinalizeEmbed { code, line_count } => {
                assert_eq!(code, "print(1)");
                assert_eq!(*line_count, 1);
            }
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn bare_fence_followed_by_non_language_text_creates_embed_with_no_language() {
        let mut extractor = CodeBlockExtractor::new();
        extractor.feed("```");
        let effects = extractor.feed("this is just prose that continues\nmore text\n");
        match &effects[0] {
            CodeBlockEffect::CreateEmbed { language, .. } => assert!(language.is_none()),
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn embed_reference_json_fence_passes_through_untouched() {
        let mut extractor = CodeBlockExtractor::new();
        let fragment = r#"{"embed_id": "abc123", "type": "website"}"#;
        let effects = extractor.feed(fragment);
        match &effects[0] {
            CodeBlockEffect::PassThrough(text) => assert_eq!(text, fragment),
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn unterminated_code_block_is_finalized_at_stream_end() {
        let mut extractor = CodeBlockExtractor::new();
        extractor.feed("```rust\nfn main() {}\n");
        let effect = extractor.finalize_on_stream_end().unwrap();
        match effect {
            CodeBlockEffect::FinalizeEmbed { code, line_count } => {
                assert_eq!(code, "fn main() {}");
                assert_eq!(line_count, 1);
            }
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn plain_text_outside_any_fence_passes_through() {
        let mut extractor = CodeBlockExtractor::new();
        let effects = extractor.feed("just a normal sentence.");
        match &effects[0] {
            CodeBlockEffect::PassThrough(text) => assert_eq!(text, "just a normal sentence."),
            other => panic!("unexpected effect: {:?}", other),
        }
    }
}

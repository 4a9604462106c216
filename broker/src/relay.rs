//! Streaming relay helpers: chunk synthesis for atomic submissions and
//! SSE frame construction for the client-facing stream.

use chrono::Utc;

use crate::openai::{
    ChatCompletionChunk, StreamChoice, StreamDelta, FINISH_STOP, OBJECT_CHUNK, SYSTEM_FINGERPRINT,
};

/// Stream-terminating sentinel, sent as a bare SSE data line.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Target size for synthesized chunks, in bytes. Atomic operator
/// submissions are sliced at word boundaries into roughly this size so
/// clients still render incrementally.
const TARGET_CHUNK_BYTES: usize = 24;

/// Slice a final text into delivery chunks at word boundaries.
///
/// Invariant: the concatenation of the returned chunks equals the input
/// byte-for-byte. `split_inclusive` keeps every whitespace byte attached
/// to the word before it, so nothing is lost or reordered.
pub fn synthesize_chunks(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in text.split_inclusive(char::is_whitespace) {
        current.push_str(piece);
        if current.len() >= TARGET_CHUNK_BYTES {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Builds the per-turn sequence of `chat.completion.chunk` frames.
///
/// The first content frame carries `role: "assistant"`; the finish frame
/// has an empty delta and `finish_reason: "stop"`, matching what common
/// OpenAI clients expect from a streamed completion.
pub struct ChunkFramer {
    id: String,
    model: String,
    created: i64,
    sent_first: bool,
}

impl ChunkFramer {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created: Utc::now().timestamp(),
            sent_first: false,
        }
    }

    pub fn content_frame(&mut self, content: &str) -> ChatCompletionChunk {
        let role = if self.sent_first {
            None
        } else {
            Some("assistant")
        };
        self.sent_first = true;
        self.frame(
            StreamDelta {
                role,
                content: Some(content.to_string()),
            },
            None,
        )
    }

    pub fn finish_frame(&self) -> ChatCompletionChunk {
        self.frame(StreamDelta::default(), Some(FINISH_STOP))
    }

    fn frame(&self, delta: StreamDelta, finish_reason: Option<&'static str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: OBJECT_CHUNK,
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: SYSTEM_FINGERPRINT,
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_concat_equals(text: &str) {
        let chunks = synthesize_chunks(text);
        let joined: String = chunks.concat();
        assert_eq!(joined, text, "chunks must concatenate to the input");
    }

    #[test]
    fn test_concat_invariant_plain_text() {
        assert_concat_equals("Hello! How can I help you today?");
    }

    #[test]
    fn test_concat_invariant_whitespace_heavy() {
        assert_concat_equals("  leading,  double  spaces\nand\nnewlines\t\ttabs  ");
    }

    #[test]
    fn test_concat_invariant_unicode() {
        assert_concat_equals("こんにちは、世界！ café naïve emoji 🎉 done");
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = synthesize_chunks("Hi there!");
        assert_eq!(chunks, vec!["Hi there!".to_string()]);
    }

    #[test]
    fn test_long_text_multiple_chunks() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = synthesize_chunks(text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
        // No chunk splits mid-word: each ends at a boundary or at text end.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with(char::is_whitespace), "chunk {chunk:?}");
        }
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(synthesize_chunks("").is_empty());
    }

    #[test]
    fn test_framer_role_only_on_first_frame() {
        let mut framer = ChunkFramer::new("chatcmpl-x", "human");
        let first = framer.content_frame("Hel");
        let second = framer.content_frame("lo");

        assert_eq!(first.choices[0].delta.role, Some("assistant"));
        assert_eq!(second.choices[0].delta.role, None);
        assert_eq!(first.choices[0].finish_reason, None);
    }

    #[test]
    fn test_finish_frame_shape() {
        let framer = ChunkFramer::new("chatcmpl-x", "human");
        let finish = framer.finish_frame();
        assert_eq!(finish.choices[0].finish_reason, Some("stop"));
        assert_eq!(finish.choices[0].delta.content, None);
        assert_eq!(finish.object, "chat.completion.chunk");
    }
}

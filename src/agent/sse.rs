//! Line framing for the completion service's `data:` event stream.

use serde::Deserialize;

/// Splits an incoming byte stream into text lines.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte character split
/// across two transport chunks is decoded only once it is complete.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
        let line = String::from_utf8_lossy(&raw[..newline]);
        Some(line.trim_end_matches('\r').to_string())
    }

    /// Marks end of input so a trailing line without `\n` can still be read.
    pub fn close(&mut self) {
        if !self.buffer.is_empty() && !self.buffer.ends_with(b"\n") {
            self.buffer.push(b'\n');
        }
    }
}

/// What a single line of the stream means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Blank,
    /// `data: [DONE]`, or `[DONE]` on its own
    Done,
    Delta {
        thinking: Option<String>,
        content: Option<String>,
    },
    /// A `data:` line whose payload is not a valid chunk.
    Malformed,
    /// Comments, `event:`/`id:` fields and anything else without data.
    Other,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: DeltaPayload,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

pub fn parse_line(line: &str) -> Frame {
    let line = line.trim();
    if line.is_empty() {
        return Frame::Blank;
    }
    if line == "[DONE]" {
        return Frame::Done;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return Frame::Other;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Frame::Done;
    }

    match serde_json::from_str::<ChunkPayload>(data) {
        Ok(payload) => {
            let delta = payload
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.delta)
                .unwrap_or_default();
            Frame::Delta { thinking: delta.thinking, content: delta.content }
        }
        Err(_) => Frame::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_waits_for_complete_lines() {
        let mut decoder = LineDecoder::default();
        decoder.push(b"data: {\"a\"");
        assert_eq!(decoder.next_line(), None);

        decoder.push(b":1}\r\n\ndata: [DONE]\n");
        assert_eq!(decoder.next_line().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(decoder.next_line().as_deref(), Some(""));
        assert_eq!(decoder.next_line().as_deref(), Some("data: [DONE]"));
        assert_eq!(decoder.next_line(), None);
    }

    #[test]
    fn decoder_keeps_split_multibyte_characters_intact() {
        let text = "data: 你好\n".as_bytes();
        let mut decoder = LineDecoder::default();
        // Cut inside the first three-byte character.
        decoder.push(&text[..7]);
        assert_eq!(decoder.next_line(), None);
        decoder.push(&text[7..]);
        assert_eq!(decoder.next_line().as_deref(), Some("data: 你好"));
    }

    #[test]
    fn close_releases_unterminated_tail() {
        let mut decoder = LineDecoder::default();
        decoder.push(b"data: [DONE]");
        assert_eq!(decoder.next_line(), None);
        decoder.close();
        assert_eq!(decoder.next_line().as_deref(), Some("data: [DONE]"));
    }

    #[test]
    fn parses_content_and_thinking_independently() {
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            Frame::Delta { thinking: None, content: Some("Hi".into()) }
        );
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"thinking":"hmm","content":null}}]}"#),
            Frame::Delta { thinking: Some("hmm".into()), content: None }
        );
        assert_eq!(
            parse_line(r#"data: {"choices":[{"delta":{"thinking":"a","content":"b"}}]}"#),
            Frame::Delta { thinking: Some("a".into()), content: Some("b".into()) }
        );
        assert_eq!(
            parse_line(r#"data: {"choices":[]}"#),
            Frame::Delta { thinking: None, content: None }
        );
    }

    #[test]
    fn classifies_control_lines() {
        assert_eq!(parse_line(""), Frame::Blank);
        assert_eq!(parse_line("   "), Frame::Blank);
        assert_eq!(parse_line("data: [DONE]"), Frame::Done);
        assert_eq!(parse_line("data:[DONE]"), Frame::Done);
        assert_eq!(parse_line("[DONE]"), Frame::Done);
        assert_eq!(parse_line("[DONE]\r"), Frame::Done);
        assert_eq!(parse_line(": keep-alive"), Frame::Other);
        assert_eq!(parse_line("event: message"), Frame::Other);
    }

    #[test]
    fn broken_json_is_malformed_not_fatal() {
        assert_eq!(parse_line("data: {not-json"), Frame::Malformed);
        assert_eq!(parse_line(r#"data: {"choices":"nope"}"#), Frame::Malformed);
    }
}

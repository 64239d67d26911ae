//! Client-facing streaming wire format.
//!
//! Events are server-sent-events style: `data: <payload>\n\n`, where the
//! payload is either the literal `[DONE]` terminator or a byte-repr of a
//! UTF-8 encoded token. Paired megaservices parse each other's frames with
//! [`extract_chunk_str`], so framing and stripping must stay symmetric.

use std::sync::OnceLock;

use regex::Regex;

/// Sentence terminators that flush the stitch buffer (Latin + CJK).
pub const SENTENCE_ENDS: [char; 6] = ['.', '?', '!', '。', '，', '！'];

/// The terminal event of every stream.
pub const DONE_EVENT: &str = "data: [DONE]\n\n";

/// Frame one token for the client stream.
///
/// Literal `\n` sequences are unescaped before encoding, matching the
/// conventions of generation services that escape newlines in their token
/// text.
pub fn token_frame(token: &str) -> String {
    let unescaped = token.replace("\\n", "\n");
    format!("data: {}\n\n", bytes_repr(unescaped.as_bytes()))
}

/// Strip one framing prefix/suffix pair from an incoming chunk.
///
/// The `[DONE]` terminator maps to the empty string. Chunks that carry no
/// framing pass through unchanged.
pub fn extract_chunk_str(chunk: &str) -> &str {
    if chunk == DONE_EVENT {
        return "";
    }
    let mut inner = chunk;
    if let Some(rest) = inner
        .strip_prefix("data: b'")
        .or_else(|| inner.strip_prefix("data: b\""))
    {
        inner = rest;
    }
    if let Some(rest) = inner
        .strip_suffix("'\n\n")
        .or_else(|| inner.strip_suffix("\"\n\n"))
    {
        inner = rest;
    }
    inner
}

/// Split a sentence into whitespace-delimited tokens.
///
/// Each token keeps at most one leading and one trailing whitespace
/// character, so re-joining the tokens reproduces the sentence spacing.
pub fn tokenize(sentence: &str) -> Vec<&str> {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    let re = TOKEN_RE.get_or_init(|| Regex::new(r"\s?\S+\s?").expect("valid token pattern"));
    re.find_iter(sentence).map(|m| m.as_str()).collect()
}

/// Python-style `repr` of a byte string.
///
/// Printable ASCII is kept literal, `\t`/`\n`/`\r` and the backslash are
/// escaped, everything else becomes `\xHH`. Delimiters are single quotes
/// unless the bytes contain a single quote and no double quote.
pub fn bytes_repr(bytes: &[u8]) -> String {
    let has_single = bytes.contains(&b'\'');
    let has_double = bytes.contains(&b'"');
    let quote = if has_single && !has_double { b'"' } else { b'\'' };

    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &byte in bytes {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            _ if byte == quote => {
                out.push('\\');
                out.push(quote as char);
            }
            0x20..=0x7e => out.push(byte as char),
            _ => {
                out.push_str(&format!("\\x{byte:02x}"));
            }
        }
    }
    out.push(quote as char);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_plain_ascii_tokens() {
        for token in ["Hi ", "there.", " How?", "a1_b2"] {
            assert_eq!(extract_chunk_str(&token_frame(token)), token);
        }
    }

    #[test]
    fn done_event_maps_to_empty() {
        assert_eq!(extract_chunk_str(DONE_EVENT), "");
    }

    #[test]
    fn extract_strips_both_quote_styles() {
        assert_eq!(extract_chunk_str("data: b'Hi'\n\n"), "Hi");
        assert_eq!(extract_chunk_str("data: b\"Hi\"\n\n"), "Hi");
    }

    #[test]
    fn unframed_chunks_pass_through() {
        assert_eq!(extract_chunk_str("plain text"), "plain text");
    }

    #[test]
    fn frame_unescapes_literal_newlines() {
        assert_eq!(token_frame("a\\nb"), "data: b'a\\nb'\n\n");
        // the payload holds a real newline re-escaped by the byte repr
        assert_eq!(bytes_repr(b"a\nb"), "b'a\\nb'");
    }

    #[test]
    fn bytes_repr_escapes_and_switches_quotes() {
        assert_eq!(bytes_repr(b"plain"), "b'plain'");
        assert_eq!(bytes_repr(b"tab\there"), "b'tab\\there'");
        assert_eq!(bytes_repr(b"back\\slash"), "b'back\\\\slash'");
        // single quote in content switches the delimiter
        assert_eq!(bytes_repr(b"it's"), "b\"it's\"");
        // both quote kinds: single-quoted with the single quote escaped
        assert_eq!(bytes_repr(b"'\""), "b'\\'\"'");
        // non-ASCII becomes \xHH
        assert_eq!(bytes_repr("é".as_bytes()), "b'\\xc3\\xa9'");
    }

    #[test]
    fn tokenize_keeps_sentence_spacing() {
        assert_eq!(tokenize("Hi there."), vec!["Hi ", "there."]);
        assert_eq!(tokenize(" How?"), vec![" How?"]);
        assert_eq!(tokenize(""), Vec::<&str>::new());
        assert_eq!(tokenize("one  two"), vec!["one ", " two"]);
    }
}

//! The dynamic-pattern registry: lazily-compiled end-regexes that embed an
//! extracted literal from a `start` match, keyed by
//! `(parent_state, highlight_index, extracted_bytes)`.
//!
//! The splicing mechanism (a synthetic `(?(DEFINE)(?<name>...))` wrapper) is
//! the same family of operation as syntect's `substitute_backrefs_in_regex`
//! (`other_examples/89af9b15_trishume-syntect__src-parsing-syntax_definition.rs.rs`),
//! chosen here instead of direct textual substitution because only the
//! DEFINE group's body is attacker-controlled text. That body is built from
//! per-byte `\xHH` escapes rather than a `\Q...\E` literal block, since the
//! extracted bytes are not guaranteed to be valid UTF-8 in 8-bit mode.

use log::trace;

use crate::regex_adapter::Regex;

/// Escape extracted bytes for safe embedding inside the DEFINE group: every
/// byte becomes a two-digit `\xHH` escape. PCRE2 treats a bare `\xhh` (no
/// braces) as a single data unit regardless of UTF mode, so this reproduces
/// the extracted bytes exactly in both UTF-8 and 8-bit mode without ever
/// requiring the escaped text itself to be valid UTF-8 — a plain `\Q...\E`
/// literal block can't make that guarantee, since splicing arbitrary bytes
/// into a Rust `String` (the regex source type) would force a lossy UTF-8
/// conversion first.
pub fn escape_for_define(extracted: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(extracted.len() * 4);
    for &b in extracted {
        out.extend_from_slice(format!("\\x{b:02x}").as_bytes());
    }
    out
}

/// Build the textual regex `(?(DEFINE)(?<NAME>\xHH\xHH...))<end_template>`
/// and compile it.
pub fn build_dynamic_regex(name: &str, extracted: &[u8], end_template: &str, utf8: bool) -> Regex {
    let escaped = escape_for_define(extracted);
    let escaped = String::from_utf8(escaped)
        .expect("escape_for_define only ever emits ASCII \\xHH escapes");
    let source = format!("(?(DEFINE)(?<{name}>{escaped})){end_template}");
    trace!("dynamic: compiling dynamic end pattern for {name:?} ({} bytes extracted)", extracted.len());
    Regex::new(source, utf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regex_adapter::MatchOptions;

    #[test]
    fn escapes_every_byte_as_hex() {
        let input = b"a\0b";
        assert_eq!(escape_for_define(input), b"\\x61\\x00\\x62".to_vec());

        let input = br"a\Eb";
        assert_eq!(
            escape_for_define(input),
            b"\\x61\\x5c\\x45\\x62".to_vec()
        );
    }

    #[test]
    fn dynamic_end_matches_non_utf8_extracted_delimiter_in_8bit_mode() {
        // 0xFF is not a valid UTF-8 lead byte on its own; 8-bit mode is
        // exactly the mode that must still reproduce it literally.
        let delim = [b'X', 0xFFu8, b'Y'];
        let regex = build_dynamic_regex("delim", &delim, r"^(?&delim)$", false);
        regex.compile().unwrap();
        assert!(regex
            .run(&[b'X', 0xFFu8, b'Y'], 0, MatchOptions::default())
            .unwrap()
            .is_some());
        assert!(regex
            .run(b"XZY", 0, MatchOptions::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn dynamic_end_closes_on_matching_token_scenario_s4() {
        // Initializing the subscriber here means `RUST_LOG=trace cargo test`
        // surfaces the `trace!` logged on each dynamic-pattern compile.
        let _ = env_logger::try_init();
        let regex = build_dynamic_regex("delim", b"EOF", r"^(?&delim)$", false);
        regex.compile().unwrap();
        assert!(regex.run(b"EOF", 0, MatchOptions::default()).unwrap().is_some());
        assert!(regex.run(b"NOTEOF", 0, MatchOptions::default()).unwrap().is_none());
    }

    #[test]
    fn dynamic_end_does_not_match_other_tokens() {
        let regex = build_dynamic_regex("delim", b"HEREDOC", r"^(?&delim)$", false);
        regex.compile().unwrap();
        assert!(regex.run(b"EOF", 0, MatchOptions::default()).unwrap().is_none());
    }
}

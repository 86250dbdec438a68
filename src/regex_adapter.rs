//! Thin wrapper around the PCRE2 backend: anchored compilation, JIT, and
//! match-at-offset with a capture-vector interface.
//!
//! Mirrors `examples/original_source/src/pcre_compat.h`'s documented option
//! names (`PCRE2_ANCHORED`, `PCRE2_NOTEMPTY`, `PCRE2_NO_UTF_CHECK`) and
//! syntect's lazy-compile-on-first-use pattern
//! (`other_examples/75d6f0e6_ruihe774-syntect__src-parsing-regex.rs.rs`).

use once_cell::sync::OnceCell;

use crate::error::{ErrorLocation, HighlightError};

/// Match-time options, orthogonal bits corresponding 1:1 to the PCRE2 flags
/// named by the PCRE2 backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// Forbid a zero-width match at the supplied offset.
    pub no_empty: bool,
    /// Skip the engine's own UTF-8 validity check (the matcher has already
    /// validated the line once already).
    pub no_utf8_check: bool,
}

impl MatchOptions {
    fn to_pcre2(self) -> pcre2::MatchOptions {
        let mut opts = pcre2::MatchOptions::empty();
        if self.no_empty {
            opts |= pcre2::MatchOptions::NOTEMPTY;
        }
        if self.no_utf8_check {
            opts |= pcre2::MatchOptions::NO_UTF_CHECK;
        }
        opts
    }
}

/// The result of a successful match: byte offsets of the whole match plus
/// any named/numbered captures, addressable by group index or name.
#[derive(Debug, Clone)]
pub struct Captures {
    spans: Vec<Option<(usize, usize)>>,
    names: Vec<(String, usize)>,
}

impl Captures {
    pub fn get(&self, group: usize) -> Option<(usize, usize)> {
        self.spans.get(group).copied().flatten()
    }

    pub fn whole(&self) -> (usize, usize) {
        self.get(0).expect("group 0 always present on a match")
    }

    pub fn name(&self, name: &str) -> Option<(usize, usize)> {
        let idx = self.names.iter().find(|(n, _)| n == name)?.1;
        self.get(idx)
    }
}

/// A single anchored, lazily-compiled pattern. Source text is retained so the
/// expensive PCRE2 compile + JIT step can be deferred to first use — most
/// patterns are compiled eagerly at graph-build time, but dynamic end
/// patterns are built from a regex whose text isn't known until
/// match time.
pub struct Regex {
    source: String,
    utf8: bool,
    caseless: bool,
    compiled: OnceCell<CompiledRegex>,
}

struct CompiledRegex {
    regex: pcre2::bytes::Regex,
    min_length: usize,
}

impl std::fmt::Debug for Regex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Regex").field("source", &self.source).finish()
    }
}

impl Regex {
    /// Build an uncompiled pattern. Compilation happens lazily on first
    /// [`Regex::run`]/[`Regex::min_length`]/[`Regex::jit`] call.
    pub fn new(source: impl Into<String>, utf8: bool) -> Self {
        Self::with_options(source, utf8, false)
    }

    /// Like [`Regex::new`], but compiled with PCRE2's caseless flag
    /// (`PCRE2_CASELESS`), mirroring `pcre_compile`'s `PCRE_CASELESS` in
    /// `examples/original_source/src/io.c`.
    pub fn with_options(source: impl Into<String>, utf8: bool, caseless: bool) -> Self {
        Regex {
            source: source.into(),
            utf8,
            caseless,
            compiled: OnceCell::new(),
        }
    }

    /// Compile the pattern now and surface any error eagerly. Graph-build
    /// time callers use this so that `InvalidRegex` is reported at `compile`
    /// rather than on first match.
    pub fn compile(&self) -> Result<(), HighlightError> {
        self.ensure_compiled().map(|_| ())
    }

    fn ensure_compiled(&self) -> Result<&CompiledRegex, HighlightError> {
        self.compiled.get_or_try_init(|| {
            let mut builder = pcre2::bytes::RegexBuilder::new();
            builder.anchored(true);
            if self.utf8 {
                builder.utf(true);
            }
            if self.caseless {
                builder.caseless(true);
            }
            builder.jit_if_available(true);
            let regex = builder.build(&self.source).map_err(|e| {
                HighlightError::InvalidRegex(
                    ErrorLocation::new().with_extra(format!("{}: {e}", self.source)),
                    Some(Box::new(e)),
                )
            })?;
            let min_length = regex.minimum_size().unwrap_or(0);
            Ok(CompiledRegex { regex, min_length })
        })
    }

    /// The engine's static lower bound on a matched length, used by the
    /// cycle analyzer's empty-start pass.
    pub fn min_length(&self) -> usize {
        self.ensure_compiled().map(|c| c.min_length).unwrap_or(0)
    }

    /// Run the pattern anchored at `start_offset` within `subject`.
    pub fn run(
        &self,
        subject: &[u8],
        start_offset: usize,
        options: MatchOptions,
    ) -> Result<Option<Captures>, HighlightError> {
        let compiled = self.ensure_compiled()?;
        let mut match_opts = options.to_pcre2();
        match_opts |= pcre2::MatchOptions::ANCHORED;
        let mut locations = compiled.regex.capture_locations();
        let found = compiled
            .regex
            .captures_read_at_with_options(&mut locations, subject, start_offset, match_opts)
            .map_err(|e| {
                HighlightError::Internal(ErrorLocation::new().with_extra(e.to_string()))
            })?;
        if found.is_none() {
            return Ok(None);
        }
        let spans: Vec<Option<(usize, usize)>> =
            (0..locations.len()).map(|i| locations.get(i)).collect();
        let names: Vec<(String, usize)> = compiled
            .regex
            .capture_names()
            .enumerate()
            .filter_map(|(i, n)| n.map(|n| (n.to_string(), i)))
            .collect();
        Ok(Some(Captures { spans, names }))
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_matches_anchored() {
        let re = Regex::new(r"\bint\b", false);
        let caps = re.run(b"int x", 0, MatchOptions::default()).unwrap();
        assert_eq!(caps.unwrap().whole(), (0, 3));
    }

    #[test]
    fn anchored_does_not_search_forward() {
        let re = Regex::new(r"\bint\b", false);
        // "int" begins at offset 2, but the adapter always anchors at the
        // supplied offset, so starting at 0 must fail to match here.
        let caps = re.run(b"  int", 0, MatchOptions::default()).unwrap();
        assert!(caps.is_none());
        let caps = re.run(b"  int", 2, MatchOptions::default()).unwrap();
        assert_eq!(caps.unwrap().whole(), (2, 5));
    }

    #[test]
    fn no_empty_rejects_zero_width_match() {
        let re = Regex::new(r"x*", false);
        let opts = MatchOptions {
            no_empty: true,
            ..Default::default()
        };
        assert!(re.run(b"abc", 0, opts).unwrap().is_none());
    }

    #[test]
    fn invalid_pattern_surfaces_invalid_regex() {
        let re = Regex::new(r"(unclosed", false);
        let err = re.compile().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidRegex);
    }

    #[test]
    fn named_capture_lookup() {
        let re = Regex::new(r"<<\s*(?<delim>\w+)", false);
        let caps = re.run(b"<<EOF", 0, MatchOptions::default()).unwrap().unwrap();
        assert_eq!(caps.name("delim"), Some((2, 5)));
    }
}

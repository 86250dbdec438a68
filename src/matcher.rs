//! The per-document runtime: a state mapping (not a call stack) that lets
//! dynamic end patterns be compiled lazily and deduplicated, plus the
//! per-line longest-match loop.

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;

use crate::dynamic::build_dynamic_regex;
use crate::error::{ErrorLocation, HighlightError, Result};
use crate::graph::{Graph, NextState, Pattern, PatternExtra};
use crate::regex_adapter::{Captures, MatchOptions, Regex};

/// Sentinel span value signalling a UTF-8 validation failure inside
/// [`Matcher::do_match`] — the one error condition this API
/// surfaces via data rather than a `Result`, preserving the iterator-style
/// contract.
pub const SENTINEL_INVALID: usize = usize::MAX;

struct DynamicState {
    regex: Arc<Regex>,
    extracted: Vec<u8>,
    next_state: NextState,
    attribute_idx: usize,
}

struct MappingEntry {
    parent: u32,
    highlight_state: u32,
    dynamic: Option<DynamicState>,
}

struct DynamicInit {
    name: String,
    extracted: Vec<u8>,
    template: String,
    next_state: NextState,
    attribute: usize,
}

enum Candidate<'a> {
    Static(&'a Pattern),
    DynamicEnd {
        regex: Arc<Regex>,
        next_state: NextState,
        attribute_idx: usize,
    },
}

/// A per-document matcher. Owns its mapping vector and dynamic-pattern
/// registry; the state graph it was built from is immutable and may be
/// shared with other matchers.
pub struct Matcher {
    graph: Arc<Graph>,
    mapping: Vec<MappingEntry>,
    dedup: HashMap<(u32, u32, Option<Vec<u8>>), u32>,
    state: u32,

    pub start: usize,
    pub match_start: usize,
    pub end: usize,
    pub begin_attribute: usize,
    pub match_attribute: usize,

    utf8_checked: bool,
    progress: Option<(usize, u32)>,
}

impl Matcher {
    pub fn new(graph: Arc<Graph>) -> Self {
        let mut mapping = Vec::with_capacity(8);
        mapping.push(MappingEntry {
            parent: 0,
            highlight_state: graph.root(),
            dynamic: None,
        });
        Matcher {
            graph,
            mapping,
            dedup: HashMap::new(),
            state: 0,
            start: 0,
            match_start: 0,
            end: 0,
            begin_attribute: 0,
            match_attribute: 0,
            utf8_checked: false,
            progress: None,
        }
    }

    /// The mapping index a host should persist across lines to resume
    /// correctly across lines (the opaque "state mapping entry" handle).
    pub fn get_state(&self) -> u32 {
        self.state
    }

    pub fn next_line(&mut self) -> u32 {
        self.end = 0;
        self.utf8_checked = false;
        self.progress = None;
        self.state
    }

    pub fn reset(&mut self, to_state: u32) {
        assert!(
            (to_state as usize) < self.mapping.len(),
            "reset() to an unknown mapping index"
        );
        self.start = 0;
        self.match_start = 0;
        self.end = 0;
        self.begin_attribute = 0;
        self.match_attribute = 0;
        self.progress = None;
        self.state = to_state;
    }

    fn active_attribute(&self, mapping_idx: u32) -> usize {
        let highlight_state = self.mapping[mapping_idx as usize].highlight_state;
        self.graph.state(highlight_state).attribute_idx
    }

    fn find_or_create_child(&mut self, parent: u32, highlight_state: u32, dyn_init: Option<DynamicInit>) -> u32 {
        let key = (parent, highlight_state, dyn_init.as_ref().map(|d| d.extracted.clone()));
        if let Some(&idx) = self.dedup.get(&key) {
            return idx;
        }
        let dynamic = dyn_init.map(|d| {
            trace!(
                "matcher: compiling dynamic mapping entry state={highlight_state} extracted_len={}",
                d.extracted.len()
            );
            let regex = Arc::new(build_dynamic_regex(
                &d.name,
                &d.extracted,
                &d.template,
                self.graph.utf8_mode,
            ));
            DynamicState {
                regex,
                extracted: d.extracted,
                next_state: d.next_state,
                attribute_idx: d.attribute,
            }
        });
        let idx = self.mapping.len() as u32;
        self.mapping.push(MappingEntry {
            parent,
            highlight_state,
            dynamic,
        });
        self.dedup.insert(key, idx);
        idx
    }

    fn gather_candidates<'a>(&'a self, highlight_state: u32, out: &mut Vec<Candidate<'a>>, seen: &mut Vec<u32>) {
        if seen.contains(&highlight_state) {
            return;
        }
        seen.push(highlight_state);
        for pattern in &self.graph.state(highlight_state).patterns {
            if pattern.is_use_link() {
                if let NextState::Goto(target) = pattern.next_state {
                    self.gather_candidates(target, out, seen);
                }
            } else {
                out.push(Candidate::Static(pattern));
            }
        }
    }

    /// Advance from `p` by one byte, or by the current UTF-8 codepoint's
    /// width when UTF-8 mode is active and the line was already validated.
    fn step(&self, line: &[u8], p: usize) -> usize {
        if !self.graph.utf8_mode || p >= line.len() {
            return p + 1;
        }
        let lead = line[p];
        let width = if lead & 0xf8 == 0xf0 {
            4
        } else if lead & 0xf0 == 0xe0 {
            3
        } else if lead & 0xe0 == 0xc0 {
            2
        } else {
            1
        };
        p + width.max(1)
    }

    /// `match(line, size) -> bool`: the per-line longest-match step.
    pub fn do_match(&mut self, line: &[u8]) -> Result<bool> {
        let size = line.len();

        if self.graph.utf8_mode && !self.utf8_checked {
            if !validate_utf8(line) {
                self.start = SENTINEL_INVALID;
                self.match_start = SENTINEL_INVALID;
                self.end = SENTINEL_INVALID;
                self.begin_attribute = 0;
                self.match_attribute = 0;
                self.state = 0;
                return Ok(false);
            }
            self.utf8_checked = true;
        }

        self.start = self.end;
        self.begin_attribute = self.active_attribute(self.state);

        match self.progress {
            Some((pe, _)) if pe == self.end => {
                let (pe, ps) = self.progress.unwrap();
                if ps < self.state {
                    self.progress = Some((pe, self.state));
                }
            }
            _ => self.progress = Some((self.end, self.state)),
        }

        let mut p = self.end;
        while p <= size {
            if let Some(winner) = self.best_candidate_at(line, p)? {
                let next = self.resolve_next_state(self.state, line, winner.next_state, winner.extra, winner.captures.as_ref())?;

                let is_forward = matches!(winner.next_state, NextState::Goto(_));
                if let Some((last_end, last_state)) = self.progress {
                    if self.end == last_end && next == last_state && is_forward {
                        p = self.step(line, p);
                        continue;
                    }
                }

                self.match_start = p;
                self.end = winner.end;
                self.state = next;
                self.match_attribute = winner.attribute_idx;
                return Ok(true);
            }
            p = self.step(line, p);
        }

        self.match_start = size;
        self.end = size;
        Ok(false)
    }

    fn best_candidate_at<'a>(&'a self, line: &[u8], p: usize) -> Result<Option<Winner<'a>>> {
        let mut candidates = Vec::new();
        let mut seen = Vec::new();
        let highlight_state = self.mapping[self.state as usize].highlight_state;
        self.gather_candidates(highlight_state, &mut candidates, &mut seen);

        if let Some(dyn_state) = &self.mapping[self.state as usize].dynamic {
            candidates.push(Candidate::DynamicEnd {
                regex: dyn_state.regex.clone(),
                next_state: dyn_state.next_state,
                attribute_idx: dyn_state.attribute_idx,
            });
        }

        let mut best: Option<Winner> = None;
        for candidate in &candidates {
            let (regex, next_state, attribute_idx, extra): (&Regex, NextState, usize, Option<&PatternExtra>) =
                match candidate {
                    Candidate::Static(pattern) => {
                        let regex = match &pattern.regex {
                            Some(r) => r.as_ref(),
                            None => continue,
                        };
                        (regex, pattern.next_state, pattern.attribute_idx, pattern.extra.as_ref())
                    }
                    Candidate::DynamicEnd {
                        regex,
                        next_state,
                        attribute_idx,
                    } => (regex.as_ref(), *next_state, *attribute_idx, None),
                };

            // NoChange and forward Goto transitions forbid a zero-width
            // match by default (Goto is exempt only when empty-start is
            // structurally permitted) because either could otherwise recur
            // at a fixed point forever; Exit/dynamic-end transitions always
            // reduce mapping depth or are explicitly memoized, so they are
            // allowed to match zero-width (an end pattern like `$` is
            // inherently zero-width).
            let no_empty = match next_state {
                NextState::Goto(_) => !self.graph.allow_empty_start,
                NextState::NoChange => true,
                NextState::Exit(_) => false,
            };
            let opts = MatchOptions {
                no_empty,
                no_utf8_check: self.utf8_checked,
            };

            if let Some(caps) = regex.run(line, p, opts)? {
                let (_, match_end) = caps.whole();
                let better = match &best {
                    None => true,
                    Some(b) => match_end > b.end,
                };
                if better {
                    best = Some(Winner {
                        end: match_end,
                        attribute_idx,
                        next_state,
                        extra,
                        captures: Some(caps),
                    });
                }
            }
        }
        Ok(best)
    }

    fn resolve_next_state(
        &mut self,
        current: u32,
        line: &[u8],
        next_state: NextState,
        extra: Option<&PatternExtra>,
        captures: Option<&Captures>,
    ) -> Result<u32> {
        let mut next = match next_state {
            NextState::NoChange => current,
            NextState::Exit(n) => {
                let mut idx = current;
                for _ in 0..n.get() {
                    let parent = self.mapping[idx as usize].parent;
                    if parent == idx {
                        break;
                    }
                    idx = parent;
                }
                idx
            }
            NextState::Goto(k) => {
                let dynamic_name = extra.and_then(|e| e.dynamic_name.as_deref());
                match dynamic_name {
                    None => self.find_or_create_child(current, k, None),
                    Some(name) => {
                        let caps = captures.ok_or_else(|| {
                            HighlightError::Internal(ErrorLocation::new().with_extra("dynamic goto missing captures"))
                        })?;
                        let (s, e) = caps.name(name).ok_or_else(|| {
                            HighlightError::Internal(
                                ErrorLocation::new().with_extra(format!("extract group {name:?} not present")),
                            )
                        })?;
                        let extracted = line[s..e].to_vec();
                        let spec = extra
                            .and_then(|e| e.dynamic_pattern.as_ref())
                            .ok_or_else(|| {
                                HighlightError::Internal(
                                    ErrorLocation::new().with_extra("dynamic_name without dynamic_pattern"),
                                )
                            })?;
                        self.find_or_create_child(
                            current,
                            k,
                            Some(DynamicInit {
                                name: name.to_string(),
                                extracted,
                                template: spec.template.clone(),
                                next_state: spec.next_state,
                                attribute: spec.attribute_idx,
                            }),
                        )
                    }
                }
            }
        };

        if let Some(extra) = extra {
            for on_entry in &extra.on_entry {
                let dyn_init = match &on_entry.end_pattern {
                    Some(spec) => {
                        let name = extra.dynamic_name.as_deref().ok_or_else(|| {
                            HighlightError::Internal(ErrorLocation::new().with_extra("on-entry dynamic end without dynamic_name"))
                        })?;
                        let caps = captures.ok_or_else(|| {
                            HighlightError::Internal(ErrorLocation::new().with_extra("on-entry dynamic end missing captures"))
                        })?;
                        let (s, e) = caps.name(name).ok_or_else(|| {
                            HighlightError::Internal(ErrorLocation::new().with_extra("extract group missing for on-entry"))
                        })?;
                        Some(DynamicInit {
                            name: name.to_string(),
                            extracted: line[s..e].to_vec(),
                            template: spec.template.clone(),
                            next_state: spec.next_state,
                            attribute: spec.attribute_idx,
                        })
                    }
                    None => None,
                };
                next = self.find_or_create_child(next, on_entry.state, dyn_init);
            }
        }

        Ok(next)
    }
}

struct Winner<'a> {
    end: usize,
    attribute_idx: usize,
    next_state: NextState,
    extra: Option<&'a PatternExtra>,
    captures: Option<Captures>,
}

/// One-shot-per-line UTF-8 validator, a direct reimplementation of
/// `examples/original_source/src/utf8.c`'s `t3_highlight_utf8check` — not a
/// re-derivation from `std`'s stricter validator, because the offsets this
/// function accepts/rejects at are load-bearing for the partition
/// (Partition).
pub fn validate_utf8(line: &[u8]) -> bool {
    let size = line.len();
    let mut i = 0;
    while i < size {
        let lead = line[i];
        let bytes = match lead & 0xf0 {
            0xf0 => 3,
            0xe0 => 2,
            0xc0 | 0xd0 => 1,
            _ => {
                i += 1;
                continue;
            }
        };

        if bytes + i >= size {
            return false;
        }

        if bytes == 3 {
            if lead > 0xf4 || (lead == 0xf4 && line[i + 1] >= 0x90) {
                return false;
            }
        } else if bytes == 2 && lead == 0xed && line[i + 1] >= 0xa0 {
            return false;
        }

        i += 1;
        let mut remaining = bytes;
        while remaining > 0 {
            if i >= size || (line[i] & 0xc0) != 0x80 {
                return false;
            }
            i += 1;
            remaining -= 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileFlags, StyleResolver};
    use crate::config::parse_description;
    use std::collections::HashMap as StdHashMap;

    fn styles() -> impl StyleResolver {
        let mut map: StdHashMap<String, usize> = StdHashMap::new();
        map.insert("normal".into(), 0);
        let mut next = 1usize;
        move |name: &str| {
            *map.entry(name.to_string()).or_insert_with(|| {
                let idx = next;
                next += 1;
                idx
            })
        }
    }

    fn build(text: &str) -> Arc<Graph> {
        let desc = parse_description(text).unwrap();
        let mut resolver = styles();
        Arc::new(compile(&desc, &mut resolver, CompileFlags::default()).unwrap())
    }

    #[test]
    fn scenario_s1_line_comment() {
        // format=1; start="#"; end="$"; style="comment". Input "a#b" (bytes
        // a=0, #=1, b=2, length 3). "#" only matches anchored at offset 1,
        // so the unmatched prefix "a" becomes the first match's pre-span;
        // "$" is a zero-width end-of-line assertion, so it only succeeds
        // anchored at offset 3 (one past "b"), closing the comment there.
        let graph = build(
            r#"
format: 1
highlight:
  - start: '#'
    end: '$'
    style: comment
"#,
        );
        let mut m = Matcher::new(graph);
        let line = b"a#b";
        assert!(m.do_match(line).unwrap());
        assert_eq!((m.start, m.match_start, m.end), (0, 1, 2));
        assert!(m.do_match(line).unwrap());
        assert_eq!((m.start, m.match_start, m.end), (2, 3, 3));
        assert!(!m.do_match(line).unwrap());
        assert_eq!((m.match_start, m.end), (3, 3));
    }

    #[test]
    fn scenario_s2_keyword() {
        let graph = build(
            r#"
format: 1
highlight:
  - regex: '\bint\b'
    style: keyword
"#,
        );
        let mut m = Matcher::new(graph);
        let line = b"int x";
        assert!(m.do_match(line).unwrap());
        assert_eq!((m.start, m.match_start, m.end), (0, 0, 3));
        assert!(!m.do_match(line).unwrap());
        assert_eq!((m.match_start, m.end), (5, 5));
    }

    #[test]
    fn scenario_s3_nested_braces() {
        let graph = build(
            r#"
format: 1
highlight:
  - start: '\{'
    end: '\}'
    nested: true
    style: misc
"#,
        );
        let mut m = Matcher::new(graph);
        let line = b"{{}}";
        assert!(m.do_match(line).unwrap());
        assert!(m.do_match(line).unwrap());
        // after two opens, depth should be 2 distinct mapping pushes deep
        let depth_after_opens = m.get_state();
        assert_ne!(depth_after_opens, 0);
        assert!(m.do_match(line).unwrap());
        assert!(m.do_match(line).unwrap());
        assert_eq!(m.get_state(), 0, "two closes must return to root");
    }

    #[test]
    fn scenario_s4_dynamic_delim() {
        let graph = build(
            r#"
format: 3
highlight:
  - start: '<<\s*(?<delim>\w+)'
    extract: delim
    end: '^(?&delim)$'
"#,
        );
        let mut m = Matcher::new(graph);
        assert!(m.do_match(b"<<EOF").unwrap());
        let state_after_start = m.get_state();
        assert_ne!(state_after_start, 0);

        // a non-matching line must not close the state
        m.next_line();
        assert!(!m.do_match(b"not the delimiter").unwrap());
        assert_eq!(m.get_state(), state_after_start);

        m.next_line();
        assert!(m.do_match(b"EOF").unwrap());
        assert_eq!(m.get_state(), 0);
    }

    #[test]
    fn partition_property_covers_whole_line() {
        let graph = build(
            r#"
format: 1
highlight:
  - regex: '\bint\b'
    style: keyword
"#,
        );
        let mut m = Matcher::new(graph);
        let line = b"int int int";
        let mut last_end = 0usize;
        loop {
            let matched = m.do_match(line).unwrap();
            assert_eq!(m.start, last_end);
            last_end = m.end;
            if !matched {
                break;
            }
        }
        assert_eq!(last_end, line.len());
    }

    #[test]
    fn utf8_validator_accepts_boundary_and_rejects_surrogates() {
        // D7FF: ED 9F BF (valid boundary just below surrogate range)
        assert!(validate_utf8(&[0xED, 0x9F, 0xBF]));
        // E000: EE 80 80 (valid boundary just above surrogate range)
        assert!(validate_utf8(&[0xEE, 0x80, 0x80]));
        // D800: ED A0 80 (first surrogate, must be rejected)
        assert!(!validate_utf8(&[0xED, 0xA0, 0x80]));
        // 10FFFF: F4 8F BF BF (last valid codepoint)
        assert!(validate_utf8(&[0xF4, 0x8F, 0xBF, 0xBF]));
        // 110000: F4 90 80 80 (first non-codepoint, must be rejected)
        assert!(!validate_utf8(&[0xF4, 0x90, 0x80, 0x80]));
    }

    #[test]
    fn utf8_validator_rejects_truncated_sequence() {
        assert!(!validate_utf8(&[0xE2, 0x82]));
    }

    #[test]
    fn utf8_validator_rejects_bad_continuation_byte() {
        assert!(!validate_utf8(&[0xC2, 0x20]));
    }

    #[test]
    fn forward_progress_is_bounded_by_line_length_plus_one() {
        let graph = build(
            r#"
format: 1
highlight:
  - regex: 'x'
    style: keyword
"#,
        );
        let mut m = Matcher::new(graph);
        let line = b"xxxxxxxxxx";
        let mut successes = 0;
        loop {
            if m.do_match(line).unwrap() {
                successes += 1;
                assert!(successes <= line.len() + 1, "matcher failed to terminate");
            } else {
                break;
            }
        }
        assert_eq!(m.end, line.len());
    }

    #[test]
    fn state_round_trip_across_lines_matches_single_document() {
        // A `start`/`end` pair spanning two lines: the mapping index
        // observed at end-of-line-1 must, after reset() + next_line(),
        // reproduce the same spans matching line 2 would have produced had
        // it been appended to line 1 with an interior newline.
        let graph = build(
            r#"
format: 1
highlight:
  - start: '/\*'
    end: '\*/'
    style: comment
"#,
        );
        let mut m = Matcher::new(graph);
        assert!(m.do_match(b"/* open").unwrap());
        let carried = m.next_line();
        assert_eq!(carried, m.get_state());

        let mut resumed = Matcher::new(Arc::clone(&m.graph));
        resumed.reset(carried);
        resumed.next_line();
        assert!(resumed.do_match(b"close */ tail").unwrap());
        assert_eq!((resumed.start, resumed.match_start), (0, 6));
    }

    #[test]
    fn anti_stall_guard_rejects_zero_width_self_loop_at_same_offset() {
        // A start with min_length 0 feeding into an on-entry substate whose
        // own end is also zero-width: without the guard this would match
        // the same empty span at the same byte offset forever.
        let graph = build(
            r#"
format: 2
allow-empty-start: true
highlight:
  - start: ''
    on-entry:
      - end: ''
        style: misc
"#,
        );
        let mut m = Matcher::new(graph);
        let line = b"ab";
        let mut iterations = 0;
        loop {
            iterations += 1;
            assert!(iterations <= line.len() + 2, "anti-stall guard did not fire");
            if !m.do_match(line).unwrap() {
                break;
            }
        }
    }
}

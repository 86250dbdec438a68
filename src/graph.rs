//! The compiled, immutable state graph: states, patterns, and the
//! `next_state` sum type that replaces the original's sentinel-integer
//! encoding (`NO_CHANGE = -1`, `EXIT_STATE ≤ -2`).

use std::num::NonZeroU8;

use crate::regex_adapter::Regex;

/// Where a successful match sends the matcher.
///
/// The source overloads a signed int with sentinel ranges; this sum type
/// encodes the same three cases explicitly and makes an out-of-range exit
/// depth unrepresentable rather than merely unchecked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    /// Stay in the current highlight state.
    NoChange,
    /// Pop `n` levels up the mapping's parent chain, saturating at the root.
    Exit(NonZeroU8),
    /// Push (or reuse) a mapping entry realizing state graph index `k`.
    Goto(u32),
}

/// A named-capture back-reference that still needs splicing into a
/// companion pattern's text before it can be compiled.
#[derive(Debug, Clone)]
pub struct OnEntry {
    /// The allocated sub-state this on-entry substate realizes.
    pub state: u32,
    /// Set only when this on-entry's `end` is deferred (it embeds the
    /// enclosing `start`'s `dynamic_name` back-reference). An eagerly
    /// compiled `end` needs nothing here — it's already a static `Pattern`
    /// pushed onto `state`'s own pattern list.
    pub end_pattern: Option<DynamicEndSpec>,
}

/// A deferred end pattern awaiting lazy DEFINE-wrapper interpolation: the
/// textual template, the next-state it resolves to once matched, and the
/// attribute it contributes to the match span.
#[derive(Debug, Clone)]
pub struct DynamicEndSpec {
    pub template: String,
    pub next_state: NextState,
    pub attribute_idx: usize,
}

/// Metadata present only on `start` patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternExtra {
    /// Name of a named capture group in the `start` regex whose matched
    /// bytes are later interpolated into the dynamic end pattern.
    pub dynamic_name: Option<String>,
    /// The end pattern's textual template, when deferred (mirrors
    /// `on_entry[].end_pattern` but for the `start` pattern's own `end`).
    pub dynamic_pattern: Option<DynamicEndSpec>,
    pub on_entry: Vec<OnEntry>,
}

/// A single transition rule inside a [`State`].
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Absent for `use`-links and deferred dynamic-end markers.
    pub regex: Option<std::sync::Arc<Regex>>,
    pub attribute_idx: usize,
    pub next_state: NextState,
    pub extra: Option<PatternExtra>,
}

impl Pattern {
    pub fn is_use_link(&self) -> bool {
        self.regex.is_none() && self.extra.is_none()
    }

    pub fn min_length(&self) -> usize {
        self.regex.as_ref().map(|r| r.min_length()).unwrap_or(0)
    }
}

/// A node in the compiled state graph: an ordered pattern list plus the
/// attribute that applies to unmatched runs while this state is active.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub patterns: Vec<Pattern>,
    pub attribute_idx: usize,
}

/// The immutable, shareable-across-threads compiled state graph. Index 0 is
/// always the root; a parent state is always emitted before any sub-state it
/// spawns.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub states: Vec<State>,
    /// Whether this graph was compiled in UTF-8 mode.
    pub utf8_mode: bool,
    /// Whether empty-start patterns are structurally permitted (format ≥ 2
    /// and `allow-empty-start` not explicitly `false`).
    pub allow_empty_start: bool,
    /// Populated by the loader once a graph has been loaded from a named
    /// file, for introspection (`get_langfile`-equivalent).
    pub lang_file: Option<String>,
}

impl Graph {
    pub fn new(utf8_mode: bool, allow_empty_start: bool) -> Self {
        let root = State {
            patterns: Vec::new(),
            attribute_idx: 0,
        };
        Graph {
            states: vec![root],
            utf8_mode,
            allow_empty_start,
            lang_file: None,
        }
    }

    pub fn root(&self) -> u32 {
        0
    }

    pub fn alloc_state(&mut self, attribute_idx: usize) -> u32 {
        let idx = self.states.len() as u32;
        self.states.push(State {
            patterns: Vec::new(),
            attribute_idx,
        });
        idx
    }

    pub fn state(&self, idx: u32) -> &State {
        &self.states[idx as usize]
    }

    pub fn state_mut(&mut self, idx: u32) -> &mut State {
        &mut self.states[idx as usize]
    }
}

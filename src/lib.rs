//! # sedapda — a regex-based pushdown-automaton syntax-highlighting engine
//!
//! The engine splits into three layers:
//!
//! - [`config`] + [`compiler`] turn a YAML-equivalent language description
//!   into an immutable [`graph::Graph`] of states and patterns, validated
//!   against the two cycle classes in [`cycle`].
//! - [`matcher::Matcher`] walks that graph one line at a time, maintaining a
//!   per-document state mapping (not a call stack) so dynamic end patterns
//!   built in [`dynamic`] can be compiled lazily and deduplicated.
//! - [`loader`] resolves a filename, language name, or heuristic detection
//!   to a language description file and produces a compiled graph.
//!
//! [`regex_adapter`] wraps the PCRE2 backend shared by the compiler and the
//! matcher; [`error`] is the structured error taxonomy every fallible entry
//! point returns.

pub mod compiler;
pub mod config;
pub mod cycle;
pub mod dynamic;
pub mod error;
pub mod graph;
pub mod loader;
pub mod matcher;
pub mod regex_adapter;

pub use compiler::{compile, CompileFlags, StyleResolver};
pub use config::{parse_description, parse_map, DescriptionFile, MapFile};
pub use error::{ErrorCode, ErrorLocation, HighlightError, Result};
pub use graph::{Graph, NextState};
pub use matcher::Matcher;

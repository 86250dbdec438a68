//! `serde`-based structs for the two on-disk wire formats the Compiler and
//! loader consume: the language description file and the language map file.
//!
//! Parsing/schema-validation of a bespoke grammar is explicitly out of
//! scope for this crate; this module only adapts already-tokenized YAML-equivalent
//! input (via `serde_yaml`) into the structures the Compiler and loader
//! expect, following syntect's `yaml-load` feature
//! (`serde` + `yaml-rust`-family deserialization of sublime-syntax files).
//! The Compiler walks these structs directly — there is no separate generic
//! tree type sitting between deserialization and compilation.

use serde::{Deserialize, Serialize};

// --- Language description file -----------------------------------------

/// One `%highlight` node. Exactly one of `regex`/`start`/`use` is present;
/// modeled as an internally-tagged-by-presence struct rather than a true
/// `serde` tagged enum because the wire format doesn't carry an explicit
/// discriminant key.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HighlightNode {
    pub regex: Option<String>,
    pub style: Option<String>,
    pub exit: Option<u32>,

    pub start: Option<String>,
    pub end: Option<String>,
    pub extract: Option<String>,
    #[serde(rename = "on-entry")]
    pub on_entry: Vec<OnEntryNode>,
    pub highlight: Vec<HighlightNode>,
    #[serde(rename = "delim-style")]
    pub delim_style: Option<String>,
    pub nested: Option<bool>,

    #[serde(rename = "use")]
    pub use_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OnEntryNode {
    pub end: Option<String>,
    pub exit: Option<u32>,
    pub style: Option<String>,
    #[serde(rename = "delim-style")]
    pub delim_style: Option<String>,
    pub highlight: Vec<HighlightNode>,
    #[serde(rename = "use")]
    pub use_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DefineSection {
    pub highlight: Vec<HighlightNode>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DescriptionFile {
    pub format: u32,
    #[serde(rename = "allow-empty-start")]
    pub allow_empty_start: Option<bool>,
    #[serde(default, rename = "define")]
    pub define: std::collections::BTreeMap<String, DefineSection>,
    #[serde(default)]
    pub highlight: Vec<HighlightNode>,
}

// --- Language map file -------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LangEntry {
    pub name: String,
    #[serde(rename = "lang-file")]
    pub lang_file: String,
    #[serde(rename = "name-regex")]
    pub name_regex: Option<String>,
    #[serde(rename = "file-regex")]
    pub file_regex: Option<String>,
    #[serde(rename = "first-line-regex")]
    pub first_line_regex: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MapFile {
    pub format: u32,
    #[serde(default, rename = "lang")]
    pub lang: Vec<LangEntry>,
}

/// Deserialize a description file from YAML-equivalent text.
pub fn parse_description(text: &str) -> Result<DescriptionFile, serde_yaml::Error> {
    serde_yaml::from_str(text)
}

/// Deserialize a map file from YAML-equivalent text.
pub fn parse_map(text: &str) -> Result<MapFile, serde_yaml::Error> {
    serde_yaml::from_str(text)
}

/// Serialize a description file back to YAML-equivalent text. Exists mainly
/// so a description can be round-tripped through `parse_description` for
/// the delimiter-idempotence property, not as a general authoring API.
pub fn serialize_description(desc: &DescriptionFile) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(desc)
}

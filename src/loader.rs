//! Language detection and loading: the boundary component the
//! Matcher does not depend on, but that the library exposes.
//!
//! Grounded directly on `examples/original_source/src/io.c`'s
//! `load_map`/`merge`/`t3_highlight_list`/`load_by_xname`/`t3_highlight_load`/
//! `t3_highlight_detect`/`t3_highlight_load_by_detect`, adapted to Rust's
//! `Result`/`Drop` so that none of the original's `goto return_error` cleanup
//! labels are needed.

use std::path::{Path, PathBuf};

use log::debug;

use crate::compiler::{compile, CompileFlags, StyleResolver};
use crate::config::{parse_description, parse_map, LangEntry};
use crate::error::{ErrorLocation, HighlightError, Result};
use crate::graph::Graph;
use crate::regex_adapter::{MatchOptions, Regex};

/// Build an `ErrorLocation` from a `serde_yaml` parse failure, carrying the
/// real line number the deserializer reports rather than leaving it unset.
fn location_from_yaml_error(file: impl Into<String>, err: &serde_yaml::Error) -> ErrorLocation {
    let mut loc = ErrorLocation::new().with_file(file.into()).with_extra(err.to_string());
    if let Some(location) = err.location() {
        loc = loc.with_line(location.line() as u32);
    }
    loc
}

/// The fixed, ordered search path this crate resolves bundled language
/// files against when `CompileFlags::use_search_path_on_load` is set. A
/// single user-level directory, then the bundled system directory —
/// narrows the original's 8-entry `RESOURCE_PATHS` array down to the two
/// tiers `load_map`/`t3_highlight_load` actually special-case (XDG data
/// home, then `DATADIR`), since full XDG search-path discovery across
/// multiple vendor directories is out of scope here.
pub fn search_paths(user_dir: Option<&Path>, system_dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(2);
    if let Some(dir) = user_dir {
        paths.push(dir.to_path_buf());
    }
    paths.push(system_dir.to_path_buf());
    paths
}

fn open_from_path(search: &[PathBuf], name: &str) -> Result<String> {
    for dir in search {
        let candidate = dir.join(name);
        if let Ok(text) = std::fs::read_to_string(&candidate) {
            return Ok(text);
        }
    }
    Err(HighlightError::BadArg(
        ErrorLocation::new().with_extra(format!("{name} not found on search path")),
    ))
}

/// Merge a user-level `lang.map` (optional, missing is not an error) in
/// front of the mandatory system-level one. Mirrors `load_map`/`merge`:
/// the user entries are linked onto the front of the merged list.
pub fn load_map(user_map_path: Option<&Path>, system_map_path: &Path) -> Result<Vec<LangEntry>> {
    let mut entries = Vec::new();

    if let Some(path) = user_map_path {
        if let Ok(text) = std::fs::read_to_string(path) {
            match parse_map(&text) {
                Ok(map) => entries.extend(map.lang),
                Err(e) => debug!("loader: ignoring unparsable user map {path:?}: {e}"),
            }
        }
    }

    let system_text = std::fs::read_to_string(system_map_path).map_err(|_| {
        HighlightError::BadArg(ErrorLocation::new().with_extra(format!("{system_map_path:?} not found")))
    })?;
    let system_map = parse_map(&system_text).map_err(|e| {
        HighlightError::InvalidFormat(location_from_yaml_error(
            system_map_path.to_string_lossy().to_string(),
            &e,
        ))
    })?;
    entries.extend(system_map.lang);

    Ok(entries)
}

/// `list(flags) -> Vec<(name, lang_file)>`, grounded on `t3_highlight_list`.
pub fn list(user_map_path: Option<&Path>, system_map_path: &Path) -> Result<Vec<(String, String)>> {
    Ok(load_map(user_map_path, system_map_path)?
        .into_iter()
        .map(|e| (e.name, e.lang_file))
        .collect())
}

fn load_by_xname(
    entries: &[LangEntry],
    regex_field: impl Fn(&LangEntry) -> Option<&str>,
    name: &str,
) -> Result<String> {
    for entry in entries {
        let Some(pattern) = regex_field(entry) else {
            continue;
        };
        let regex = Regex::new(pattern, false);
        if regex.compile().is_err() {
            continue;
        }
        if let Ok(Some(_)) = regex.run(name.as_bytes(), 0, MatchOptions::default()) {
            return Ok(entry.lang_file.clone());
        }
        // non-anchored semantics for name/file matching: the original scans
        // with pcre_exec unanchored, so also probe every later offset.
        for p in 1..=name.len() {
            if let Ok(Some(_)) = regex.run(name.as_bytes(), p, MatchOptions::default()) {
                return Ok(entry.lang_file.clone());
            }
        }
    }
    Err(HighlightError::NoSyntax(ErrorLocation::new()))
}

pub fn load_by_filename(
    user_map_path: Option<&Path>,
    system_map_path: &Path,
    search: &[PathBuf],
    filename: &str,
    styles: &mut impl StyleResolver,
    flags: CompileFlags,
) -> Result<Graph> {
    let entries = load_map(user_map_path, system_map_path)?;
    let lang_file = load_by_xname(&entries, |e| e.file_regex.as_deref(), filename)?;
    load(search, &lang_file, styles, flags)
}

pub fn load_by_langname(
    user_map_path: Option<&Path>,
    system_map_path: &Path,
    search: &[PathBuf],
    langname: &str,
    styles: &mut impl StyleResolver,
    flags: CompileFlags,
) -> Result<Graph> {
    let entries = load_map(user_map_path, system_map_path)?;
    let lang_file = load_by_xname(&entries, |e| e.name_regex.as_deref(), langname)?;
    load(search, &lang_file, styles, flags)
}

/// `load(path) -> Result<Graph, HighlightError>`, grounded on
/// `t3_highlight_load`.
pub fn load(
    search: &[PathBuf],
    path: &str,
    styles: &mut impl StyleResolver,
    flags: CompileFlags,
) -> Result<Graph> {
    let text = if flags.use_search_path_on_load {
        open_from_path(search, path)?
    } else {
        std::fs::read_to_string(path).map_err(|_| {
            HighlightError::BadArg(ErrorLocation::new().with_extra(format!("{path} not found")))
        })?
    };

    let desc = parse_description(&text)
        .map_err(|e| HighlightError::InvalidFormat(location_from_yaml_error(path.to_string(), &e)))?;

    let mut graph = compile(&desc, styles, flags)?;
    graph.lang_file = Some(path.to_string());
    Ok(graph)
}

const EMACS_MODE_TAG: &str = r"-\*-\s*(?:mode:\s*)([^\s;]+);?.*-\*-";
const VIM_MODELINE_TAG: &str = r"\s(?:vim?|ex): .*[: ]syntax=([^\s:]+)";

/// Detect-by-heuristic: Emacs mode tag, then Vim/ex modeline, then (only
/// when `first` is true) each map entry's `first-line-regex`, in map order.
/// Grounded on `t3_highlight_detect` — note the two fixed heuristics run
/// regardless of `first`; only the map-entry fallback is gated on it.
pub fn detect(
    line: &[u8],
    first: bool,
    user_map_path: Option<&Path>,
    system_map_path: &Path,
) -> Result<Option<String>> {
    let emacs = Regex::with_options(EMACS_MODE_TAG, false, true);
    emacs.compile()?;
    for p in 0..=line.len() {
        if let Some(caps) = emacs.run(line, p, MatchOptions::default())? {
            if let Some((s, e)) = caps.get(1) {
                return Ok(Some(String::from_utf8_lossy(&line[s..e]).into_owned()));
            }
        }
    }

    let vim = Regex::new(VIM_MODELINE_TAG, false);
    vim.compile()?;
    for p in 0..=line.len() {
        if let Some(caps) = vim.run(line, p, MatchOptions::default())? {
            if let Some((s, e)) = caps.get(1) {
                return Ok(Some(String::from_utf8_lossy(&line[s..e]).into_owned()));
            }
        }
    }

    if !first {
        return Ok(None);
    }

    let entries = load_map(user_map_path, system_map_path)?;
    for entry in &entries {
        let Some(pattern) = &entry.first_line_regex else {
            continue;
        };
        let regex = Regex::new(pattern.clone(), false);
        if regex.compile().is_err() {
            continue;
        }
        for p in 0..=line.len() {
            if regex.run(line, p, MatchOptions::default())?.is_some() {
                return Ok(Some(entry.name.clone()));
            }
        }
    }
    Ok(None)
}

/// `load_by_detect`, grounded on `t3_highlight_load_by_detect`: detect, then
/// load by the resulting language name; a `None` detection surfaces as
/// `NoSyntax` rather than a further search.
pub fn load_by_detect(
    line: &[u8],
    first: bool,
    user_map_path: Option<&Path>,
    system_map_path: &Path,
    search: &[PathBuf],
    styles: &mut impl StyleResolver,
    flags: CompileFlags,
) -> Result<Graph> {
    let name = detect(line, first, user_map_path, system_map_path)?
        .ok_or_else(|| HighlightError::NoSyntax(ErrorLocation::new()))?;
    load_by_langname(user_map_path, system_map_path, search, &name, styles, flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn styles() -> impl StyleResolver {
        let mut map: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut next = 1usize;
        move |name: &str| {
            *map.entry(name.to_string()).or_insert_with(|| {
                let idx = next;
                next += 1;
                idx
            })
        }
    }

    fn write_tmp(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn detect_prefers_emacs_tag_over_vim_modeline() {
        let line = b"# -*- mode: python -*- vim: set syntax=ruby :";
        let name = detect(line, false, None, Path::new("/nonexistent")).unwrap();
        assert_eq!(name.as_deref(), Some("python"));
    }

    #[test]
    fn detect_emacs_tag_is_case_insensitive() {
        // `Mode:` with a capital M is the common convention in the wild.
        let line = b"# -*- Mode: Python -*-";
        let name = detect(line, false, None, Path::new("/nonexistent")).unwrap();
        assert_eq!(name.as_deref(), Some("Python"));
    }

    #[test]
    fn detect_falls_back_to_vim_modeline() {
        let line = b"// vim: set syntax=rust :";
        let name = detect(line, false, None, Path::new("/nonexistent")).unwrap();
        assert_eq!(name.as_deref(), Some("rust"));
    }

    #[test]
    fn detect_without_first_suppresses_map_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let map_path = write_tmp(
            &dir,
            "lang.map",
            r#"
format: 1
lang:
  - name: shell
    lang-file: shell.lang
    first-line-regex: '^#!.*sh'
"#,
        );
        let line = b"#!/bin/sh";
        assert!(detect(line, false, None, &map_path).unwrap().is_none());
        assert_eq!(
            detect(line, true, None, &map_path).unwrap().as_deref(),
            Some("shell")
        );
    }

    #[test]
    fn load_map_merges_user_entries_before_system_entries() {
        let dir = tempfile::tempdir().unwrap();
        let user_map = write_tmp(
            &dir,
            "user.map",
            r#"
format: 1
lang:
  - name: custom
    lang-file: custom.lang
"#,
        );
        let system_map = write_tmp(
            &dir,
            "system.map",
            r#"
format: 1
lang:
  - name: rust
    lang-file: rust.lang
"#,
        );
        let entries = load_map(Some(&user_map), &system_map).unwrap();
        assert_eq!(entries[0].name, "custom");
        assert_eq!(entries[1].name, "rust");
    }

    #[test]
    fn load_map_tolerates_unparsable_user_map() {
        // Initializing the subscriber here means `RUST_LOG=debug cargo test`
        // surfaces the `debug!` logged when a user map fails to parse.
        let _ = env_logger::try_init();
        let dir = tempfile::tempdir().unwrap();
        let user_map = write_tmp(&dir, "user.map", "lang: [unterminated flow sequence");
        let system_map = write_tmp(
            &dir,
            "system.map",
            r#"
format: 1
lang:
  - name: rust
    lang-file: rust.lang
"#,
        );
        let entries = load_map(Some(&user_map), &system_map).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "rust");
    }

    #[test]
    fn load_map_tolerates_missing_user_map() {
        let dir = tempfile::tempdir().unwrap();
        let system_map = write_tmp(
            &dir,
            "system.map",
            r#"
format: 1
lang:
  - name: rust
    lang-file: rust.lang
"#,
        );
        let entries = load_map(Some(Path::new("/does/not/exist")), &system_map).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn load_by_filename_picks_first_matching_entry() {
        let dir = tempfile::tempdir().unwrap();
        write_tmp(
            &dir,
            "rust.lang",
            r#"
format: 1
highlight:
  - regex: '\bfn\b'
    style: keyword
"#,
        );
        let system_map = write_tmp(
            &dir,
            "system.map",
            r#"
format: 1
lang:
  - name: rust
    lang-file: rust.lang
    file-regex: '\.rs$'
"#,
        );
        let search = vec![dir.path().to_path_buf()];
        let mut resolver = styles();
        let graph = load_by_filename(
            None,
            &system_map,
            &search,
            "main.rs",
            &mut resolver,
            CompileFlags {
                use_search_path_on_load: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(graph.states[0].patterns.len(), 1);
    }

    #[test]
    fn load_by_filename_reports_no_syntax_when_unmatched() {
        let dir = tempfile::tempdir().unwrap();
        let system_map = write_tmp(
            &dir,
            "system.map",
            r#"
format: 1
lang:
  - name: rust
    lang-file: rust.lang
    file-regex: '\.rs$'
"#,
        );
        let mut resolver = styles();
        let err = load_by_filename(
            None,
            &system_map,
            &[],
            "main.py",
            &mut resolver,
            CompileFlags::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NoSyntax);
    }

    #[test]
    fn load_reports_real_line_number_on_malformed_description() {
        let dir = tempfile::tempdir().unwrap();
        let lang_path = write_tmp(
            &dir,
            "broken.lang",
            r#"
format: 1
highlight:
  - regex: '\bfn\b'
    style: [this, is, not, a, style, string]
"#,
        );
        let mut resolver = styles();
        let err = load(&[], lang_path.to_str().unwrap(), &mut resolver, CompileFlags::default())
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidFormat);
        assert!(
            err.location().line_number.is_some(),
            "a serde_yaml parse failure should carry the line it failed on"
        );
    }
}

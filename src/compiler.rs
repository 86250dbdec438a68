//! Walks a parsed description tree and emits an immutable [`Graph`].
//!
//! Grounded on `examples/original_source/src/highlight.c`'s `init_state`/
//! `add_highlight` family and, for the dynamic-end DEFINE-wrapper
//! construction, on syntect's
//! `substitute_backrefs_in_regex` family
//! (`other_examples/89af9b15_trishume-syntect__src-parsing-syntax_definition.rs.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::config::{DescriptionFile, HighlightNode, OnEntryNode};
use crate::cycle::check_cycles;
use crate::error::{ErrorLocation, HighlightError, Result};
use crate::graph::{DynamicEndSpec, Graph, NextState, OnEntry, Pattern, PatternExtra};
use crate::regex_adapter::Regex;

/// Resolves a style name (possibly suffixed `@scope`) to a host-defined
/// integer attribute index.
pub trait StyleResolver {
    fn resolve(&mut self, name: &str) -> usize;
}

impl<F: FnMut(&str) -> usize> StyleResolver for F {
    fn resolve(&mut self, name: &str) -> usize {
        self(name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileFlags {
    pub utf8_mode: bool,
    pub skip_utf8_validation: bool,
    pub use_search_path_on_load: bool,
    pub verbose_errors: bool,
}

struct Ctx<'a, S: StyleResolver> {
    graph: Graph,
    defines: &'a HashMap<String, &'a [HighlightNode]>,
    use_map: HashMap<String, u32>,
    styles: &'a mut S,
}

/// Compile a parsed description tree into an immutable state graph, or a
/// structured error.
pub fn compile<S: StyleResolver>(
    desc: &DescriptionFile,
    styles: &mut S,
    flags: CompileFlags,
) -> Result<Graph> {
    let allow_empty_start = match desc.format {
        1 => false,
        2 | 3 => desc.allow_empty_start.unwrap_or(true),
        other => {
            return Err(HighlightError::InvalidFormat(
                ErrorLocation::new().with_extra(format!("unsupported format {other}")),
            ));
        }
    };

    let defines: HashMap<String, &[HighlightNode]> = desc
        .define
        .iter()
        .map(|(name, section)| (name.clone(), section.highlight.as_slice()))
        .collect();

    let mut ctx = Ctx {
        graph: Graph::new(flags.utf8_mode, allow_empty_start),
        defines: &defines,
        use_map: HashMap::new(),
        styles,
    };

    let root = ctx.graph.root();
    walk_highlights(&mut ctx, root, &desc.highlight, 0)?;

    check_cycles(&ctx.graph)?;

    Ok(ctx.graph)
}

fn walk_highlights<S: StyleResolver>(
    ctx: &mut Ctx<S>,
    current: u32,
    nodes: &[HighlightNode],
    inherited_attr: usize,
) -> Result<()> {
    for node in nodes {
        walk_one(ctx, current, node, inherited_attr)?;
    }
    Ok(())
}

fn resolve_style<S: StyleResolver>(ctx: &mut Ctx<S>, style: &Option<String>, inherited: usize) -> usize {
    match style {
        Some(name) => ctx.styles.resolve(name),
        None => inherited,
    }
}

fn validate_extract_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(HighlightError::InvalidName(
            ErrorLocation::new().with_extra(format!("extract name {name:?} must be ASCII letters")),
        ));
    }
    Ok(())
}

fn next_state_for_exit(exit: Option<u32>, default_no_change: bool) -> Result<NextState> {
    match exit {
        None if default_no_change => Ok(NextState::NoChange),
        None => Ok(NextState::Exit(std::num::NonZeroU8::new(1).unwrap())),
        Some(0) => Ok(NextState::NoChange),
        Some(n) => {
            let n = u8::try_from(n).map_err(|_| {
                HighlightError::InvalidFormat(ErrorLocation::new().with_extra("exit depth too large"))
            })?;
            Ok(NextState::Exit(std::num::NonZeroU8::new(n).unwrap()))
        }
    }
}

fn walk_one<S: StyleResolver>(
    ctx: &mut Ctx<S>,
    current: u32,
    node: &HighlightNode,
    inherited_attr: usize,
) -> Result<()> {
    if let Some(pattern) = &node.regex {
        let attr = resolve_style(ctx, &node.style, inherited_attr);
        let regex = Arc::new(Regex::new(pattern.clone(), ctx.graph.utf8_mode));
        regex.compile()?;
        let next_state = next_state_for_exit(node.exit, true)?;
        debug!("compiler: plain regex pattern in state {current} -> {next_state:?}");
        ctx.graph.state_mut(current).patterns.push(Pattern {
            regex: Some(regex),
            attribute_idx: attr,
            next_state,
            extra: None,
        });
        return Ok(());
    }

    if let Some(start_pattern) = &node.start {
        compile_start(ctx, current, node, start_pattern, inherited_attr)?;
        return Ok(());
    }

    if let Some(use_name) = &node.use_name {
        compile_use(ctx, current, use_name)?;
        return Ok(());
    }

    Err(HighlightError::InvalidFormat(
        ErrorLocation::new().with_extra("highlight node has none of regex/start/use"),
    ))
}

fn compile_start<S: StyleResolver>(
    ctx: &mut Ctx<S>,
    current: u32,
    node: &HighlightNode,
    start_pattern: &str,
    inherited_attr: usize,
) -> Result<()> {
    let style_attr = resolve_style(ctx, &node.style, inherited_attr);
    let delim_attr = resolve_style(ctx, &node.delim_style, style_attr);

    let start_regex = Arc::new(Regex::new(start_pattern.to_string(), ctx.graph.utf8_mode));
    start_regex.compile()?;

    let dynamic_name = match &node.extract {
        Some(name) => {
            validate_extract_name(name)?;
            Some(name.clone())
        }
        None => None,
    };

    let sub_state = ctx.graph.alloc_state(style_attr);
    debug!("compiler: allocated state {sub_state} for start pattern {start_pattern:?}");

    walk_highlights(ctx, sub_state, &node.highlight, style_attr)?;

    let on_entry = resolve_on_entry(ctx, &node.on_entry, style_attr, dynamic_name.as_deref())?;

    let mut dynamic_pattern = None;
    if let Some(end_text) = &node.end {
        resolve_end(
            ctx,
            sub_state,
            end_text,
            node.exit,
            dynamic_name.as_deref(),
            delim_attr,
            has_highlight_before_end(node),
            &mut dynamic_pattern,
        )?;
    }

    if node.nested.unwrap_or(false) {
        ctx.graph.state_mut(sub_state).patterns.push(Pattern {
            regex: Some(start_regex.clone()),
            attribute_idx: delim_attr,
            next_state: NextState::Goto(sub_state),
            extra: None,
        });
    }

    let extra = PatternExtra {
        dynamic_name,
        dynamic_pattern,
        on_entry,
    };

    ctx.graph.state_mut(current).patterns.push(Pattern {
        regex: Some(start_regex),
        attribute_idx: delim_attr,
        next_state: NextState::Goto(sub_state),
        extra: Some(extra),
    });

    Ok(())
}

/// The source-tree order rule: an `end` key textually before any
/// `%highlight` child is prepended to the sub-state's pattern list, so it
/// wins ties against body patterns; otherwise it is appended. Since this
/// crate's description structs don't preserve raw token order across the
/// `end`/`highlight` boundary (the wire format is YAML-equivalent, which is
/// unordered at the map level), authors who need the "end before body" tie-
/// break explicitly mark it by leaving the `highlight` list empty until the
/// delimiter is placed; in practice this matters only when `nested` bodies
/// are absent, so the common case (`end` declared with no same-priority
/// sibling pattern) is unaffected either way.
fn has_highlight_before_end(node: &HighlightNode) -> bool {
    node.highlight.is_empty()
}

#[allow(clippy::too_many_arguments)]
fn resolve_end<S: StyleResolver>(
    ctx: &mut Ctx<S>,
    sub_state: u32,
    end_text: &str,
    exit: Option<u32>,
    dynamic_name: Option<&str>,
    delim_attr: usize,
    prepend: bool,
    dynamic_pattern_out: &mut Option<DynamicEndSpec>,
) -> Result<()> {
    let next_state = next_state_for_exit(exit, false)?;

    if dynamic_name.is_some() && matches!(next_state, NextState::Exit(_)) {
        // Validate compilability via the synthetic DEFINE wrapper, then
        // discard the compiled form; the real compile happens lazily at
        // match time once the extracted bytes are known.
        let name = dynamic_name.unwrap();
        let probe_source = format!("(?(DEFINE)(?<{name}>))" ) + end_text;
        let probe = Regex::new(probe_source, ctx.graph.utf8_mode);
        probe.compile()?;
        *dynamic_pattern_out = Some(DynamicEndSpec {
            template: end_text.to_string(),
            next_state,
            attribute_idx: delim_attr,
        });
        trace!("compiler: deferred dynamic end pattern {end_text:?}");
        return Ok(());
    }

    let end_regex = Arc::new(Regex::new(end_text.to_string(), ctx.graph.utf8_mode));
    end_regex.compile()?;
    let pattern = Pattern {
        regex: Some(end_regex),
        attribute_idx: delim_attr,
        next_state,
        extra: None,
    };
    let patterns = &mut ctx.graph.state_mut(sub_state).patterns;
    if prepend {
        patterns.insert(0, pattern);
    } else {
        patterns.push(pattern);
    }
    Ok(())
}

fn resolve_on_entry<S: StyleResolver>(
    ctx: &mut Ctx<S>,
    entries: &[OnEntryNode],
    inherited_attr: usize,
    start_dynamic_name: Option<&str>,
) -> Result<Vec<OnEntry>> {
    let mut result = Vec::with_capacity(entries.len());
    for entry in entries {
        let style_attr = resolve_style(ctx, &entry.style, inherited_attr);
        let delim_attr = resolve_style(ctx, &entry.delim_style, style_attr);
        let state = ctx.graph.alloc_state(style_attr);

        if let Some(use_name) = &entry.use_name {
            compile_use(ctx, state, use_name)?;
        }
        walk_highlights(ctx, state, &entry.highlight, style_attr)?;

        let end_pattern = match &entry.end {
            None => None,
            Some(end_text) => {
                let next_state = next_state_for_exit(entry.exit, false)?;
                if start_dynamic_name.is_some() && matches!(next_state, NextState::Exit(_)) {
                    let name = start_dynamic_name.unwrap();
                    let probe_source = format!("(?(DEFINE)(?<{name}>))") + end_text;
                    let probe = Regex::new(probe_source, ctx.graph.utf8_mode);
                    probe.compile()?;
                    Some(DynamicEndSpec {
                        template: end_text.clone(),
                        next_state,
                        attribute_idx: delim_attr,
                    })
                } else {
                    let end_regex = Arc::new(Regex::new(end_text.clone(), ctx.graph.utf8_mode));
                    end_regex.compile()?;
                    ctx.graph.state_mut(state).patterns.push(Pattern {
                        regex: Some(end_regex),
                        attribute_idx: delim_attr,
                        next_state,
                        extra: None,
                    });
                    None
                }
            }
        };

        result.push(OnEntry { state, end_pattern });
    }
    Ok(result)
}

fn compile_use<S: StyleResolver>(ctx: &mut Ctx<S>, current: u32, name: &str) -> Result<()> {
    if let Some(&cached) = ctx.use_map.get(name) {
        trace!("compiler: use {name:?} cache hit -> state {cached}");
        ctx.graph.state_mut(current).patterns.push(Pattern {
            regex: None,
            attribute_idx: ctx.graph.state(cached).attribute_idx,
            next_state: NextState::Goto(cached),
            extra: None,
        });
        return Ok(());
    }

    let nodes: &[HighlightNode] = *ctx.defines.get(name).ok_or_else(|| {
        HighlightError::UndefinedUse(ErrorLocation::new().with_extra(format!("use = {name:?}")))
    })?;

    let callee_attr = ctx.graph.state(current).attribute_idx;
    let sub_state = ctx.graph.alloc_state(callee_attr);
    ctx.use_map.insert(name.to_string(), sub_state);
    debug!("compiler: use {name:?} miss, allocated state {sub_state}");

    walk_highlights(ctx, sub_state, nodes, callee_attr)?;

    // Resolution of an open question: the callee's attribute applies
    // during inlining, not the caller's. Flag the mismatch for authors
    // relying on the opposite historical reading.
    if ctx.graph.state(current).attribute_idx != ctx.graph.state(sub_state).attribute_idx {
        warn!(
            "compiler: use {name:?} inlines state {sub_state} whose attribute ({}) differs from caller state {current}'s ({})",
            ctx.graph.state(sub_state).attribute_idx,
            ctx.graph.state(current).attribute_idx
        );
    }

    ctx.graph.state_mut(current).patterns.push(Pattern {
        regex: None,
        attribute_idx: ctx.graph.state(sub_state).attribute_idx,
        next_state: NextState::Goto(sub_state),
        extra: None,
    });
    Ok(())
}

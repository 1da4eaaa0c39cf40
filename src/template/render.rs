use std::collections::{BTreeMap, BTreeSet};

use crate::docx::tree::{NodeId, XmlTree};
use crate::record::Record;
use crate::template::error::{MalformedReason, TemplateError, TemplateResult};
use crate::template::expand::{drain_loops, expand, find_loop, tokens_beside_body, LoopRegion};
use crate::template::locate::{locate, Tag, TagMap};
use crate::template::normalize::{normalize, NormalizeStats};
use crate::template::scan::{
    body, check_sentinels, leaf_block, leaves_with_state, loop_segments, tokens, LoopState,
    LOOP_CLOSE, LOOP_OPEN,
};
use crate::template::substitute::apply_to_leaf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    /// The document body, filled from the top-level record.
    Document,
    /// One stamped loop copy, filled from one list item.
    Item,
}

/// What one render did, for logging by the caller.
#[derive(Clone, Debug, Default)]
pub struct RenderReport {
    pub normalize: NormalizeStats,
    /// Top-level scalar fields and how many tokens each replaced.
    pub substituted: BTreeMap<String, usize>,
    /// Top-level list fields and how many copies each produced.
    pub expanded: BTreeMap<String, usize>,
    /// Top-level tags resolved for list fields.
    pub tags: TagMap,
    /// For each top-level list field, the tags resolved inside its last copy.
    pub item_tags: BTreeMap<String, TagMap>,
    /// Record fields that never appeared in the template.
    pub unused_fields: Vec<String>,
    pub omitted_blocks: usize,
    pub stamped_copies: usize,
    pub warnings: Vec<String>,
}

/// Cleans up the body without substituting anything.
pub fn normalize_body(tree: &mut XmlTree) -> TemplateResult<NormalizeStats> {
    let body = body(tree)?;
    normalize(tree, &[body])
}

/// Renders `record` into the document body in place. On error the tree is left half-mutated
/// and must be discarded.
pub fn render(tree: &mut XmlTree, record: &Record) -> TemplateResult<RenderReport> {
    let body = body(tree)?;
    let mut report = RenderReport {
        normalize: normalize(tree, &[body])?,
        ..Default::default()
    };
    check_sentinels(tree, &[body])?;

    fill(tree, &[body], record, Scope::Document, &mut report)?;

    report.unused_fields = record
        .names()
        .filter(|n| !report.substituted.contains_key(*n) && !report.expanded.contains_key(*n))
        .map(|n| n.to_string())
        .collect();
    Ok(report)
}

fn fill(
    tree: &mut XmlTree,
    roots: &[NodeId],
    record: &Record,
    scope: Scope,
    report: &mut RenderReport,
) -> TemplateResult<TagMap> {
    report.omitted_blocks += prune_omitted(tree, roots, record)?;

    // Snapshot before expansion so copies are never substituted with this scope's values.
    let snapshot = leaves_with_state(tree, roots);
    let known: BTreeSet<String> = match scope {
        Scope::Document => record.scalar_names(),
        Scope::Item => outside_token_names(tree, &snapshot),
    };

    let mut tags = locate(tree, roots, &record.list_names())?;
    for (name, tag) in &tags {
        if tag.occurrences > 1 {
            report.warnings.push(format!(
                "[{name}] appears {} times; only the last occurrence drives the loop",
                tag.occurrences
            ));
        }
    }

    if scope == Scope::Item {
        // Loops no tag drives are dropped while the copy still holds only template text.
        let mut driven = Vec::with_capacity(tags.len());
        for (name, tag) in &tags {
            driven.push(find_loop(tree, tag.leaf, tag.offset, name)?.opening());
        }
        drain_loops(tree, roots, &driven)?;
    }

    for (name, tag) in &tags {
        if !tree.is_attached(tag.leaf) {
            report.warnings.push(format!(
                "[{name}] was inside another loop's scaffold and was not expanded"
            ));
            continue;
        }
        let region = find_loop(tree, tag.leaf, tag.offset, name)?;
        reject_fields_beside(tree, &region, &known, name)?;
        let items = record.list(name).unwrap_or(&[]);
        let expansion = expand(tree, &region, items, |tree, units, item| {
            fill(tree, units, item, Scope::Item, report)
        })?;
        report.stamped_copies += expansion.copies.len();
        if scope == Scope::Document {
            report.expanded.insert(name.clone(), expansion.copies.len());
            report.item_tags.insert(name.clone(), expansion.last_tags);
        }
    }

    for (leaf, entry) in snapshot {
        if !tree.is_attached(leaf) {
            continue;
        }
        let hits = apply_to_leaf(tree, leaf, entry, record, &known);
        for (name, count) in hits {
            if scope == Scope::Document {
                *report.substituted.entry(name.clone()).or_insert(0) += count;
            }
            let occurrences = tags.get(&name).map_or(0, |t| t.occurrences) + count;
            tags.insert(
                name.clone(),
                Tag {
                    label: name.clone(),
                    name,
                    leaf,
                    omit: false,
                    offset: 0,
                    occurrences,
                },
            );
        }
    }

    if scope == Scope::Document {
        report.tags = tags.clone();
    }
    Ok(tags)
}

/// Fields of this scope must not ride along into the copies of a loop they sit next to.
fn reject_fields_beside(
    tree: &XmlTree,
    region: &LoopRegion,
    known: &BTreeSet<String>,
    list: &str,
) -> TemplateResult<()> {
    match tokens_beside_body(tree, region)
        .into_iter()
        .find(|(_, name)| known.contains(name))
    {
        Some((leaf, field)) => Err(TemplateError::malformed(
            tree,
            leaf,
            MalformedReason::FieldBesideLoop {
                field,
                list: list.to_string(),
            },
        )),
        None => Ok(()),
    }
}

fn outside_token_names(
    tree: &XmlTree,
    leaves: &[(NodeId, LoopState)],
) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for &(leaf, entry) in leaves {
        let text = tree.leaf_text(leaf);
        let (segments, _) = loop_segments(&text, entry);
        for (range, outside) in segments {
            if outside {
                names.extend(tokens(&text[range]).map(|t| t.name));
            }
        }
    }
    names
}

/// Drops the paragraph around each `[!name]` marker (outside loop bodies) whose field is blank
/// in `record`. A marker naming an empty list also takes the loop after it. Returns the number
/// of marker paragraphs removed.
fn prune_omitted(
    tree: &mut XmlTree,
    roots: &[NodeId],
    record: &Record,
) -> TemplateResult<usize> {
    let mut doomed: Vec<NodeId> = Vec::new();
    let mut loop_units: Vec<NodeId> = Vec::new();
    for (leaf, entry) in leaves_with_state(tree, roots) {
        let text = tree.leaf_text(leaf);
        let (segments, _) = loop_segments(&text, entry);
        for (range, outside) in segments {
            if !outside {
                continue;
            }
            for tok in tokens(&text[range.clone()]) {
                if !tok.omit || !record.is_blank(&tok.name) {
                    continue;
                }
                let block = leaf_block(tree, leaf)?;
                if has_sentinel(tree, block) {
                    return Err(TemplateError::malformed(
                        tree,
                        leaf,
                        MalformedReason::OmitMarkerWithSentinel { field: tok.name },
                    ));
                }
                if record.list(&tok.name).is_some() {
                    let after = range.start + tok.range.end;
                    loop_units.extend(find_loop(tree, leaf, after, &tok.name)?.units);
                }
                if !doomed.contains(&block) {
                    doomed.push(block);
                }
            }
        }
    }
    for &block in &doomed {
        tree.detach(block);
    }
    for unit in loop_units {
        tree.detach(unit);
    }
    Ok(doomed.len())
}

fn has_sentinel(tree: &XmlTree, block: NodeId) -> bool {
    tree.text_leaves(&[block])
        .into_iter()
        .any(|l| tree.leaf_text(l).contains(&[LOOP_OPEN, LOOP_CLOSE][..]))
}

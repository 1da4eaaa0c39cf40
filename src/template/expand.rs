//! Loop location and expansion.
//!
//! A loop body is everything between a `<` and its matching `>` sentinel. The scaffold is the run
//! of sibling units (children of one container, usually paragraphs of the body or of a table
//! cell) from the unit holding `<` to the unit holding `>`. Each record gets a deep copy of the
//! scaffold with the two sentinels removed, inserted after the scaffold in record order; the
//! scaffold itself is then dropped.

use crate::docx::tree::{NodeId, NodeKind, XmlTree, W_SECT_PR};
use crate::record::Record;
use crate::template::error::{MalformedReason, TemplateError, TemplateResult};
use crate::template::locate::TagMap;
use crate::template::scan::{
    leaves_with_state, loop_segments, tokens, LoopState, LOOP_CLOSE, LOOP_OPEN,
};

/// Where a sentinel sits: unit index within the scaffold, leaf index within that unit, byte
/// offset within the leaf text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SentinelPos {
    unit: usize,
    leaf: usize,
    offset: usize,
}

#[derive(Clone, Debug)]
pub struct LoopRegion {
    pub container: NodeId,
    pub units: Vec<NodeId>,
    open_leaf: NodeId,
    open: SentinelPos,
    close: SentinelPos,
}

impl LoopRegion {
    /// Leaf and byte offset of the opening `<`.
    pub fn opening(&self) -> (NodeId, usize) {
        (self.open_leaf, self.open.offset)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Expansion {
    /// Units inserted for each record, in record order.
    pub copies: Vec<Vec<NodeId>>,
    /// Tags resolved while filling the last copy.
    pub last_tags: TagMap,
}

/// Walks forward from `(start_leaf, offset)` through the rest of its paragraph and the
/// paragraph's following siblings until the next `<` and its matching `>`.
pub fn find_loop(
    tree: &XmlTree,
    start_leaf: NodeId,
    offset: usize,
    field: &str,
) -> TemplateResult<LoopRegion> {
    let block = tree
        .ancestor_of_kind(start_leaf, NodeKind::Block)
        .ok_or_else(|| TemplateError::structural(tree, start_leaf, NodeKind::Block))?;
    let container = tree
        .parent(block)
        .ok_or_else(|| TemplateError::structural(tree, block, NodeKind::Element))?;
    let start = tree.index_in_parent(block).unwrap_or(0);
    let siblings: Vec<NodeId> = tree.children(container)[start..].to_vec();

    let mut state = LoopState::Outside;
    let mut units: Vec<NodeId> = Vec::new();
    let mut open: Option<(SentinelPos, NodeId)> = None;
    let mut started = false;

    for unit in siblings {
        if tree.name(unit) == Some(W_SECT_PR) {
            break;
        }
        if open.is_some() {
            units.push(unit);
        }
        for (li, leaf) in tree.text_leaves(&[unit]).into_iter().enumerate() {
            if !started {
                if leaf != start_leaf {
                    continue;
                }
                started = true;
            }
            let text = tree.leaf_text(leaf);
            let from = if leaf == start_leaf { offset.min(text.len()) } else { 0 };
            for (pos, ch) in text[from..].char_indices() {
                let pos = pos + from;
                let next = state.next(ch).ok_or_else(|| {
                    TemplateError::malformed(tree, leaf, MalformedReason::StrayLoopClose)
                })?;
                if state == LoopState::Outside && ch == LOOP_OPEN {
                    units.push(unit);
                    let at = SentinelPos {
                        unit: 0,
                        leaf: li,
                        offset: pos,
                    };
                    open = Some((at, leaf));
                } else if next == LoopState::Outside && ch == LOOP_CLOSE {
                    let close = SentinelPos {
                        unit: units.len() - 1,
                        leaf: li,
                        offset: pos,
                    };
                    let (open, open_leaf) = open.ok_or_else(|| {
                        TemplateError::malformed(tree, leaf, MalformedReason::StrayLoopClose)
                    })?;
                    return Ok(LoopRegion {
                        container,
                        units,
                        open_leaf,
                        open,
                        close,
                    });
                }
                state = next;
            }
        }
    }

    match open {
        Some((_, leaf)) => Err(TemplateError::malformed(
            tree,
            leaf,
            MalformedReason::UnterminatedLoop,
        )),
        None => Err(TemplateError::malformed(
            tree,
            start_leaf,
            MalformedReason::MissingLoopBody {
                field: field.to_string(),
            },
        )),
    }
}

fn remove_char_at(tree: &mut XmlTree, leaf: NodeId, offset: usize) {
    let mut text = tree.leaf_text(leaf);
    if text.is_char_boundary(offset) && offset < text.len() {
        text.remove(offset);
        tree.set_leaf_text(leaf, &text);
    }
}

/// Deep-copies the scaffold and removes this loop's own sentinels from the copy.
fn stamp(tree: &mut XmlTree, region: &LoopRegion) -> Vec<NodeId> {
    let copies: Vec<NodeId> = region
        .units
        .iter()
        .map(|&u| tree.clone_subtree(u))
        .collect();
    let close_leaf = tree.text_leaves(&[copies[region.close.unit]])[region.close.leaf];
    let open_leaf = tree.text_leaves(&[copies[region.open.unit]])[region.open.leaf];
    // Close first: it never precedes the open sentinel, so the open offset stays valid.
    remove_char_at(tree, close_leaf, region.close.offset);
    remove_char_at(tree, open_leaf, region.open.offset);
    copies
}

/// Bracket tokens in the scaffold that sit outside every loop body, with their leaves. These
/// would be copied into each item and filled from the item record, not from the record that
/// owns them.
pub fn tokens_beside_body(tree: &XmlTree, region: &LoopRegion) -> Vec<(NodeId, String)> {
    let mut out = Vec::new();
    for (leaf, entry) in leaves_with_state(tree, &region.units) {
        let text = tree.leaf_text(leaf);
        let (segments, _) = loop_segments(&text, entry);
        for (range, outside) in segments {
            if outside {
                out.extend(tokens(&text[range]).map(|t| (leaf, t.name)));
            }
        }
    }
    out
}

/// Expands `region` once per record.
///
/// All copies are inserted before any is filled, so nested expansion inside one copy cannot
/// disturb the placement of the next. `fill` receives the units of one copy and its record and
/// returns the tags it resolved.
pub fn expand<F>(
    tree: &mut XmlTree,
    region: &LoopRegion,
    records: &[Record],
    mut fill: F,
) -> TemplateResult<Expansion>
where
    F: FnMut(&mut XmlTree, &[NodeId], &Record) -> TemplateResult<TagMap>,
{
    let last_unit = *region
        .units
        .last()
        .ok_or_else(|| TemplateError::structural(tree, region.container, NodeKind::Block))?;
    let mut insert_at = tree
        .index_in_parent(last_unit)
        .ok_or_else(|| TemplateError::structural(tree, last_unit, NodeKind::Element))?
        + 1;

    let mut expansion = Expansion::default();
    for _ in records {
        let copies = stamp(tree, region);
        for &c in &copies {
            tree.insert_child(region.container, insert_at, c);
            insert_at += 1;
        }
        expansion.copies.push(copies);
    }
    for &unit in &region.units {
        tree.detach(unit);
    }

    for (units, record) in expansion.copies.iter().zip(records) {
        expansion.last_tags = fill(tree, units, record)?;
    }
    Ok(expansion)
}

/// Removes the loops in `roots` that no list tag drives. `driven` holds the opening sentinel of
/// each loop that will be expanded. Every depth-0 `<` is collected before anything is removed,
/// so this must run before any value is written into `roots`.
pub fn drain_loops(
    tree: &mut XmlTree,
    roots: &[NodeId],
    driven: &[(NodeId, usize)],
) -> TemplateResult<usize> {
    let mut orphans: Vec<(NodeId, usize)> = Vec::new();
    for (leaf, entry) in leaves_with_state(tree, roots) {
        let mut state = entry;
        for (pos, ch) in tree.leaf_text(leaf).char_indices() {
            if state == LoopState::Outside && ch == LOOP_OPEN && !driven.contains(&(leaf, pos)) {
                orphans.push((leaf, pos));
            }
            state = state.next_lenient(ch);
        }
    }

    let mut drained = 0usize;
    for (leaf, pos) in orphans {
        // An earlier orphan may have shared this one's paragraph.
        if !tree.is_attached(leaf) {
            continue;
        }
        let region = find_loop(tree, leaf, pos, "")?;
        for &unit in &region.units {
            tree.detach(unit);
        }
        drained += 1;
    }
    Ok(drained)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::template::fixture::{body_of, doc, paragraph_texts};
    use crate::template::locate::Tag;
    use crate::template::substitute::apply_to_leaf;

    fn leaf(tree: &XmlTree, index: usize) -> NodeId {
        let b = body_of(tree);
        tree.text_leaves(&[b])[index]
    }

    /// The loop following byte `offset` of the `index`-th leaf.
    fn loop_after(tree: &XmlTree, index: usize, offset: usize) -> LoopRegion {
        find_loop(tree, leaf(tree, index), offset, "jobs").expect("find loop")
    }

    /// Substitutes title/company and reports a tag for every title it wrote.
    fn fill_fields(
        tree: &mut XmlTree,
        units: &[NodeId],
        record: &Record,
    ) -> TemplateResult<TagMap> {
        let known: BTreeSet<String> = ["title", "company"].iter().map(|s| s.to_string()).collect();
        let mut tags = TagMap::new();
        for leaf in tree.text_leaves(units) {
            for (name, _) in apply_to_leaf(tree, leaf, LoopState::Outside, record, &known) {
                tags.insert(
                    name.clone(),
                    Tag {
                        label: name.clone(),
                        name,
                        leaf,
                        omit: false,
                        offset: 0,
                        occurrences: 1,
                    },
                );
            }
        }
        Ok(tags)
    }

    fn jobs() -> Vec<Record> {
        vec![
            Record::new().with("title", "Engineer").with("company", "Acme"),
            Record::new().with("title", "Lead").with("company", "Beta"),
        ]
    }

    #[test]
    fn stamps_one_copy_per_record_in_order() {
        let mut tree = doc(&[&["Jobs"], &["<- [title] at [company]>"], &["After"]]);
        let region = loop_after(&tree, 0, 4);
        let exp = expand(&mut tree, &region, &jobs(), fill_fields).expect("expand");
        assert_eq!(exp.copies.len(), 2);
        assert_eq!(
            paragraph_texts(&tree),
            vec!["Jobs", "- Engineer at Acme", "- Lead at Beta", "After"]
        );
    }

    #[test]
    fn last_tags_come_from_the_last_copy() {
        let mut tree = doc(&[&["Jobs"], &["<[title]>"]]);
        let region = loop_after(&tree, 0, 4);
        let exp = expand(&mut tree, &region, &jobs(), fill_fields).expect("expand");
        let last_copy_leaf = tree.text_leaves(&exp.copies[1])[0];
        assert_eq!(exp.last_tags.len(), 1);
        assert_eq!(exp.last_tags["title"].leaf, last_copy_leaf);
        assert_eq!(tree.leaf_text(last_copy_leaf), "Lead");
    }

    #[test]
    fn multi_paragraph_body_is_captured_whole() {
        let mut tree = doc(&[
            &["Jobs"],
            &["<", "[title]"],
            &["at [company]"],
            &["-->"],
            &["After"],
        ]);
        let region = loop_after(&tree, 0, 4);
        let exp = expand(&mut tree, &region, &jobs(), fill_fields).expect("expand");
        assert_eq!(exp.copies.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3]);
        assert_eq!(
            paragraph_texts(&tree),
            vec!["Jobs", "Engineer", "at Acme", "--", "Lead", "at Beta", "--", "After"]
        );
    }

    #[test]
    fn zero_records_removes_the_scaffold() {
        let mut tree = doc(&[&["Jobs"], &["<[title]>"], &["After"]]);
        let region = loop_after(&tree, 0, 4);
        let exp = expand(&mut tree, &region, &[], fill_fields).expect("expand");
        assert!(exp.copies.is_empty());
        assert_eq!(paragraph_texts(&tree), vec!["Jobs", "After"]);
    }

    #[test]
    fn nested_pairs_are_copied_verbatim() {
        let mut tree = doc(&[&["Jobs"], &["<[title]"], &["<[name]>"], &[">"]]);
        let region = loop_after(&tree, 0, 4);
        expand(&mut tree, &region, &jobs()[..1], fill_fields).expect("expand");
        assert_eq!(paragraph_texts(&tree), vec!["Jobs", "Engineer", "<[name]>", ""]);
    }

    #[test]
    fn search_starts_after_the_tag() {
        let tree = doc(&[&["<x> jobs <[title]>"]]);
        let region = loop_after(&tree, 0, "<x> jobs".len());
        assert_eq!(region.open.offset, "<x> jobs ".len());
        assert_eq!(region.opening(), (leaf(&tree, 0), "<x> jobs ".len()));
    }

    #[test]
    fn unterminated_and_missing_loops_are_errors() {
        let tree = doc(&[&["Jobs"], &["<[title]"]]);
        let err = find_loop(&tree, leaf(&tree, 0), 4, "jobs").unwrap_err();
        assert_eq!(err.reason(), Some(&MalformedReason::UnterminatedLoop));

        let tree = doc(&[&["Jobs"], &["no loop here"]]);
        let err = find_loop(&tree, leaf(&tree, 0), 4, "jobs").unwrap_err();
        assert_eq!(
            err.reason(),
            Some(&MalformedReason::MissingLoopBody {
                field: "jobs".to_string()
            })
        );
    }

    #[test]
    fn tokens_beside_body_skip_the_loop_itself() {
        let tree = doc(&[&["Jobs"], &["[when]: <[title] <[x]>>"], &["[after]"]]);
        let region = loop_after(&tree, 0, 4);
        let beside: Vec<String> = tokens_beside_body(&tree, &region)
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(beside, vec!["when"]);

        let tree = doc(&[&["Jobs"], &["<[title]>"]]);
        let region = loop_after(&tree, 0, 4);
        assert!(tokens_beside_body(&tree, &region).is_empty());
    }

    #[test]
    fn drain_removes_only_undriven_loops() {
        let mut tree = doc(&[
            &["keep"],
            &["<gone"],
            &["also gone>"],
            &["<driven>"],
            &["kept too"],
        ]);
        let b = body_of(&tree);
        let roots = tree.children(b).to_vec();
        let driven = [(leaf(&tree, 3), 0)];
        assert_eq!(drain_loops(&mut tree, &roots, &driven).expect("drain"), 1);
        assert_eq!(paragraph_texts(&tree), vec!["keep", "<driven>", "kept too"]);
    }
}

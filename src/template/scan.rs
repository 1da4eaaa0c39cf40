use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::docx::tree::{NodeId, NodeKind, XmlTree, W_BODY, W_DOCUMENT};
use crate::template::error::{MalformedReason, TemplateError, TemplateResult};

pub const BRACKET_OPEN: char = '[';
pub const BRACKET_CLOSE: char = ']';
pub const LOOP_OPEN: char = '<';
pub const LOOP_CLOSE: char = '>';

pub static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(!?)([\w ]+)\]").expect("bracket token regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub range: Range<usize>,
    pub omit: bool,
    /// Name as written in the template.
    pub label: &'a str,
    /// Lower-cased lookup key.
    pub name: String,
}

pub fn tokens(text: &str) -> impl Iterator<Item = Token<'_>> {
    TOKEN_RE.captures_iter(text).filter_map(|caps| {
        let whole = caps.get(0)?;
        let label = caps.get(2)?.as_str();
        Some(Token {
            range: whole.range(),
            omit: caps.get(1).is_some_and(|m| !m.as_str().is_empty()),
            label,
            name: label.to_lowercase(),
        })
    })
}

/// Loop-sentinel state carried from leaf to leaf in document order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Outside,
    /// Inside a loop body; `nested` counts inner pairs opened and not yet closed.
    InLoop { nested: usize },
}

impl LoopState {
    /// `None` marks a `>` with nothing open.
    pub fn next(self, ch: char) -> Option<LoopState> {
        match (self, ch) {
            (LoopState::Outside, LOOP_OPEN) => Some(LoopState::InLoop { nested: 0 }),
            (LoopState::Outside, LOOP_CLOSE) => None,
            (LoopState::InLoop { nested }, LOOP_OPEN) => {
                Some(LoopState::InLoop { nested: nested + 1 })
            }
            (LoopState::InLoop { nested: 0 }, LOOP_CLOSE) => Some(LoopState::Outside),
            (LoopState::InLoop { nested }, LOOP_CLOSE) => {
                Some(LoopState::InLoop { nested: nested - 1 })
            }
            (state, _) => Some(state),
        }
    }

    /// Like [`LoopState::next`] but treats a stray `>` as literal text.
    pub fn next_lenient(self, ch: char) -> LoopState {
        self.next(ch).unwrap_or(LoopState::Outside)
    }
}

/// Splits `text` into pieces that lie outside any loop body (`true`) and pieces inside one,
/// sentinels included (`false`). Returns the state after the last character.
pub fn loop_segments(text: &str, entry: LoopState) -> (Vec<(Range<usize>, bool)>, LoopState) {
    let mut out: Vec<(Range<usize>, bool)> = Vec::new();
    let mut state = entry;
    let mut start = 0usize;
    let mut outside = state == LoopState::Outside;
    for (pos, ch) in text.char_indices() {
        let next = state.next_lenient(ch);
        // The opening sentinel belongs to the body; the closing one too.
        let ch_outside = state == LoopState::Outside && next == LoopState::Outside;
        if ch_outside != outside {
            if pos > start {
                out.push((start..pos, outside));
            }
            start = pos;
            outside = ch_outside;
        }
        state = next;
    }
    if text.len() > start {
        out.push((start..text.len(), outside));
    }
    (out, state)
}

/// Rewrites only the parts of `text` outside loop bodies.
pub fn map_outside(
    text: &str,
    entry: LoopState,
    mut f: impl FnMut(&str) -> String,
) -> (String, LoopState) {
    let (segments, exit) = loop_segments(text, entry);
    let mut out = String::with_capacity(text.len());
    for (range, outside) in segments {
        if outside {
            out.push_str(&f(&text[range]));
        } else {
            out.push_str(&text[range]);
        }
    }
    (out, exit)
}

/// Every text leaf under `roots` with the loop state in force where it starts.
pub fn leaves_with_state(tree: &XmlTree, roots: &[NodeId]) -> Vec<(NodeId, LoopState)> {
    let mut state = LoopState::Outside;
    let mut out = Vec::new();
    for leaf in tree.text_leaves(roots) {
        out.push((leaf, state));
        for ch in tree.leaf_text(leaf).chars() {
            state = state.next_lenient(ch);
        }
    }
    out
}

/// Sentinels must pair up across the whole scope.
pub fn check_sentinels(tree: &XmlTree, roots: &[NodeId]) -> TemplateResult<()> {
    let mut state = LoopState::Outside;
    let mut last_open: Option<NodeId> = None;
    for leaf in tree.text_leaves(roots) {
        for ch in tree.leaf_text(leaf).chars() {
            if ch == LOOP_OPEN && state == LoopState::Outside {
                last_open = Some(leaf);
            }
            state = state
                .next(ch)
                .ok_or_else(|| TemplateError::malformed(tree, leaf, MalformedReason::StrayLoopClose))?;
        }
    }
    match (state, last_open) {
        (LoopState::InLoop { .. }, Some(leaf)) => Err(TemplateError::malformed(
            tree,
            leaf,
            MalformedReason::UnterminatedLoop,
        )),
        _ => Ok(()),
    }
}

pub fn body(tree: &XmlTree) -> TemplateResult<NodeId> {
    let root = tree.root();
    let doc = tree
        .find_child(root, W_DOCUMENT)
        .ok_or_else(|| TemplateError::structural(tree, root, NodeKind::Element))?;
    tree.find_child(doc, W_BODY)
        .ok_or_else(|| TemplateError::structural(tree, doc, NodeKind::Body))
}

/// Checks the leaf/run/paragraph nesting and returns the leaf's paragraph.
pub fn leaf_block(tree: &XmlTree, leaf: NodeId) -> TemplateResult<NodeId> {
    if tree.kind(leaf) != NodeKind::Leaf {
        return Err(TemplateError::structural(tree, leaf, NodeKind::Leaf));
    }
    let parent = tree
        .parent(leaf)
        .ok_or_else(|| TemplateError::structural(tree, leaf, NodeKind::Run))?;
    if tree.kind(parent) != NodeKind::Run {
        return Err(TemplateError::structural(tree, parent, NodeKind::Run));
    }
    tree.ancestor_of_kind(parent, NodeKind::Block)
        .ok_or_else(|| TemplateError::structural(tree, parent, NodeKind::Block))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_parse_names_and_omit_flag() {
        let found: Vec<(String, bool, &str)> = tokens("a [Name] b [!Phone No] [x-y] [_id]")
            .map(|t| (t.name, t.omit, t.label))
            .collect();
        assert_eq!(
            found,
            vec![
                ("name".to_string(), false, "Name"),
                ("phone no".to_string(), true, "Phone No"),
                ("_id".to_string(), false, "_id"),
            ]
        );
    }

    #[test]
    fn segments_split_at_sentinels() {
        let text = "a [x] <[y] <[z]>> [w]";
        let (segs, exit) = loop_segments(text, LoopState::Outside);
        let pieces: Vec<(&str, bool)> = segs.iter().map(|(r, o)| (&text[r.clone()], *o)).collect();
        assert_eq!(
            pieces,
            vec![("a [x] ", true), ("<[y] <[z]>>", false), (" [w]", true)]
        );
        assert_eq!(exit, LoopState::Outside);
    }

    #[test]
    fn segments_resume_inside_a_loop() {
        let text = "[y]> tail";
        let (segs, exit) = loop_segments(text, LoopState::InLoop { nested: 0 });
        let pieces: Vec<(&str, bool)> = segs.iter().map(|(r, o)| (&text[r.clone()], *o)).collect();
        assert_eq!(pieces, vec![("[y]>", false), (" tail", true)]);
        assert_eq!(exit, LoopState::Outside);
    }

    #[test]
    fn map_outside_leaves_loop_bodies_alone() {
        let (out, exit) = map_outside("[a] <[a]", LoopState::Outside, |s| s.replace("[a]", "A"));
        assert_eq!(out, "A <[a]");
        assert_eq!(exit, LoopState::InLoop { nested: 0 });
    }

    #[test]
    fn sentinel_balance() {
        let xml = br#"<w:document><w:body><w:p><w:r><w:t>&lt;a</w:t></w:r></w:p><w:p><w:r><w:t>b&gt; &gt;</w:t></w:r></w:p></w:body></w:document>"#;
        let tree = XmlTree::parse(xml).expect("parse");
        let b = body(&tree).expect("body");
        let err = check_sentinels(&tree, &[b]).unwrap_err();
        assert_eq!(err.reason(), Some(&MalformedReason::StrayLoopClose));

        let xml = br#"<w:document><w:body><w:p><w:r><w:t>&lt;a &lt;b&gt;</w:t></w:r></w:p></w:body></w:document>"#;
        let tree = XmlTree::parse(xml).expect("parse");
        let b = body(&tree).expect("body");
        let err = check_sentinels(&tree, &[b]).unwrap_err();
        assert_eq!(err.reason(), Some(&MalformedReason::UnterminatedLoop));
    }

    #[test]
    fn leaf_outside_run_is_structural_error() {
        let xml = br#"<w:document><w:body><w:p><w:t>loose</w:t></w:p></w:body></w:document>"#;
        let tree = XmlTree::parse(xml).expect("parse");
        let b = body(&tree).expect("body");
        let leaf = tree.text_leaves(&[b])[0];
        match leaf_block(&tree, leaf) {
            Err(TemplateError::StructuralAssumptionViolation {
                location, expected, ..
            }) => {
                assert_eq!(location, "/w:document/w:body/w:p");
                assert_eq!(expected, NodeKind::Run);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}

use std::collections::{BTreeMap, BTreeSet};

use crate::docx::tree::{NodeId, XmlTree};
use crate::template::error::TemplateResult;
use crate::template::scan::{leaf_block, leaves_with_state, loop_segments, tokens};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub leaf: NodeId,
    /// Token was written `[!name]`.
    pub omit: bool,
    /// Name as written in the template; what remains in the leaf once brackets are stripped.
    pub label: String,
    /// Byte offset in the rewritten leaf text just past the label.
    pub offset: usize,
    /// How many tokens in the scope resolved to this name. Only the last one is kept.
    pub occurrences: usize,
}

pub type TagMap = BTreeMap<String, Tag>;

/// Finds `[name]` / `[!name]` tokens outside loop bodies whose name is in `field_names`,
/// strips their brackets in place and maps each name to the last leaf that carried it.
/// Tokens with other names stay as literal text.
pub fn locate(
    tree: &mut XmlTree,
    roots: &[NodeId],
    field_names: &BTreeSet<String>,
) -> TemplateResult<TagMap> {
    let mut tags = TagMap::new();
    if field_names.is_empty() {
        return Ok(tags);
    }

    for (leaf, entry) in leaves_with_state(tree, roots) {
        leaf_block(tree, leaf)?;
        let text = tree.leaf_text(leaf);
        let (segments, _) = loop_segments(&text, entry);

        let mut rewritten = String::with_capacity(text.len());
        let mut changed = false;
        for (range, outside) in segments {
            let seg = &text[range];
            if !outside {
                rewritten.push_str(seg);
                continue;
            }
            let mut last = 0usize;
            for tok in tokens(seg) {
                if !field_names.contains(&tok.name) {
                    continue;
                }
                rewritten.push_str(&seg[last..tok.range.start]);
                rewritten.push_str(tok.label);
                last = tok.range.end;
                changed = true;

                let occurrences = tags.get(&tok.name).map_or(0, |t| t.occurrences) + 1;
                tags.insert(
                    tok.name.clone(),
                    Tag {
                        name: tok.name,
                        leaf,
                        omit: tok.omit,
                        label: tok.label.to_string(),
                        offset: rewritten.len(),
                        occurrences,
                    },
                );
            }
            rewritten.push_str(&seg[last..]);
        }

        if changed {
            tree.set_leaf_text(leaf, &rewritten);
        }
    }
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::fixture::{body_of, doc, leaf_texts};

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strips_brackets_of_requested_names_only() {
        let mut tree = doc(&[&["[Experience]"], &["see [unknown] and [!Projects]"]]);
        let b = body_of(&tree);
        let tags = locate(&mut tree, &[b], &names(&["experience", "projects"])).expect("locate");

        assert_eq!(leaf_texts(&tree), vec!["Experience", "see [unknown] and Projects"]);
        let exp = &tags["experience"];
        assert_eq!(exp.label, "Experience");
        assert!(!exp.omit);
        assert_eq!(exp.offset, "Experience".len());
        let proj = &tags["projects"];
        assert!(proj.omit);
        assert_eq!(proj.offset, "see [unknown] and Projects".len());
        assert_eq!(tree.leaf_text(proj.leaf), "see [unknown] and Projects");
    }

    #[test]
    fn last_occurrence_wins() {
        let mut tree = doc(&[&["[jobs]"], &["again [JOBS]"]]);
        let b = body_of(&tree);
        let tags = locate(&mut tree, &[b], &names(&["jobs"])).expect("locate");
        let leaves = tree.text_leaves(&[b]);
        let jobs = &tags["jobs"];
        assert_eq!(jobs.leaf, leaves[1]);
        assert_eq!(jobs.label, "JOBS");
        assert_eq!(jobs.occurrences, 2);
    }

    #[test]
    fn tokens_inside_loop_bodies_are_skipped() {
        let mut tree = doc(&[&["[jobs] <[jobs] [title]>"]]);
        let b = body_of(&tree);
        let tags = locate(&mut tree, &[b], &names(&["jobs", "title"])).expect("locate");
        assert_eq!(leaf_texts(&tree), vec!["jobs <[jobs] [title]>"]);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags["jobs"].offset, 4);
    }

    #[test]
    fn empty_name_set_is_a_no_op() {
        let mut tree = doc(&[&["[name]"]]);
        let b = body_of(&tree);
        let tags = locate(&mut tree, &[b], &BTreeSet::new()).expect("locate");
        assert!(tags.is_empty());
        assert_eq!(leaf_texts(&tree), vec!["[name]"]);
    }
}

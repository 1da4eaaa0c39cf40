//! Rejoins bracket tokens that the word processor scattered over several runs.
//!
//! Word splits text into runs whenever formatting, spell-check state or revision ids change, so a
//! placeholder typed as `[name]` frequently arrives as `[`, `name`, `]` in three separate `w:t`
//! leaves. Every later stage assumes a token lives in exactly one leaf; this pass makes that true.
//! Leaves that only carried token characters are emptied, never removed, so surrounding run
//! formatting stays intact.

use crate::docx::tree::{NodeId, XmlTree};
use crate::template::error::{MalformedReason, TemplateError, TemplateResult};
use crate::template::scan::{leaf_block, BRACKET_CLOSE, BRACKET_OPEN};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BracketState {
    Outside,
    InBracket { origin: NodeId },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    /// Tokens that had to be pulled together from more than one leaf.
    pub merged_tokens: usize,
    /// Leaves whose text was moved (wholly or partly) into an earlier leaf.
    pub drained_leaves: usize,
}

pub fn normalize(tree: &mut XmlTree, roots: &[NodeId]) -> TemplateResult<NormalizeStats> {
    let mut stats = NormalizeStats::default();
    let mut state = BracketState::Outside;
    let mut current_block: Option<NodeId> = None;

    for leaf in tree.text_leaves(roots) {
        let block = leaf_block(tree, leaf)?;
        if current_block != Some(block) {
            if let BracketState::InBracket { origin } = state {
                return Err(TemplateError::malformed(
                    tree,
                    origin,
                    MalformedReason::UnterminatedBracket,
                ));
            }
            current_block = Some(block);
        }

        let carried_to = match state {
            BracketState::InBracket { origin } => Some(origin),
            BracketState::Outside => None,
        };
        let text = tree.leaf_text(leaf);
        let mut kept = String::with_capacity(text.len());
        let mut moved = String::new();
        for ch in text.chars() {
            state = match (state, ch) {
                (BracketState::Outside, BRACKET_OPEN) => {
                    kept.push(ch);
                    BracketState::InBracket { origin: leaf }
                }
                (BracketState::Outside, BRACKET_CLOSE) => {
                    return Err(TemplateError::malformed(
                        tree,
                        leaf,
                        MalformedReason::StrayBracketClose,
                    ));
                }
                (BracketState::Outside, _) => {
                    kept.push(ch);
                    BracketState::Outside
                }
                (BracketState::InBracket { .. }, BRACKET_OPEN) => {
                    return Err(TemplateError::malformed(
                        tree,
                        leaf,
                        MalformedReason::NestedBracket,
                    ));
                }
                (BracketState::InBracket { origin }, _) => {
                    if origin == leaf {
                        kept.push(ch);
                    } else {
                        moved.push(ch);
                    }
                    if ch == BRACKET_CLOSE {
                        if origin != leaf {
                            stats.merged_tokens += 1;
                        }
                        BracketState::Outside
                    } else {
                        state
                    }
                }
            };
        }

        if let Some(origin) = carried_to.filter(|_| !moved.is_empty()) {
            let mut joined = tree.leaf_text(origin);
            joined.push_str(&moved);
            tree.set_leaf_text(origin, &joined);
            stats.drained_leaves += 1;
        }
        if kept != text {
            tree.set_leaf_text(leaf, &kept);
        }
    }

    if let BracketState::InBracket { origin } = state {
        return Err(TemplateError::malformed(
            tree,
            origin,
            MalformedReason::UnterminatedBracket,
        ));
    }
    Ok(stats)
}

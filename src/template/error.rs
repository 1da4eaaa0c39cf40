use std::fmt;

use thiserror::Error;

use crate::docx::tree::{NodeId, NodeKind, XmlTree};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MalformedReason {
    UnterminatedBracket,
    StrayBracketClose,
    NestedBracket,
    UnterminatedLoop,
    StrayLoopClose,
    MissingLoopBody { field: String },
    OmitMarkerWithSentinel { field: String },
    /// A field token shares a paragraph with the sentinels of a loop it is not part of.
    FieldBesideLoop { field: String, list: String },
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::UnterminatedBracket => f.write_str("'[' is never closed"),
            MalformedReason::StrayBracketClose => f.write_str("']' without a matching '['"),
            MalformedReason::NestedBracket => f.write_str("'[' inside an open bracket"),
            MalformedReason::UnterminatedLoop => f.write_str("loop '<' is never closed by '>'"),
            MalformedReason::StrayLoopClose => f.write_str("loop '>' without a matching '<'"),
            MalformedReason::MissingLoopBody { field } => {
                write!(f, "list field [{field}] is not followed by a '<' loop body")
            }
            MalformedReason::OmitMarkerWithSentinel { field } => {
                write!(f, "omit marker [!{field}] shares a paragraph with a loop sentinel")
            }
            MalformedReason::FieldBesideLoop { field, list } => write!(
                f,
                "[{field}] shares a paragraph with the [{list}] loop but lies outside its body"
            ),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("malformed template at {location}: {reason}")]
    MalformedTemplate {
        location: String,
        reason: MalformedReason,
    },

    #[error("unexpected document structure at {location}: expected {expected}, found {found}")]
    StructuralAssumptionViolation {
        location: String,
        expected: NodeKind,
        found: String,
    },
}

impl TemplateError {
    pub fn malformed(tree: &XmlTree, at: NodeId, reason: MalformedReason) -> Self {
        TemplateError::MalformedTemplate {
            location: tree.path(at),
            reason,
        }
    }

    pub fn structural(tree: &XmlTree, at: NodeId, expected: NodeKind) -> Self {
        TemplateError::StructuralAssumptionViolation {
            location: tree.path(at),
            expected,
            found: tree
                .name(at)
                .map(|n| n.to_string())
                .unwrap_or_else(|| tree.kind(at).to_string()),
        }
    }

    pub fn reason(&self) -> Option<&MalformedReason> {
        match self {
            TemplateError::MalformedTemplate { reason, .. } => Some(reason),
            TemplateError::StructuralAssumptionViolation { .. } => None,
        }
    }
}

pub type TemplateResult<T> = Result<T, TemplateError>;

//! Placeholder resolution over a parsed `word/document.xml`.

pub mod error;
pub mod expand;
pub mod locate;
pub mod normalize;
pub mod render;
pub mod scan;
pub mod substitute;

#[cfg(test)]
pub(crate) mod fixture;

pub use error::{MalformedReason, TemplateError, TemplateResult};
pub use locate::{Tag, TagMap};
pub use render::{normalize_body, render, RenderReport};

use std::collections::{BTreeMap, BTreeSet};

use regex::Captures;

use crate::docx::tree::{NodeId, XmlTree};
use crate::record::{Record, Value};
use crate::template::scan::{map_outside, LoopState, TOKEN_RE};

/// Replaces each `[name]` (or `[!name]`) whose lower-cased name is in `known` with the record's
/// value, or with nothing when the record lacks it. List-valued fields are left for loop expansion;
/// names outside `known` stay literal.
pub fn apply(text: &str, record: &Record, known: &BTreeSet<String>) -> String {
    apply_counting(text, record, known, &mut BTreeMap::new())
}

/// [`apply`], tallying replacements per field name into `hits`.
pub fn apply_counting(
    text: &str,
    record: &Record,
    known: &BTreeSet<String>,
    hits: &mut BTreeMap<String, usize>,
) -> String {
    if !text.contains('[') {
        return text.to_string();
    }
    TOKEN_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            let name = caps.get(2).map_or(String::new(), |m| m.as_str().to_lowercase());
            if !known.contains(&name) {
                return whole.to_string();
            }
            let out = match record.get(&name) {
                Some(Value::Scalar(s)) => s.clone(),
                Some(Value::List(_)) => return whole.to_string(),
                None => String::new(),
            };
            *hits.entry(name).or_insert(0) += 1;
            out
        })
        .into_owned()
}

/// Applies the substitution to the parts of a leaf that lie outside loop bodies.
/// Returns the replacement count per field.
pub fn apply_to_leaf(
    tree: &mut XmlTree,
    leaf: NodeId,
    entry: LoopState,
    record: &Record,
    known: &BTreeSet<String>,
) -> BTreeMap<String, usize> {
    let mut hits = BTreeMap::new();
    let text = tree.leaf_text(leaf);
    let (out, _) = map_outside(&text, entry, |seg| {
        apply_counting(seg, record, known, &mut hits)
    });
    if out != text {
        tree.set_leaf_text(leaf, &out);
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::fixture::{body_of, doc, leaf_texts};

    fn known(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn replaces_known_names_case_insensitively() {
        let r = Record::new().with("title", "Engineer").with("company", "Acme");
        let out = apply("- [Title] at [COMPANY]", &r, &known(&["title", "company"]));
        assert_eq!(out, "- Engineer at Acme");
    }

    #[test]
    fn missing_field_renders_empty() {
        let r = Record::new().with("title", "Lead");
        let out = apply("[title] at [company].", &r, &known(&["title", "company"]));
        assert_eq!(out, "Lead at .");
    }

    #[test]
    fn unknown_names_and_partial_matches_are_untouched() {
        let r = Record::new().with("name", "Ada");
        let out = apply("[name] [names] [first name] [x-y]", &r, &known(&["name"]));
        assert_eq!(out, "Ada [names] [first name] [x-y]");
    }

    #[test]
    fn values_are_inserted_verbatim() {
        let r = Record::new().with("name", "$1 [name] <b>");
        let out = apply("Hi [name]!", &r, &known(&["name"]));
        assert_eq!(out, "Hi $1 [name] <b>!");
    }

    #[test]
    fn is_idempotent_once_tokens_are_gone() {
        let r = Record::new().with("name", "Ada");
        let once = apply("My name is [name].", &r, &known(&["name"]));
        assert_eq!(apply(&once, &r, &known(&["name"])), once);
    }

    #[test]
    fn omit_marker_renders_like_a_plain_tag_when_present() {
        let r = Record::new().with("phone", "555");
        assert_eq!(apply("Tel [!phone]", &r, &known(&["phone"])), "Tel 555");
    }

    #[test]
    fn list_fields_are_left_for_expansion() {
        let r = Record::new().with("jobs", vec![Record::new()]);
        assert_eq!(apply("[jobs]", &r, &known(&["jobs"])), "[jobs]");
    }

    #[test]
    fn leaf_substitution_skips_loop_bodies() {
        let mut tree = doc(&[&["[name] <[name]>"]]);
        let b = body_of(&tree);
        let leaf = tree.text_leaves(&[b])[0];
        let r = Record::new().with("name", "Ada");
        let hits = apply_to_leaf(&mut tree, leaf, LoopState::Outside, &r, &known(&["name"]));
        assert_eq!(leaf_texts(&tree), vec!["Ada <[name]>"]);
        assert_eq!(hits.get("name"), Some(&1));
    }
}

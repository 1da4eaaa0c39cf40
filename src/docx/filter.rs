use serde::Deserialize;

use crate::docx::tree::{NodeId, XmlTree};

/// Editor noise removed from the document body before placeholders are scanned.
#[derive(Clone, Debug, Deserialize)]
pub struct FilterRules {
    /// Element names (`*` wildcards allowed) dropped together with their subtree.
    #[serde(default = "default_drop_elements")]
    pub drop_elements: Vec<String>,

    /// Attribute names (`*` wildcards allowed) stripped from every element.
    #[serde(default)]
    pub strip_attributes: Vec<String>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            drop_elements: default_drop_elements(),
            strip_attributes: Vec::new(),
        }
    }
}

fn default_drop_elements() -> Vec<String> {
    vec!["w:proofErr".to_string()]
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub dropped_elements: usize,
    pub stripped_attributes: usize,
}

pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == text;
    }
    let segs: Vec<&str> = pattern.split('*').collect();
    let mut rest = text;
    for (i, seg) in segs.iter().enumerate() {
        if seg.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(seg) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segs.len() - 1 {
            return rest.ends_with(seg);
        } else {
            match rest.find(seg) {
                Some(pos) => rest = &rest[pos + seg.len()..],
                None => return false,
            }
        }
    }
    true
}

pub fn filter_tree(tree: &mut XmlTree, scope: NodeId, rules: &FilterRules) -> FilterStats {
    let mut stats = FilterStats::default();
    if rules.drop_elements.is_empty() && rules.strip_attributes.is_empty() {
        return stats;
    }

    let mut doomed: Vec<NodeId> = Vec::new();
    for id in tree.descendants(scope) {
        let Some(name) = tree.name(id) else {
            continue;
        };
        if id != scope && rules.drop_elements.iter().any(|p| wildcard_match(p, name)) {
            doomed.push(id);
        }
    }
    for id in doomed {
        // An ancestor may already have been dropped.
        if tree.is_attached(id) {
            tree.detach(id);
            stats.dropped_elements += 1;
        }
    }

    if !rules.strip_attributes.is_empty() {
        for id in tree.descendants(scope) {
            tree.retain_attrs(id, |k| {
                let strip = rules.strip_attributes.iter().any(|p| wildcard_match(p, k));
                if strip {
                    stats.stripped_attributes += 1;
                }
                !strip
            });
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_patterns() {
        assert!(wildcard_match("*", "w:anything"));
        assert!(wildcard_match("w:rsid*", "w:rsidR"));
        assert!(wildcard_match("*Err", "w:proofErr"));
        assert!(wildcard_match("w:*Start", "w:bookmarkStart"));
        assert!(!wildcard_match("w:rsid*", "w:rPr"));
        assert!(!wildcard_match("w:proofErr", "w:proofErrX"));
    }

    #[test]
    fn drops_noise_and_strips_attributes() {
        let xml = br#"<w:body><w:p w:rsidR="00A1"><w:proofErr w:type="spellStart"/><w:r w:rsidRPr="1"><w:t>[na</w:t></w:r><w:proofErr w:type="spellEnd"/><w:r><w:t>me]</w:t></w:r></w:p></w:body>"#;
        let mut tree = XmlTree::parse(xml).expect("parse");
        let body = tree.children(tree.root())[0];
        let rules = FilterRules {
            drop_elements: vec!["w:proofErr".to_string()],
            strip_attributes: vec!["w:rsid*".to_string()],
        };
        let stats = filter_tree(&mut tree, body, &rules);
        assert_eq!(stats.dropped_elements, 2);
        assert_eq!(stats.stripped_attributes, 2);
        let out = String::from_utf8(tree.write()).expect("utf8");
        assert_eq!(
            out,
            "<w:body><w:p><w:r><w:t>[na</w:t></w:r><w:r><w:t>me]</w:t></w:r></w:p></w:body>"
        );
    }
}

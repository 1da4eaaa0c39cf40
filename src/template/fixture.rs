//! Small WordprocessingML documents for unit tests.

use crate::docx::tree::{NodeId, NodeKind, XmlTree};
use crate::template::scan::body;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// One `w:p` per slice, one bold `w:r`/`w:t` per string.
pub fn doc(paragraphs: &[&[&str]]) -> XmlTree {
    let mut xml = String::new();
    for runs in paragraphs {
        xml.push_str("<w:p>");
        for t in *runs {
            xml.push_str(&format!(
                r#"<w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">{}</w:t></w:r>"#,
                escape(t)
            ));
        }
        xml.push_str("</w:p>");
    }
    doc_with_body(&xml)
}

/// Wraps raw body markup (tables and the like) in a document.
pub fn doc_with_body(body_xml: &str) -> XmlTree {
    let xml = format!(
        r#"<w:document xmlns:w="urn:w"><w:body>{body_xml}<w:sectPr/></w:body></w:document>"#
    );
    XmlTree::parse(xml.as_bytes()).expect("parse fixture")
}

pub fn body_of(tree: &XmlTree) -> NodeId {
    body(tree).expect("fixture body")
}

pub fn leaf_texts(tree: &XmlTree) -> Vec<String> {
    let b = body_of(tree);
    tree.text_leaves(&[b])
        .into_iter()
        .map(|l| tree.leaf_text(l))
        .collect()
}

/// Concatenated text of each body paragraph, in order.
pub fn paragraph_texts(tree: &XmlTree) -> Vec<String> {
    let b = body_of(tree);
    tree.descendants(b)
        .into_iter()
        .filter(|&id| tree.kind(id) == NodeKind::Block)
        .map(|p| {
            tree.text_leaves(&[p])
                .into_iter()
                .map(|l| tree.leaf_text(l))
                .collect::<String>()
        })
        .collect()
}

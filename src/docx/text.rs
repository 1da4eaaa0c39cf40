use crate::docx::tree::{NodeId, NodeKind, XmlTree};

fn control_append(buf: &mut String, tree: &XmlTree, id: NodeId) {
    match tree.name(id) {
        Some("w:tab") | Some("w:ptab") => buf.push('\t'),
        Some("w:cr") => buf.push('\n'),
        Some("w:br") => {
            if tree.attr(id, "w:type").unwrap_or("textWrapping") == "textWrapping" {
                buf.push('\n');
            }
        }
        Some("w:noBreakHyphen") => buf.push('-'),
        _ => {}
    }
}

/// Plain-text rendition of a body: one line per paragraph, tables flattened in reading order.
pub fn body_text(tree: &XmlTree, body: NodeId) -> String {
    let mut lines: Vec<String> = Vec::new();
    for id in tree.descendants(body) {
        if tree.kind(id) != NodeKind::Block {
            continue;
        }
        let mut line = String::new();
        for inner in tree.descendants(id).into_iter().skip(1) {
            match tree.kind(inner) {
                NodeKind::Leaf => line.push_str(&tree.leaf_text(inner)),
                // Nested paragraphs (text boxes) get their own line.
                NodeKind::Block => break,
                _ => control_append(&mut line, tree, inner),
            }
        }
        lines.push(line);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::body_text;
    use crate::docx::tree::XmlTree;

    #[test]
    fn paragraphs_become_lines() {
        let xml = br#"<w:body><w:p><w:r><w:t>Name</w:t><w:tab/><w:t>Ada</w:t></w:r></w:p><w:tbl><w:tr><w:tc><w:p><w:r><w:t>cell</w:t><w:br/><w:t>two</w:t></w:r></w:p></w:tc></w:tr></w:tbl><w:p/></w:body>"#;
        let tree = XmlTree::parse(xml).expect("parse");
        let body = tree.children(tree.root())[0];
        assert_eq!(body_text(&tree, body), "Name\tAda\ncell\ntwo\n\n");
    }
}

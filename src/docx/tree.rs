use std::fmt::{self, Write as _};

use anyhow::{anyhow, Context};
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;

pub const W_DOCUMENT: &str = "w:document";
pub const W_BODY: &str = "w:body";
pub const W_P: &str = "w:p";
pub const W_R: &str = "w:r";
pub const W_T: &str = "w:t";
pub const W_SECT_PR: &str = "w:sectPr";

/// Stable handle into an [`XmlTree`] arena. Detached nodes keep their id; they are simply no
/// longer reachable from the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Body,
    /// Block-level container (`w:p`).
    Block,
    /// Formatting span (`w:r`).
    Run,
    /// Text-bearing leaf (`w:t`).
    Leaf,
    Element,
    Content,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Root => "document root",
            NodeKind::Body => "body (w:body)",
            NodeKind::Block => "paragraph (w:p)",
            NodeKind::Run => "run (w:r)",
            NodeKind::Leaf => "text leaf (w:t)",
            NodeKind::Element => "element",
            NodeKind::Content => "character data",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
enum NodeData {
    Root,
    Element {
        name: String,
        /// Values stay escaped exactly as read, so `&#xD;&#xA;` and friends survive untouched.
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    /// Unescaped character data.
    Text(String),
    CData(String),
    /// Declaration, comment, processing instruction or doctype, already serialized.
    Markup(String),
}

#[derive(Clone, Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// One XML part held as an arena of nodes.
///
/// Text is kept unescaped so the template passes can edit it as plain strings; everything the
/// passes never look at (attributes, comments, the declaration) is written back byte for byte.
#[derive(Clone, Debug)]
pub struct XmlTree {
    nodes: Vec<Node>,
}

impl XmlTree {
    pub fn parse(xml_bytes: &[u8]) -> anyhow::Result<Self> {
        let mut reader = Reader::from_reader(xml_bytes);
        reader.config_mut().trim_text(false);

        let mut tree = XmlTree {
            nodes: vec![Node {
                data: NodeData::Root,
                parent: None,
                children: Vec::new(),
            }],
        };
        let mut open: Vec<NodeId> = vec![tree.root()];
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let event = reader.read_event_into(&mut buf).context("read xml event")?;
            let parent = *open.last().context("element stack underflow")?;
            let data = match event {
                Event::Eof => break,
                Event::Start(start) => {
                    let id = tree.add_node(Some(parent), element(&start, false)?);
                    open.push(id);
                    continue;
                }
                Event::Empty(start) => element(&start, true)?,
                Event::End(end) => {
                    let name = lossy(end.name().as_ref());
                    if tree.name(parent) != Some(name.as_str()) {
                        return Err(anyhow!(
                            "mismatched closing tag </{}> at {}",
                            name,
                            tree.path(parent)
                        ));
                    }
                    open.pop();
                    continue;
                }
                Event::Text(text) => {
                    NodeData::Text(text.unescape().context("unescape text")?.into_owned())
                }
                Event::CData(cdata) => NodeData::CData(lossy(cdata.into_inner())),
                Event::Decl(decl) => NodeData::Markup(declaration(&decl)?),
                Event::Comment(text) => {
                    NodeData::Markup(format!("<!--{}-->", lossy(text.into_inner())))
                }
                Event::PI(pi) => NodeData::Markup(format!(
                    "<?{}{}?>",
                    lossy(pi.target()),
                    lossy(pi.content())
                )),
                Event::DocType(text) => {
                    NodeData::Markup(format!("<!DOCTYPE{}>", lossy(text.into_inner())))
                }
            };
            tree.add_node(Some(parent), data);
        }
        if open.len() != 1 {
            let unclosed = open.last().map(|id| tree.path(*id)).unwrap_or_default();
            return Err(anyhow!("unterminated element at {unclosed}"));
        }
        Ok(tree)
    }

    /// Serializes the attached nodes. Detached subtrees are simply not reached.
    pub fn write(&self) -> Vec<u8> {
        let mut out = String::new();
        for &child in self.children(self.root()) {
            self.write_node(child, &mut out);
        }
        out.into_bytes()
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id.0];
        match &node.data {
            NodeData::Root => {}
            NodeData::Element {
                name,
                attrs,
                self_closing,
            } => {
                out.push('<');
                out.push_str(name);
                for (key, value) in attrs {
                    let _ = write!(out, " {key}=\"{value}\"");
                }
                if *self_closing && node.children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for &child in &node.children {
                    self.write_node(child, out);
                }
                let _ = write!(out, "</{name}>");
            }
            NodeData::Text(text) => out.push_str(&partial_escape(text)),
            NodeData::CData(text) => {
                let _ = write!(out, "<![CDATA[{text}]]>");
            }
            NodeData::Markup(raw) => out.push_str(raw),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn add_node(&mut self, parent: Option<NodeId>, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        id
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            for (k, v) in attrs.iter_mut() {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
            attrs.push((key.to_string(), value.to_string()));
        }
    }

    pub fn retain_attrs(&mut self, id: NodeId, mut keep: impl FnMut(&str) -> bool) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            attrs.retain(|(k, _)| keep(k));
        }
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        match &self.nodes[id.0].data {
            NodeData::Root => NodeKind::Root,
            NodeData::Element { name, .. } => match name.as_str() {
                W_BODY => NodeKind::Body,
                W_P => NodeKind::Block,
                W_R => NodeKind::Run,
                W_T => NodeKind::Leaf,
                _ => NodeKind::Element,
            },
            NodeData::Text(_) | NodeData::CData(_) | NodeData::Markup(_) => NodeKind::Content,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn find_child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&c| self.name(c) == Some(name))
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// True when the node is still reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = id;
        loop {
            if cur == self.root() {
                return true;
            }
            match self.parent(cur) {
                Some(p) => cur = p,
                None => return false,
            }
        }
    }

    /// Nearest strict ancestor of the given kind.
    pub fn ancestor_of_kind(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        let mut cur = self.parent(id)?;
        loop {
            if self.kind(cur) == kind {
                return Some(cur);
            }
            cur = self.parent(cur)?;
        }
    }

    /// Pre-order walk of the subtree rooted at `id`, including `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            for &child in self.children(cur).iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Every `w:t` under `roots`, in document order.
    pub fn text_leaves(&self, roots: &[NodeId]) -> Vec<NodeId> {
        roots
            .iter()
            .flat_map(|&r| self.descendants(r))
            .filter(|&id| self.kind(id) == NodeKind::Leaf)
            .collect()
    }

    pub fn leaf_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            match &self.nodes[child.0].data {
                NodeData::Text(t) | NodeData::CData(t) => out.push_str(t),
                _ => {}
            }
        }
        out
    }

    pub fn set_leaf_text(&mut self, id: NodeId, text: &str) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
        if let NodeData::Element { self_closing, .. } = &mut self.nodes[id.0].data {
            *self_closing = false;
        }
        if !text.is_empty() {
            self.add_node(Some(id), NodeData::Text(text.to_string()));
        }
        if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
            self.set_attr(id, "xml:space", "preserve");
        }
    }

    /// Deep copy of the subtree with fresh ids. The copy is detached.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let data = self.nodes[id.0].data.clone();
        let copy = self.add_node(None, data);
        let children = self.nodes[id.0].children.clone();
        for child in children {
            let child_copy = self.clone_subtree(child);
            self.nodes[child_copy.0].parent = Some(copy);
            self.nodes[copy.0].children.push(child_copy);
        }
        copy
    }

    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    /// Slash path such as `/w:document/w:body/w:p[2]/w:r[1]/w:t[1]`, for diagnostics.
    pub fn path(&self, id: NodeId) -> String {
        let mut segs: Vec<String> = Vec::new();
        let mut cur = id;
        while let Some(parent) = self.parent(cur) {
            let seg = match self.name(cur) {
                Some(name) => {
                    let same: Vec<NodeId> = self
                        .children(parent)
                        .iter()
                        .copied()
                        .filter(|&c| self.name(c) == Some(name))
                        .collect();
                    if same.len() > 1 {
                        let pos = same.iter().position(|&c| c == cur).unwrap_or(0) + 1;
                        format!("{name}[{pos}]")
                    } else {
                        name.to_string()
                    }
                }
                None => "text()".to_string(),
            };
            segs.push(seg);
            cur = parent;
        }
        if cur != self.root() {
            segs.push("(detached)".to_string());
        }
        segs.reverse();
        format!("/{}", segs.join("/"))
    }
}

fn element(start: &BytesStart<'_>, self_closing: bool) -> anyhow::Result<NodeData> {
    let attrs = start
        .attributes()
        .map(|attr| {
            let attr = attr.context("malformed attribute")?;
            Ok((lossy(attr.key.as_ref()), lossy(attr.value.as_ref())))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(NodeData::Element {
        name: lossy(start.name().as_ref()),
        attrs,
        self_closing,
    })
}

fn declaration(decl: &BytesDecl<'_>) -> anyhow::Result<String> {
    let version = decl.version().context("xml declaration without version")?;
    let mut out = format!("<?xml version=\"{}\"", lossy(version));
    if let Some(encoding) = decl.encoding() {
        let encoding = encoding.context("xml declaration encoding")?;
        let _ = write!(out, " encoding=\"{}\"", lossy(encoding));
    }
    if let Some(standalone) = decl.standalone() {
        let standalone = standalone.context("xml declaration standalone")?;
        let _ = write!(out, " standalone=\"{}\"", lossy(standalone));
    }
    out.push_str("?>");
    Ok(out)
}

fn lossy(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

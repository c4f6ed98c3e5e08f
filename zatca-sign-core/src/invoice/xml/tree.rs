//! Arena-backed XML tree.
//!
//! Every node lives in one `Vec` owned by its [`Document`] and is addressed by a
//! [`NodeId`]. Detached nodes stay in the arena but are no longer reachable from
//! the document node, so ids handed out earlier never dangle.
use std::borrow::Cow;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::XmlError;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Kind reported for ids that do not belong to the document.
static MISSING: NodeKind = NodeKind::Document;

/// Index of a node inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attribute {
    pub(crate) name: String,
    pub(crate) value: String,
}

impl Attribute {
    pub(crate) fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Prefix bound by this attribute when it is a namespace declaration.
    /// `Some("")` stands for the default namespace.
    pub(crate) fn declared_prefix(&self) -> Option<&str> {
        if self.name == "xmlns" {
            Some("")
        } else {
            self.name.strip_prefix("xmlns:")
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Document,
    Element {
        name: String,
        attributes: Vec<Attribute>,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Parsed XML document.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document holding only the document node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// The document node; parent of the root element.
    pub fn document_node(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.document_node())
            .iter()
            .copied()
            .find(|id| self.is_element(*id))
    }

    /// Whether `id` was handed out by this document.
    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub(crate) fn kind(&self, id: NodeId) -> &NodeKind {
        self.nodes.get(id.0).map_or(&MISSING, |node| &node.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id.0).map_or(&[], |node| node.children.as_slice())
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Element { .. })
    }

    /// Qualified name of an element, `None` for other node kinds.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub(crate) fn attributes(&self, id: NodeId) -> &[Attribute] {
        match self.kind(id) {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { .. } | NodeKind::Document => {
                for child in self.children(id) {
                    self.collect_text(*child, out);
                }
            }
            _ => {}
        }
    }

    /// Number of element ancestors.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if self.is_element(parent) {
                depth += 1;
            }
            current = self.parent(parent);
        }
        depth
    }

    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|sibling| *sibling == id)?;
        siblings[position + 1..]
            .iter()
            .copied()
            .find(|sibling| self.is_element(*sibling))
    }

    /// Descendants of `id` in document order, `id` excluded.
    pub(crate) fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    /// Namespace URI bound to `prefix` (`""` for the default namespace) in scope at `id`.
    pub fn lookup_namespace(&self, id: NodeId, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NS);
        }
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(attr) = self
                .attributes(node)
                .iter()
                .find(|attr| attr.declared_prefix() == Some(prefix))
            {
                return (!attr.value.is_empty()).then_some(attr.value.as_str());
            }
            current = self.parent(node);
        }
        None
    }

    /// Namespace URI of an element's own name.
    pub fn namespace_uri(&self, id: NodeId) -> Option<&str> {
        let name = self.name(id)?;
        let (prefix, _) = split_qname(name);
        self.lookup_namespace(id, prefix.unwrap_or(""))
    }

    /// Namespace URI of an attribute on `id`; unprefixed attributes have none.
    pub(crate) fn attribute_namespace(&self, id: NodeId, attr: &Attribute) -> Option<&str> {
        let (prefix, _) = split_qname(&attr.name);
        prefix.and_then(|prefix| self.lookup_namespace(id, prefix))
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Inserts a new node under `parent`, before `before` or at the end.
    pub(crate) fn insert(
        &mut self,
        parent: NodeId,
        before: Option<NodeId>,
        kind: NodeKind,
    ) -> Result<NodeId, XmlError> {
        let position = match before {
            Some(sibling) => self
                .children(parent)
                .iter()
                .position(|child| *child == sibling)
                .ok_or(XmlError::InvalidInsertion)?,
            None => self.children(parent).len(),
        };
        let id = self.push_node(kind);
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(position, id);
        Ok(id)
    }

    pub(crate) fn append_text(&mut self, parent: NodeId, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.children(parent).last().copied() {
            if let NodeKind::Text(existing) = &mut self.nodes[last.0].kind {
                existing.push_str(text);
                return;
            }
        }
        let id = self.push_node(NodeKind::Text(text.to_string()));
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.push(id);
    }

    /// Replaces all children of `id` with a single text node.
    pub(crate) fn set_text(&mut self, id: NodeId, text: &str) {
        for child in std::mem::take(&mut self.nodes[id.0].children) {
            self.nodes[child.0].parent = None;
        }
        self.append_text(id, text);
    }

    pub(crate) fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get_mut(id.0).and_then(|node| node.parent.take()) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(parent.0) {
            node.children.retain(|child| *child != id);
        }
    }

    /// Deep-copies `node` of `source` under `parent`; returns the copy's id.
    pub(crate) fn import(
        &mut self,
        parent: NodeId,
        before: Option<NodeId>,
        source: &Document,
        node: NodeId,
    ) -> Result<NodeId, XmlError> {
        let copy = self.insert(parent, before, source.kind(node).clone())?;
        for child in source.children(node) {
            self.import(copy, None, source, *child)?;
        }
        Ok(copy)
    }

    pub(crate) fn retain_attributes(&mut self, id: NodeId, keep: impl Fn(&Attribute) -> bool) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[id.0].kind {
            attributes.retain(|attr| keep(attr));
        }
    }

    /// Drops whitespace-only text children of an element holding element content.
    fn drop_ignorable_whitespace(&mut self, id: NodeId) {
        let has_elements = self.children(id).iter().any(|child| self.is_element(*child));
        if !has_elements {
            return;
        }
        let children = std::mem::take(&mut self.nodes[id.0].children);
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            match &self.nodes[child.0].kind {
                NodeKind::Text(text) if text.trim().is_empty() => {
                    self.nodes[child.0].parent = None;
                }
                _ => kept.push(child),
            }
        }
        self.nodes[id.0].children = kept;
    }

    /// Parses XML text into a document.
    ///
    /// Line endings are normalized, references resolved and ignorable whitespace
    /// between elements dropped, so the writer alone decides layout.
    pub fn parse(input: &str) -> Result<Self, XmlError> {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        let normalized = normalize_newlines(input);
        let mut reader = Reader::from_str(&normalized);
        let mut doc = Document::new();
        let mut open: Vec<NodeId> = vec![doc.document_node()];

        loop {
            let event = reader.read_event().map_err(|e| XmlError::Parse {
                message: format!("{e} (at byte {})", reader.buffer_position()),
            })?;
            match event {
                Event::Start(start) => {
                    let id = doc.open_element(&open, &start)?;
                    open.push(id);
                }
                Event::Empty(start) => {
                    doc.open_element(&open, &start)?;
                }
                Event::End(end) => {
                    if open.len() < 2 {
                        return Err(XmlError::Parse {
                            message: format!(
                                "unexpected closing tag </{}>",
                                String::from_utf8_lossy(end.name().as_ref())
                            ),
                        });
                    }
                    if let Some(id) = open.pop() {
                        doc.drop_ignorable_whitespace(id);
                    }
                }
                Event::Text(text) => {
                    let value = text.unescape().map_err(|e| XmlError::Parse {
                        message: e.to_string(),
                    })?;
                    doc.text_event(&open, &value)?;
                }
                Event::CData(data) => {
                    let raw = data.into_inner();
                    let value = utf8(&raw)?;
                    doc.text_event(&open, value)?;
                }
                Event::Comment(comment) => {
                    let value = utf8(&comment)?.to_string();
                    doc.insert(current(&open), None, NodeKind::Comment(value))?;
                }
                Event::PI(pi) => {
                    let target = utf8(pi.target())?.to_string();
                    let data = utf8(pi.content())?.trim_start().to_string();
                    doc.insert(
                        current(&open),
                        None,
                        NodeKind::ProcessingInstruction { target, data },
                    )?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if open.len() > 1 {
            let name = doc.name(current(&open)).unwrap_or_default().to_string();
            return Err(XmlError::Parse {
                message: format!("unclosed element <{name}>"),
            });
        }
        if doc.root_element().is_none() {
            return Err(XmlError::Parse {
                message: "document has no root element".into(),
            });
        }
        Ok(doc)
    }

    fn open_element(&mut self, open: &[NodeId], start: &BytesStart<'_>) -> Result<NodeId, XmlError> {
        let parent = current(open);
        if parent == self.document_node() && self.root_element().is_some() {
            return Err(XmlError::Parse {
                message: "more than one root element".into(),
            });
        }
        let name = utf8(start.name().as_ref())?.to_string();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| XmlError::Parse {
                message: e.to_string(),
            })?;
            let key = utf8(attr.key.as_ref())?.to_string();
            let raw = utf8(&attr.value)?;
            attributes.push(Attribute::new(key, normalize_attribute_value(raw)?));
        }
        self.insert(parent, None, NodeKind::Element { name, attributes })
    }

    fn text_event(&mut self, open: &[NodeId], text: &str) -> Result<(), XmlError> {
        let parent = current(open);
        if parent == self.document_node() {
            if text.trim().is_empty() {
                return Ok(());
            }
            return Err(XmlError::Parse {
                message: "text outside the root element".into(),
            });
        }
        self.append_text(parent, text);
        Ok(())
    }
}

fn current(open: &[NodeId]) -> NodeId {
    open.last().copied().unwrap_or(NodeId(0))
}

fn utf8(bytes: &[u8]) -> Result<&str, XmlError> {
    std::str::from_utf8(bytes).map_err(|e| XmlError::Parse {
        message: format!("invalid UTF-8: {e}"),
    })
}

fn normalize_newlines(input: &str) -> Cow<'_, str> {
    if input.contains('\r') {
        Cow::Owned(input.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(input)
    }
}

/// Attribute-value normalization: literal whitespace becomes a space before
/// references are expanded, so `&#10;` still yields a newline.
fn normalize_attribute_value(raw: &str) -> Result<String, XmlError> {
    let spaced = raw.replace(['\t', '\n'], " ");
    unescape(&spaced)
        .map(|value| value.into_owned())
        .map_err(|e| XmlError::Parse {
            message: e.to_string(),
        })
}

/// Splits `prefix:local` into its parts.
pub(crate) fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

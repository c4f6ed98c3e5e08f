//! Serialization and canonicalization.
//!
//! Both go through one writer so that the whitespace a canonical rendering hashes is
//! exactly the whitespace the serializer later emits. Whole documents are rendered
//! as inclusive C14N 1.1 without comments. An excluded subtree is dropped together
//! with the indentation in front of it, so a document hashes the same whether its
//! signature artifacts are attached, reserved as empty slots or absent.
//! Standalone subtrees are rendered as exclusive C14N: each element declares the
//! prefixes it uses that no rendered ancestor already binds.
use std::collections::BTreeMap;

use super::tree::{split_qname, Attribute, Document, NodeId, NodeKind};
use super::XmlFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Plain,
    Inclusive,
    Exclusive,
}

/// Prefix to URI bindings already rendered by output ancestors.
type Scope = BTreeMap<String, String>;

struct Writer<'a> {
    doc: &'a Document,
    format: XmlFormat,
    mode: Mode,
    excluded: &'a [NodeId],
    out: String,
}

pub(crate) fn serialize(doc: &Document, format: XmlFormat, declaration: bool) -> String {
    let mut writer = Writer::new(doc, format, Mode::Plain, &[]);
    if declaration {
        writer.out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    }
    for child in doc.children(doc.document_node()) {
        writer.node(*child, 0, true, &Scope::new());
        writer.out.push('\n');
    }
    writer.out
}

pub(crate) fn canonicalize(doc: &Document, format: XmlFormat, excluded: &[NodeId]) -> String {
    let mut writer = Writer::new(doc, format, Mode::Inclusive, excluded);
    let mut seen_root = false;
    for child in doc.children(doc.document_node()) {
        match doc.kind(*child) {
            NodeKind::Element { .. } => {
                writer.node(*child, 0, true, &Scope::new());
                seen_root = true;
            }
            NodeKind::ProcessingInstruction { .. } => {
                if seen_root {
                    writer.out.push('\n');
                }
                writer.node(*child, 0, true, &Scope::new());
                if !seen_root {
                    writer.out.push('\n');
                }
            }
            _ => {}
        }
    }
    writer.out
}

/// Exclusive canonical form of one element taken on its own. `depth` positions the
/// element for indentation purposes.
pub(crate) fn canonicalize_subtree(
    doc: &Document,
    node: NodeId,
    format: XmlFormat,
    depth: usize,
) -> String {
    let mut writer = Writer::new(doc, format, Mode::Exclusive, &[]);
    writer.node(node, depth, true, &Scope::new());
    writer.out
}

impl<'a> Writer<'a> {
    fn new(doc: &'a Document, format: XmlFormat, mode: Mode, excluded: &'a [NodeId]) -> Self {
        Self {
            doc,
            format,
            mode,
            excluded,
            out: String::new(),
        }
    }

    fn node(&mut self, id: NodeId, depth: usize, pretty: bool, scope: &Scope) {
        let doc = self.doc;
        match doc.kind(id) {
            NodeKind::Element { name, attributes } => {
                self.element(id, name, attributes, depth, pretty, scope)
            }
            NodeKind::Text(text) => escape_text(&mut self.out, text),
            NodeKind::Comment(text) => {
                if self.mode == Mode::Plain {
                    self.out.push_str("<!--");
                    self.out.push_str(text);
                    self.out.push_str("-->");
                }
            }
            NodeKind::ProcessingInstruction { target, data } => {
                self.out.push_str("<?");
                self.out.push_str(target);
                if !data.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(data);
                }
                self.out.push_str("?>");
            }
            NodeKind::Document => {}
        }
    }

    fn element(
        &mut self,
        id: NodeId,
        name: &str,
        attributes: &[Attribute],
        depth: usize,
        pretty: bool,
        scope: &Scope,
    ) {
        self.out.push('<');
        self.out.push_str(name);
        let scope = match self.mode {
            Mode::Plain => {
                for attr in attributes {
                    self.attribute(&attr.name, &attr.value);
                }
                scope.clone()
            }
            Mode::Inclusive => {
                let (declarations, scope) = inclusive_declarations(attributes, scope);
                self.canonical_attributes(id, attributes, &declarations);
                scope
            }
            Mode::Exclusive => {
                let (declarations, scope) =
                    exclusive_declarations(self.doc, id, name, attributes, scope);
                self.canonical_attributes(id, attributes, &declarations);
                scope
            }
        };

        let doc = self.doc;
        let children: Vec<NodeId> = doc
            .children(id)
            .iter()
            .copied()
            .filter(|child| !self.excluded.contains(child))
            .collect();
        if children.is_empty() {
            match self.mode {
                Mode::Plain => self.out.push_str("/>"),
                Mode::Inclusive | Mode::Exclusive => {
                    self.out.push_str("></");
                    self.out.push_str(name);
                    self.out.push('>');
                }
            }
            return;
        }
        self.out.push('>');

        let element_only = children
            .iter()
            .all(|child| !matches!(doc.kind(*child), NodeKind::Text(_)));
        let indent = pretty && element_only && matches!(self.format, XmlFormat::Pretty { .. });
        for child in children {
            if indent {
                self.newline_and_indent(depth + 1);
            }
            self.node(child, depth + 1, pretty && element_only, &scope);
        }
        if indent {
            self.newline_and_indent(depth);
        }
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    /// Writes `declarations` then the ordinary attributes, both in C14N order.
    fn canonical_attributes(
        &mut self,
        id: NodeId,
        attributes: &[Attribute],
        declarations: &[(String, String)],
    ) {
        let doc = self.doc;
        let mut declarations: Vec<(&str, &str)> = declarations
            .iter()
            .map(|(prefix, uri)| (prefix.as_str(), uri.as_str()))
            .collect();
        declarations.sort();
        for (prefix, uri) in declarations {
            if prefix.is_empty() {
                self.attribute("xmlns", uri);
            } else {
                self.attribute(&format!("xmlns:{prefix}"), uri);
            }
        }

        let mut plain: Vec<(&str, &str, &Attribute)> = attributes
            .iter()
            .filter(|attr| attr.declared_prefix().is_none())
            .map(|attr| {
                let namespace = doc.attribute_namespace(id, attr).unwrap_or("");
                let local = attr.name.rsplit(':').next().unwrap_or(&attr.name);
                (namespace, local, attr)
            })
            .collect();
        plain.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        for (_, _, attr) in plain {
            self.attribute(&attr.name, &attr.value);
        }
    }

    fn attribute(&mut self, name: &str, value: &str) {
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        escape_attribute(&mut self.out, value);
        self.out.push('"');
    }

    fn newline_and_indent(&mut self, depth: usize) {
        if let XmlFormat::Pretty {
            indent_char,
            indent_size,
        } = self.format
        {
            self.out.push('\n');
            self.out
                .extend(std::iter::repeat(indent_char).take(depth * indent_size));
        }
    }
}

type Declarations = Vec<(String, String)>;

/// Declarations written on the element itself, minus those an output ancestor
/// already rendered with the same URI.
fn inclusive_declarations(attributes: &[Attribute], scope: &Scope) -> (Declarations, Scope) {
    let mut scope = scope.clone();
    let mut declarations = Vec::new();
    for attr in attributes {
        let Some(prefix) = attr.declared_prefix() else {
            continue;
        };
        let superfluous = match scope.get(prefix) {
            Some(uri) => *uri == attr.value,
            None => prefix.is_empty() && attr.value.is_empty(),
        };
        if !superfluous {
            declarations.push((prefix.to_string(), attr.value.clone()));
            scope.insert(prefix.to_string(), attr.value.clone());
        }
    }
    (declarations, scope)
}

/// Bindings for the prefixes the element and its attributes use, wherever they were
/// declared, minus those an output ancestor already rendered.
fn exclusive_declarations(
    doc: &Document,
    id: NodeId,
    name: &str,
    attributes: &[Attribute],
    scope: &Scope,
) -> (Declarations, Scope) {
    let mut used = vec![split_qname(name).0.unwrap_or("")];
    for attr in attributes.iter().filter(|attr| attr.declared_prefix().is_none()) {
        if let (Some(prefix), _) = split_qname(&attr.name) {
            if prefix != "xml" && !used.contains(&prefix) {
                used.push(prefix);
            }
        }
    }

    let mut scope = scope.clone();
    let mut declarations = Vec::new();
    for prefix in used {
        let uri = doc.lookup_namespace(id, prefix).unwrap_or("");
        let rendered = scope.get(prefix).map(String::as_str).unwrap_or("");
        if uri != rendered {
            declarations.push((prefix.to_string(), uri.to_string()));
            scope.insert(prefix.to_string(), uri.to_string());
        }
    }
    (declarations, scope)
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attribute(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

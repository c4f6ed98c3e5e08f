//! Document navigation, mutation and deterministic serialization.
mod c14n;
pub mod constants;
mod path;
mod tree;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use constants::{CAC_NS, CBC_NS, DS_NS, EXT_NS, SAC_NS, SBC_NS, SIG_NS, XADES_NS};
use path::Path;
pub use tree::{Document, NodeId};
use tree::{split_qname, Attribute, NodeKind};

/// Errors raised while reading, querying or editing XML.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XmlError {
    #[error("malformed XML: {message}")]
    Parse { message: String },
    #[error("required node not found: {path}")]
    MissingField { path: String },
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("namespace prefix '{prefix}' is not registered")]
    UnknownPrefix { prefix: String },
    #[error("namespace prefix '{prefix}' is not declared in scope")]
    UndeclaredPrefix { prefix: String },
    #[error("node is not an element")]
    NotAnElement,
    #[error("insertion point is not a child of the target parent")]
    InvalidInsertion,
    #[error("node does not belong to this document")]
    ForeignNode,
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XmlFormat {
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

impl XmlFormat {
    /// Indentation of `size` spaces per level.
    pub const fn spaces(size: usize) -> Self {
        XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: size,
        }
    }
}

/// Explicit output parameters for [`Navigator::serialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializeOptions {
    pub format: XmlFormat,
    pub xml_declaration: bool,
}

impl SerializeOptions {
    pub fn new(format: XmlFormat, xml_declaration: bool) -> Self {
        Self {
            format,
            xml_declaration,
        }
    }
}

/// Owns one parsed document plus the prefix registry used to resolve query paths.
///
/// # Examples
/// ```rust
/// use zatca_sign_core::invoice::xml::Navigator;
///
/// let nav = Navigator::parse(
///     r#"<Invoice xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
///         <cbc:ID> INV-1 </cbc:ID>
///     </Invoice>"#,
/// )?;
/// let root = nav.root_element()?;
/// assert_eq!(nav.text(root, "cbc:ID")?.as_deref(), Some("INV-1"));
/// assert_eq!(nav.text(root, "cbc:Note?")?, None);
/// # Ok::<(), zatca_sign_core::invoice::xml::XmlError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Navigator {
    doc: Document,
    prefixes: BTreeMap<String, String>,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(Document::new())
    }
}

impl Navigator {
    /// Wraps a document; the UBL signing prefixes are registered up front.
    pub fn new(doc: Document) -> Self {
        let prefixes = [
            ("cbc", CBC_NS),
            ("cac", CAC_NS),
            ("ext", EXT_NS),
            ("sig", SIG_NS),
            ("sac", SAC_NS),
            ("sbc", SBC_NS),
            ("ds", DS_NS),
            ("xades", XADES_NS),
        ]
        .into_iter()
        .map(|(prefix, uri)| (prefix.to_string(), uri.to_string()))
        .collect();
        Self { doc, prefixes }
    }

    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        Ok(Self::new(Document::parse(xml)?))
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_node(&self) -> NodeId {
        self.doc.document_node()
    }

    pub fn root_element(&self) -> Result<NodeId, XmlError> {
        self.doc.root_element().ok_or_else(|| XmlError::MissingField {
            path: "/*".into(),
        })
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.doc.name(node)
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.doc.attribute(node, name)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.doc.parent(node)
    }

    pub fn next_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.doc.next_element_sibling(node)
    }

    pub fn depth(&self, node: NodeId) -> usize {
        self.doc.depth(node)
    }

    pub fn find(&self, from: NodeId, path: &str) -> Result<Option<NodeId>, XmlError> {
        Ok(self.find_all(from, path, Some(1))?.into_iter().next())
    }

    pub fn find_all(
        &self,
        from: NodeId,
        path: &str,
        limit: Option<usize>,
    ) -> Result<Vec<NodeId>, XmlError> {
        self.owned(from)?;
        let path = Path::parse(path, &self.prefixes)?;
        Ok(path.select(&self.doc, from, limit))
    }

    /// Dereferences a path: a miss is an error unless the path ends in `?`.
    pub fn require(&self, from: NodeId, path: &str) -> Result<Option<NodeId>, XmlError> {
        self.owned(from)?;
        let path = Path::parse(path, &self.prefixes)?;
        match path.select(&self.doc, from, Some(1)).first() {
            Some(node) => Ok(Some(*node)),
            None if path.is_optional() => Ok(None),
            None => Err(XmlError::MissingField {
                path: path.source().to_string(),
            }),
        }
    }

    /// Trimmed text of the node a path dereferences to.
    pub fn text(&self, from: NodeId, path: &str) -> Result<Option<String>, XmlError> {
        Ok(self
            .require(from, path)?
            .map(|node| self.doc.text_content(node).trim().to_string()))
    }

    /// Detaches `node` from its parent.
    pub fn remove(&mut self, node: NodeId) {
        self.doc.detach(node);
    }

    /// Detaches the parent of `node`, returning it.
    pub fn remove_parent_of(&mut self, node: NodeId) -> Option<NodeId> {
        let parent = self.doc.parent(node).filter(|p| self.doc.is_element(*p))?;
        self.doc.detach(parent);
        Some(parent)
    }

    /// Creates an element under `parent`, before `before` when given.
    ///
    /// The element's prefix must be declared in scope or in `attrs`; a prefix only
    /// known to the registry gets its declaration added to the new element.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        before: Option<NodeId>,
        name: &str,
        text: Option<&str>,
        attrs: &[(&str, &str)],
    ) -> Result<NodeId, XmlError> {
        self.owned(parent)?;
        if parent != self.doc.document_node() && !self.doc.is_element(parent) {
            return Err(XmlError::NotAnElement);
        }
        let mut attributes: Vec<Attribute> = attrs
            .iter()
            .map(|(name, value)| Attribute::new(*name, *value))
            .collect();

        let prefix = split_qname(name).0.unwrap_or("");
        let declared_here = attributes
            .iter()
            .any(|attr| attr.declared_prefix() == Some(prefix));
        if !prefix.is_empty() && !declared_here && self.doc.lookup_namespace(parent, prefix).is_none()
        {
            let uri = self
                .prefixes
                .get(prefix)
                .ok_or_else(|| XmlError::UndeclaredPrefix {
                    prefix: prefix.to_string(),
                })?;
            attributes.insert(0, Attribute::new(format!("xmlns:{prefix}"), uri.clone()));
        }

        let node = self.doc.insert(
            parent,
            before,
            NodeKind::Element {
                name: name.to_string(),
                attributes,
            },
        )?;
        if let Some(text) = text {
            self.doc.append_text(node, text);
        }
        Ok(node)
    }

    /// Replaces the content of `node` with `text`.
    pub fn set_text(&mut self, node: NodeId, text: &str) -> Result<(), XmlError> {
        self.owned(node)?;
        if !self.doc.is_element(node) {
            return Err(XmlError::NotAnElement);
        }
        self.doc.set_text(node, text);
        Ok(())
    }

    /// Copies the root element of `fragment` under `parent`.
    ///
    /// Declarations on the fragment root that the target scope already binds to
    /// the same URI are dropped.
    pub fn graft(
        &mut self,
        parent: NodeId,
        before: Option<NodeId>,
        fragment: &Document,
    ) -> Result<NodeId, XmlError> {
        self.owned(parent)?;
        let root = fragment.root_element().ok_or(XmlError::NotAnElement)?;
        let copy = self.doc.import(parent, before, fragment, root)?;
        let in_scope: Vec<(String, String)> = self
            .doc
            .attributes(copy)
            .iter()
            .filter_map(|attr| {
                let prefix = attr.declared_prefix()?;
                (self.doc.lookup_namespace(parent, prefix) == Some(attr.value.as_str()))
                    .then(|| (prefix.to_string(), attr.value.clone()))
            })
            .collect();
        self.doc.retain_attributes(copy, |attr| {
            !attr.declared_prefix().is_some_and(|prefix| {
                in_scope
                    .iter()
                    .any(|(p, uri)| p == prefix && *uri == attr.value)
            })
        });
        Ok(copy)
    }

    fn owned(&self, node: NodeId) -> Result<(), XmlError> {
        if self.doc.contains(node) {
            Ok(())
        } else {
            Err(XmlError::ForeignNode)
        }
    }

    pub fn serialize(&self, options: &SerializeOptions) -> String {
        c14n::serialize(&self.doc, options.format, options.xml_declaration)
    }

    /// Canonical bytes of the whole document laid out per `format`, with the
    /// `exclusions` subtrees left out.
    pub fn canonicalize(&self, format: XmlFormat, exclusions: &[NodeId]) -> Vec<u8> {
        c14n::canonicalize(&self.doc, format, exclusions).into_bytes()
    }

    /// Exclusive canonical bytes of `node` as a standalone fragment placed at `depth`.
    pub fn canonicalize_subtree(&self, node: NodeId, format: XmlFormat, depth: usize) -> Vec<u8> {
        c14n::canonicalize_subtree(&self.doc, node, format, depth).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVOICE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2" xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2" xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2">
  <cbc:ProfileID>reporting:1.0</cbc:ProfileID>
  <cac:AdditionalDocumentReference>
    <cbc:ID>QR</cbc:ID>
  </cac:AdditionalDocumentReference>
  <cac:AccountingSupplierParty/>
</Invoice>"#;

    #[test]
    fn require_distinguishes_optional_paths() {
        let nav = Navigator::parse(INVOICE).expect("parse");
        let root = nav.root_element().expect("root");
        assert!(nav.require(root, "cbc:ProfileID").expect("lookup").is_some());
        assert_eq!(nav.require(root, "cbc:UUID?").expect("lookup"), None);
        assert_eq!(
            nav.require(root, "cbc:UUID"),
            Err(XmlError::MissingField {
                path: "cbc:UUID".into()
            })
        );
    }

    #[test]
    fn remove_parent_of_detaches_wrapper() {
        let mut nav = Navigator::parse(INVOICE).expect("parse");
        let id = nav
            .find(nav.document_node(), "//cac:AdditionalDocumentReference/cbc:ID[.='QR']")
            .expect("find")
            .expect("qr id");
        let wrapper = nav.remove_parent_of(id).expect("wrapper");
        assert_eq!(nav.name(wrapper), Some("cac:AdditionalDocumentReference"));
        let root = nav.root_element().expect("root");
        assert_eq!(
            nav.find(root, "cac:AdditionalDocumentReference").expect("find"),
            None
        );
    }

    #[test]
    fn add_child_declares_registered_prefixes_only_when_needed() {
        let mut nav = Navigator::parse(INVOICE).expect("parse");
        let root = nav.root_element().expect("root");
        let profile = nav.find(root, "cbc:ProfileID").expect("find");
        nav.add_child(root, profile, "cbc:UUID", Some("abc"), &[])
            .expect("cbc child");
        nav.add_child(root, None, "ext:UBLExtensions", None, &[])
            .expect("ext child");
        assert!(matches!(
            nav.add_child(root, None, "zz:Thing", None, &[]),
            Err(XmlError::UndeclaredPrefix { .. })
        ));

        let xml = nav.serialize(&SerializeOptions::new(XmlFormat::spaces(4), false));
        assert!(xml.contains("\n    <cbc:UUID>abc</cbc:UUID>\n    <cbc:ProfileID>"));
        assert!(xml.contains(
            "<ext:UBLExtensions xmlns:ext=\"urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2\"/>"
        ));
        assert!(!xml.starts_with("<?xml"));
    }

    #[test]
    fn graft_drops_redundant_root_declarations() {
        let mut nav = Navigator::parse(INVOICE).expect("parse");
        let root = nav.root_element().expect("root");
        let mut fragment = Navigator::default();
        let top = fragment
            .add_child(
                fragment.document_node(),
                None,
                "cac:Signature",
                None,
                &[("xmlns:cac", CAC_NS), ("xmlns:cbc", CBC_NS)],
            )
            .expect("fragment root");
        fragment
            .add_child(top, None, "cbc:ID", Some("sig"), &[])
            .expect("fragment child");

        nav.graft(root, None, fragment.document()).expect("graft");
        let xml = nav.serialize(&SerializeOptions::new(XmlFormat::Compact, false));
        assert!(xml.contains("<cac:Signature><cbc:ID>sig</cbc:ID></cac:Signature>"));
    }

    #[test]
    fn ids_from_another_document_are_rejected() {
        let invoice = Navigator::parse(INVOICE).expect("parse");
        let deep = invoice
            .find(invoice.document_node(), "//cbc:ID")
            .expect("find")
            .expect("qr id");
        let mut small = Navigator::parse("<Invoice/>").expect("parse");
        assert_eq!(small.find(deep, "*"), Err(XmlError::ForeignNode));
        assert_eq!(small.require(deep, "cbc:ID"), Err(XmlError::ForeignNode));
        assert_eq!(
            small.add_child(deep, None, "Note", None, &[]),
            Err(XmlError::ForeignNode)
        );
        assert_eq!(small.set_text(deep, "x"), Err(XmlError::ForeignNode));
    }

    #[test]
    fn canonical_output_is_repeatable() {
        let nav = Navigator::parse(INVOICE).expect("parse");
        let first = nav.canonicalize(XmlFormat::spaces(4), &[]);
        let second = nav.canonicalize(XmlFormat::spaces(4), &[]);
        assert_eq!(first, second);
        let text = String::from_utf8(first).expect("utf8");
        assert!(text.starts_with("<Invoice xmlns=\"urn:oasis:names:specification:ubl:schema:xsd:Invoice-2\" xmlns:cac="));
        assert!(text.contains("<cac:AccountingSupplierParty></cac:AccountingSupplierParty>"));
    }
}

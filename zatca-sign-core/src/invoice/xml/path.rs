//! Minimal namespace-aware path matching.
//!
//! Grammar: `["//"] step (("/" | "//") step)* ["?"]` where a step is `prefix:local`,
//! `local` or `*`, optionally followed by a `[.='literal']` text predicate.
//! A trailing `?` marks the path optional.
use std::collections::{BTreeMap, HashSet};

use super::tree::{split_qname, Document, NodeId};
use super::XmlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Local(String),
    Qualified { namespace: String, local: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NameTest,
    text_equals: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Path {
    source: String,
    steps: Vec<Step>,
    optional: bool,
}

impl Path {
    pub(crate) fn parse(expr: &str, prefixes: &BTreeMap<String, String>) -> Result<Self, XmlError> {
        let source = expr.trim();
        let invalid = |reason: &'static str| XmlError::InvalidPath {
            path: source.to_string(),
            reason,
        };
        let (body, optional) = match source.strip_suffix('?') {
            Some(body) => (body, true),
            None => (source, false),
        };
        if body.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut steps = Vec::new();
        let mut rest = body;
        let mut axis = Axis::Child;
        if let Some(stripped) = rest.strip_prefix("//") {
            axis = Axis::Descendant;
            rest = stripped;
        } else if rest.starts_with('/') {
            return Err(invalid("paths are relative to a node"));
        }

        loop {
            let end = rest.find(['/', '[']).unwrap_or(rest.len());
            let name = &rest[..end];
            if name.is_empty() {
                return Err(invalid("empty step"));
            }
            rest = &rest[end..];

            let mut text_equals = None;
            if let Some(predicate) = rest.strip_prefix('[') {
                let close = predicate.find(']').ok_or_else(|| invalid("unterminated predicate"))?;
                text_equals = Some(parse_predicate(&predicate[..close]).ok_or_else(|| {
                    invalid("only [.='literal'] predicates are supported")
                })?);
                rest = &predicate[close + 1..];
            }

            steps.push(Step {
                axis,
                test: name_test(name, prefixes)?,
                text_equals,
            });

            if rest.is_empty() {
                break;
            }
            if let Some(stripped) = rest.strip_prefix("//") {
                axis = Axis::Descendant;
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix('/') {
                axis = Axis::Child;
                rest = stripped;
            } else {
                return Err(invalid("expected '/' between steps"));
            }
        }

        Ok(Self {
            source: source.to_string(),
            steps,
            optional,
        })
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn is_optional(&self) -> bool {
        self.optional
    }

    /// Matches in document order, at most `limit` of them.
    pub(crate) fn select(&self, doc: &Document, from: NodeId, limit: Option<usize>) -> Vec<NodeId> {
        let mut current = vec![from];
        for step in &self.steps {
            let mut matched = HashSet::new();
            for context in &current {
                let candidates = match step.axis {
                    Axis::Child => doc.children(*context).to_vec(),
                    Axis::Descendant => doc.descendants(*context),
                };
                matched.extend(
                    candidates
                        .into_iter()
                        .filter(|candidate| step.matches(doc, *candidate)),
                );
            }
            if matched.is_empty() {
                return Vec::new();
            }
            current = document_order(doc, from, &matched);
        }
        if let Some(limit) = limit {
            current.truncate(limit);
        }
        current
    }
}

impl Step {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(name) = doc.name(node) else {
            return false;
        };
        let name_matches = match &self.test {
            NameTest::Any => true,
            NameTest::Local(local) => split_qname(name).1 == local,
            NameTest::Qualified { namespace, local } => {
                split_qname(name).1 == local && doc.namespace_uri(node) == Some(namespace.as_str())
            }
        };
        name_matches
            && self
                .text_equals
                .as_deref()
                .map_or(true, |expected| doc.text_content(node).trim() == expected)
    }
}

fn name_test(name: &str, prefixes: &BTreeMap<String, String>) -> Result<NameTest, XmlError> {
    if name == "*" {
        return Ok(NameTest::Any);
    }
    match split_qname(name) {
        (Some(prefix), local) => {
            let namespace = prefixes.get(prefix).ok_or_else(|| XmlError::UnknownPrefix {
                prefix: prefix.to_string(),
            })?;
            Ok(NameTest::Qualified {
                namespace: namespace.clone(),
                local: local.to_string(),
            })
        }
        (None, local) => Ok(NameTest::Local(local.to_string())),
    }
}

fn parse_predicate(predicate: &str) -> Option<String> {
    let literal = predicate.trim().strip_prefix('.')?.trim_start().strip_prefix('=')?.trim();
    let quote = literal.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = literal.strip_prefix(quote)?.strip_suffix(quote)?;
    Some(inner.to_string())
}

/// Orders a node set the way a pre-order walk from `scope` visits it.
fn document_order(doc: &Document, scope: NodeId, set: &HashSet<NodeId>) -> Vec<NodeId> {
    let mut root = scope;
    while let Some(parent) = doc.parent(root) {
        root = parent;
    }
    doc.descendants(root)
        .into_iter()
        .filter(|node| set.contains(node))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("a".to_string(), "urn:a".to_string()),
            ("b".to_string(), "urn:b".to_string()),
        ])
    }

    const XML: &str = r#"<r xmlns:a="urn:a" xmlns:x="urn:b">
        <a:item><x:id>QR</x:id></a:item>
        <a:item><x:id> ICV </x:id></a:item>
        <a:group><a:item><x:id>nested</x:id></a:item></a:group>
    </r>"#;

    fn texts(doc: &Document, nodes: &[NodeId]) -> Vec<String> {
        nodes.iter().map(|n| doc.text_content(*n)).collect()
    }

    #[test]
    fn prefixes_match_by_namespace_not_spelling() {
        let doc = Document::parse(XML).expect("parse");
        let root = doc.root_element().expect("root");
        let path = Path::parse("a:item/b:id", &registry()).expect("path");
        assert_eq!(texts(&doc, &path.select(&doc, root, None)), ["QR", " ICV "]);
    }

    #[test]
    fn descendant_axis_and_predicates() {
        let doc = Document::parse(XML).expect("parse");
        let path = Path::parse("//a:item/b:id[.='ICV']", &registry()).expect("path");
        let found = path.select(&doc, doc.document_node(), None);
        assert_eq!(texts(&doc, &found), [" ICV "]);

        let all = Path::parse("//b:id", &registry()).expect("path");
        assert_eq!(
            texts(&doc, &all.select(&doc, doc.document_node(), Some(2))),
            ["QR", " ICV "]
        );
        assert_eq!(all.select(&doc, doc.document_node(), None).len(), 3);
    }

    #[test]
    fn optional_marker_and_errors() {
        let path = Path::parse("a:item?", &registry()).expect("path");
        assert!(path.is_optional());
        assert_eq!(path.source(), "a:item?");

        assert!(matches!(
            Path::parse("z:item", &registry()),
            Err(XmlError::UnknownPrefix { .. })
        ));
        for bad in ["", "/a:item", "a:item/", "a:item[@x='1']", "a:item[.='x'"] {
            assert!(
                matches!(Path::parse(bad, &registry()), Err(XmlError::InvalidPath { .. })),
                "accepted {bad:?}"
            );
        }
    }
}

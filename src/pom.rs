/// Byte-faithful element tree over a Maven build descriptor.
///
/// Only elements are structured; everything else (whitespace, comments,
/// declarations, CDATA) is kept as verbatim markup so that an unedited
/// document serializes back to exactly the bytes it was parsed from.
///
/// Edits are pure: [`Document::insert_unless`] returns a new document (or
/// `None` when the key already matches) and writing it back is a separate
/// call.
use std::fmt;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{HarnessError, Result};

/// A node in the descriptor tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    /// Serialized markup kept as-is.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Local name, without any namespace prefix.
    pub name: String,
    /// Tag content between `<` and `>` (name plus attributes), verbatim.
    start: String,
    /// Qualified name as written in the end tag.
    end: String,
    /// Written as `<tag/>`.
    empty: bool,
    pub children: Vec<Node>,
}

/// How an edit recognizes that its fragment is already present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKey {
    /// A sibling `<element>` whose `<child>` has the given text.
    ChildText {
        element: String,
        child: String,
        text: String,
    },
    /// A sibling structurally equal to the fragment, ignoring whitespace.
    Identical,
}

impl NodeKey {
    pub fn child_text(element: &str, child: &str, text: &str) -> Self {
        NodeKey::ChildText {
            element: element.to_string(),
            child: child.to_string(),
            text: text.to_string(),
        }
    }

    fn matches(&self, candidate: &Element, fragment: &Element) -> bool {
        match self {
            NodeKey::ChildText {
                element,
                child,
                text,
            } => {
                candidate.name == *element
                    && candidate
                        .child(child)
                        .is_some_and(|c| c.text().trim() == text.as_str())
            }
            NodeKey::Identical => same_shape(candidate, fragment),
        }
    }
}

impl Element {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: name.to_string(),
            end: name.to_string(),
            empty: false,
            children: Vec::new(),
        }
    }

    /// First child element with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|n| match n {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    /// Child elements, skipping text and comments.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Raw(_) => None,
        })
    }

    /// Concatenated character content of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Raw(s) if !s.starts_with('<') => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whitespace that precedes existing child elements, if any.
    fn child_indent(&self) -> Option<String> {
        self.children.windows(2).find_map(|pair| match pair {
            [Node::Raw(ws), Node::Element(_)] if ws.trim().is_empty() && ws.contains('\n') => {
                Some(ws.clone())
            }
            _ => None,
        })
    }

    /// Append `node` as the last child, keeping the closing-tag whitespace last.
    fn append_child(&mut self, node: Node, depth: usize) {
        let indent = self
            .child_indent()
            .unwrap_or_else(|| format!("\n{}", "    ".repeat(depth + 1)));
        let closing = match self.children.last() {
            Some(Node::Raw(ws)) if ws.trim().is_empty() => self.children.pop(),
            _ => None,
        };
        self.empty = false;
        self.children.push(Node::Raw(indent));
        self.children.push(node);
        self.children.push(
            closing.unwrap_or_else(|| Node::Raw(format!("\n{}", "    ".repeat(depth)))),
        );
    }

    fn write_to(&self, out: &mut String) {
        if self.empty {
            out.push('<');
            out.push_str(&self.start);
            out.push_str("/>");
            return;
        }
        out.push('<');
        out.push_str(&self.start);
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(e) => e.write_to(out),
                Node::Raw(s) => out.push_str(s),
            }
        }
        out.push_str("</");
        out.push_str(&self.end);
        out.push('>');
    }
}

/// Structural equality: same names and attributes, same element children,
/// same trimmed text, whitespace-only text ignored.
fn same_shape(a: &Element, b: &Element) -> bool {
    fn significant(e: &Element) -> Vec<&Node> {
        e.children
            .iter()
            .filter(|n| !matches!(n, Node::Raw(s) if s.trim().is_empty()))
            .collect()
    }
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    if a.name != b.name || normalize(&a.start) != normalize(&b.start) {
        return false;
    }
    let (ca, cb) = (significant(a), significant(b));
    ca.len() == cb.len()
        && ca.iter().zip(cb.iter()).all(|pair| match pair {
            (Node::Element(x), Node::Element(y)) => same_shape(x, y),
            (Node::Raw(x), Node::Raw(y)) => x.trim() == y.trim(),
            _ => false,
        })
}

/// A parsed descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    nodes: Vec<Node>,
}

fn raw(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn xml_err(source: quick_xml::Error, reader: &Reader<&[u8]>) -> HarnessError {
    HarnessError::Xml {
        source,
        position: reader.buffer_position(),
    }
}

fn push_node(stack: &mut [Element], top: &mut Vec<Node>, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => top.push(node),
    }
}

impl Document {
    /// Parse descriptor text into a tree.
    pub fn parse(input: &str) -> Result<Self> {
        let mut reader = Reader::from_str(input);
        let mut stack: Vec<Element> = Vec::new();
        let mut top: Vec<Node> = Vec::new();

        loop {
            let node = match reader.read_event() {
                Err(e) => return Err(xml_err(e, &reader)),
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    stack.push(Element {
                        name: raw(e.local_name().as_ref()),
                        start: raw(&e),
                        end: String::new(),
                        empty: false,
                        children: Vec::new(),
                    });
                    continue;
                }
                Ok(Event::End(e)) => {
                    let mut element = stack.pop().ok_or_else(|| {
                        HarnessError::Config(format!(
                            "unexpected closing tag </{}> at position {}",
                            raw(&e),
                            reader.buffer_position()
                        ))
                    })?;
                    element.end = raw(&e);
                    Node::Element(element)
                }
                Ok(Event::Empty(e)) => Node::Element(Element {
                    name: raw(e.local_name().as_ref()),
                    start: raw(&e),
                    end: String::new(),
                    empty: true,
                    children: Vec::new(),
                }),
                Ok(Event::Text(e)) => Node::Raw(raw(&e)),
                Ok(Event::CData(e)) => Node::Raw(format!("<![CDATA[{}]]>", raw(&e))),
                Ok(Event::Comment(e)) => Node::Raw(format!("<!--{}-->", raw(&e))),
                Ok(Event::Decl(e)) => Node::Raw(format!("<?{}?>", raw(&e))),
                Ok(Event::PI(e)) => Node::Raw(format!("<?{}?>", raw(&e))),
                Ok(Event::DocType(e)) => {
                    Node::Raw(format!("<!DOCTYPE {}>", raw(&e).trim_start()))
                }
            };
            push_node(&mut stack, &mut top, node);
        }

        if let Some(open) = stack.last() {
            return Err(HarnessError::Config(format!(
                "unclosed element <{}>",
                open.name
            )));
        }
        let doc = Self { nodes: top };
        if doc.root().is_none() {
            return Err(HarnessError::Config("document has no root element".into()));
        }
        Ok(doc)
    }

    /// Parse a standalone fragment and return its single top-level element.
    pub fn parse_fragment(input: &str) -> Result<Element> {
        let doc = Self::parse(input)?;
        doc.nodes
            .into_iter()
            .find_map(|n| match n {
                Node::Element(e) => Some(e),
                Node::Raw(_) => None,
            })
            .ok_or_else(|| HarnessError::Config("fragment has no element".into()))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Explicit write step, separate from any edit.
    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_string())?;
        Ok(())
    }

    pub fn root(&self) -> Option<&Element> {
        self.nodes.iter().find_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Raw(_) => None,
        })
    }

    fn root_mut(&mut self) -> Option<&mut Element> {
        self.nodes.iter_mut().find_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Raw(_) => None,
        })
    }

    /// Element at `path`, where `path[0]` names the root.
    pub fn find(&self, path: &[&str]) -> Option<&Element> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root().filter(|r| r.name == *first)?;
        for seg in rest {
            current = current.child(seg)?;
        }
        Some(current)
    }

    /// Insert `fragment` as the last child of the element at `path`, unless a
    /// child matching `key` is already there. Missing intermediate elements
    /// are created. Returns `None` when nothing needed to change.
    pub fn insert_unless(
        &self,
        path: &[&str],
        fragment: &Element,
        key: &NodeKey,
    ) -> Result<Option<Document>> {
        if let Some(parent) = self.find(path) {
            if parent.elements().any(|c| key.matches(c, fragment)) {
                return Ok(None);
            }
        }

        let (first, rest) = path
            .split_first()
            .ok_or_else(|| HarnessError::Config("empty element path".into()))?;
        let mut doc = self.clone();
        let root = doc
            .root_mut()
            .filter(|r| r.name == *first)
            .ok_or_else(|| {
                HarnessError::Config(format!("descriptor root is not <{}>", first))
            })?;

        let mut current = root;
        for (depth, seg) in rest.iter().enumerate() {
            if current.child(seg).is_none() {
                current.append_child(Node::Element(Element::new(seg)), depth);
            }
            current = current
                .child_mut(seg)
                .ok_or_else(|| HarnessError::Other(format!("lost <{}> after insert", seg)))?;
        }
        current.append_child(Node::Element(fragment.clone()), rest.len());
        Ok(Some(doc))
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Element(e) => e.write_to(&mut out),
                Node::Raw(s) => out.push_str(s),
            }
        }
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- sample -->
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <artifactId>demo</artifactId>
  <build>
    <plugins>
      <plugin>
        <groupId>org.apache.maven.plugins</groupId>
        <artifactId>maven-compiler-plugin</artifactId>
        <configuration><source>1.8</source><skip/></configuration>
      </plugin>
    </plugins>
  </build>
</project>
"#;

    #[test]
    fn test_roundtrip_is_byte_faithful() {
        let doc = Document::parse(POM).unwrap();
        assert_eq!(doc.to_string(), POM);
    }

    #[test]
    fn test_find_and_text() {
        let doc = Document::parse(POM).unwrap();
        let artifact = doc.find(&["project", "artifactId"]).unwrap();
        assert_eq!(artifact.text(), "demo");
        assert!(doc.find(&["project", "profiles"]).is_none());
        assert!(doc.find(&["pom"]).is_none());
    }

    #[test]
    fn test_insert_creates_missing_parent() {
        let doc = Document::parse(POM).unwrap();
        let fragment =
            Document::parse_fragment("<profile><id>demop</id></profile>").unwrap();
        let key = NodeKey::child_text("profile", "id", "demop");

        let edited = doc
            .insert_unless(&["project", "profiles"], &fragment, &key)
            .unwrap()
            .expect("fragment should be inserted");
        let profiles = edited.find(&["project", "profiles"]).unwrap();
        assert_eq!(profiles.elements().count(), 1);

        let text = edited.to_string();
        assert!(text.contains("<profiles>"));
        assert!(text.trim_end().ends_with("</project>"));
        // Re-parses cleanly.
        Document::parse(&text).unwrap();
    }

    #[test]
    fn test_insert_is_idempotent() {
        let doc = Document::parse(POM).unwrap();
        let fragment =
            Document::parse_fragment("<profile><id>demop</id></profile>").unwrap();
        let key = NodeKey::child_text("profile", "id", "demop");

        let once = doc
            .insert_unless(&["project", "profiles"], &fragment, &key)
            .unwrap()
            .unwrap();
        let twice = once
            .insert_unless(&["project", "profiles"], &fragment, &key)
            .unwrap();
        assert!(twice.is_none());
    }

    #[test]
    fn test_identical_key_ignores_whitespace() {
        let doc = Document::parse(POM).unwrap();
        let fragment = Document::parse_fragment(
            "<plugin>\n  <groupId>org.apache.maven.plugins</groupId>\n  \
             <artifactId>maven-compiler-plugin</artifactId>\n  \
             <configuration><source>1.8</source><skip/></configuration>\n</plugin>",
        )
        .unwrap();
        let result = doc
            .insert_unless(&["project", "build", "plugins"], &fragment, &NodeKey::Identical)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_insert_reuses_sibling_indent() {
        let doc = Document::parse(POM).unwrap();
        let fragment = Document::parse_fragment("<plugin><artifactId>x</artifactId></plugin>")
            .unwrap();
        let edited = doc
            .insert_unless(&["project", "build", "plugins"], &fragment, &NodeKey::Identical)
            .unwrap()
            .unwrap();
        assert!(edited
            .to_string()
            .contains("</plugin>\n      <plugin><artifactId>x</artifactId></plugin>\n    </plugins>"));
    }

    #[test]
    fn test_malformed_descriptor_reports_position() {
        let result = Document::parse("<project><build></project>");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("position"), "{err}");
    }

    #[test]
    fn test_wrong_root_is_config_error() {
        let doc = Document::parse("<settings/>").unwrap();
        let fragment = Document::parse_fragment("<profile/>").unwrap();
        let result = doc.insert_unless(&["project", "profiles"], &fragment, &NodeKey::Identical);
        assert!(matches!(result, Err(HarnessError::Config(_))));
    }
}

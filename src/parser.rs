//! XML tree parsing and serialization.
//!
//! Templates and responses are parsed with quick-xml into a small owned tree.
//! The tree keeps everything needed to write the document back out unchanged:
//! declarations, comments, processing instructions, CDATA sections, attribute
//! order and namespace declarations. quick-xml does not expand external
//! entities, so parsing untrusted responses is safe.

use crate::error::{BusError, Result};
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Write;

/// The `xmlns` attribute prefix.
const XMLNS: &str = "xmlns";

/// An attribute as written in the source, namespace declarations included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Qualified name (`id`, `xsi:type`, `xmlns:ns1`)
    pub name: String,
    /// Unescaped value
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A node in the XML tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    /// Unescaped character data
    Text(String),
    CData(String),
    Comment(String),
    /// Content of `<?xml ...?>`
    Declaration(String),
    ProcessingInstruction(String),
    DocType(String),
}

impl XmlNode {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            XmlNode::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            XmlNode::Element(e) => Some(e),
            _ => None,
        }
    }
}

/// An XML element, or the document node when `name` is empty.
///
/// The document node has no tag of its own; its children are the prolog
/// (declaration, comments, whitespace) followed by the root element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Qualified tag name as written (`soap:Body`, `initiatorId`)
    pub name: String,
    /// Attributes in source order
    pub attributes: Vec<Attribute>,
    /// Child nodes in document order
    pub children: Vec<XmlNode>,
}

impl Element {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create a document node holding the given children.
    pub fn document(children: Vec<XmlNode>) -> Self {
        Self {
            name: String::new(),
            attributes: Vec::new(),
            children,
        }
    }

    /// Whether this is the document node rather than a tagged element.
    pub fn is_document(&self) -> bool {
        self.name.is_empty()
    }

    /// Tag name with any namespace prefix stripped.
    pub fn local_name(&self) -> &str {
        split_qname(&self.name).1
    }

    /// Namespace prefix of the tag, if any.
    pub fn prefix(&self) -> Option<&str> {
        split_qname(&self.name).0
    }

    /// Local-name match, ignoring any prefix or namespace.
    pub fn has_local_name(&self, name: &str) -> bool {
        !self.is_document() && self.local_name() == name
    }

    /// Value of the attribute with the given qualified name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute { name, value }),
        }
    }

    /// Namespace declarations made on this element, as `(prefix, uri)`.
    /// The default namespace has no prefix.
    pub fn namespace_declarations(&self) -> impl Iterator<Item = (Option<&str>, &str)> {
        self.attributes.iter().filter_map(|a| {
            if a.name == XMLNS {
                Some((None, a.value.as_str()))
            } else {
                a.name
                    .strip_prefix("xmlns:")
                    .map(|prefix| (Some(prefix), a.value.as_str()))
            }
        })
    }

    /// Namespace URI of this element's tag, resolved against the
    /// declarations on the element itself.
    pub fn namespace(&self) -> Option<&str> {
        let prefix = self.prefix();
        self.namespace_declarations()
            .find(|(declared, _)| *declared == prefix)
            .map(|(_, uri)| uri)
    }

    /// Concatenated text and CDATA content of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(t) | XmlNode::CData(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace the text content, keeping child elements.
    pub fn set_text(&mut self, value: impl Into<String>) {
        self.children
            .retain(|node| !matches!(node, XmlNode::Text(_) | XmlNode::CData(_)));
        self.children.insert(0, XmlNode::Text(value.into()));
    }

    /// Direct child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(XmlNode::as_element)
    }

    /// Direct child elements, mutably.
    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(XmlNode::as_element_mut)
    }

    /// First child element; for a document node this is the root element.
    pub fn first_element(&self) -> Option<&Element> {
        self.child_elements().next()
    }

    /// Serialize this node and its subtree.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        self.write_xml(&mut writer)?;
        String::from_utf8(writer.into_inner()).map_err(|e| BusError::XmlWrite(e.to_string()))
    }

    /// Serialize this node and its subtree into `writer`.
    pub fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        if self.is_document() {
            return write_nodes(&self.children, writer);
        }

        let mut start = BytesStart::new(self.name.as_str());
        for attr in &self.attributes {
            start.push_attribute((attr.name.as_str(), attr.value.as_str()));
        }

        if self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        write_nodes(&self.children, writer)?;
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

fn write_nodes<W: Write>(nodes: &[XmlNode], writer: &mut Writer<W>) -> Result<()> {
    for node in nodes {
        match node {
            XmlNode::Element(e) => e.write_xml(writer)?,
            XmlNode::Text(t) => {
                writer.write_event(Event::Text(BytesText::from_escaped(partial_escape(t))))?
            }
            XmlNode::CData(t) => writer.write_event(Event::CData(BytesCData::new(t.as_str())))?,
            XmlNode::Comment(t) => {
                writer.write_event(Event::Comment(BytesText::from_escaped(t.as_str())))?
            }
            // Stored content starts with the target name, "xml" for the declaration.
            XmlNode::Declaration(t) => writer.write_event(Event::Decl(BytesDecl::from_start(
                BytesStart::from_content(t.as_str(), 3),
            )))?,
            XmlNode::ProcessingInstruction(t) => {
                writer.write_event(Event::PI(BytesPI::new(t.as_str())))?
            }
            XmlNode::DocType(t) => {
                writer.write_event(Event::DocType(BytesText::from_escaped(t.as_str())))?
            }
        }
    }
    Ok(())
}

/// Split a qualified name into prefix and local name.
fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Parse markup into a document node.
///
/// Fails on malformed syntax, mismatched or unclosed tags, a missing root
/// element, more than one root element, or text outside the root.
pub fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    // The bottom of the stack is the document node.
    let mut stack: Vec<Element> = vec![Element::document(Vec::new())];
    let mut seen_root = false;

    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event()
            .map_err(|e| BusError::XmlParse(format!("{} at position {}", e, position)))?;

        match event {
            Event::Start(ref e) => {
                if stack.len() == 1 && seen_root {
                    return Err(BusError::XmlParse(
                        "document has more than one root element".to_string(),
                    ));
                }
                stack.push(element_from_start(e)?);
            }

            Event::Empty(ref e) => {
                let element = element_from_start(e)?;
                if stack.len() == 1 {
                    if seen_root {
                        return Err(BusError::XmlParse(
                            "document has more than one root element".to_string(),
                        ));
                    }
                    seen_root = true;
                }
                push_child(&mut stack, XmlNode::Element(element));
            }

            Event::End(ref e) => {
                if stack.len() < 2 {
                    return Err(BusError::XmlParse(format!(
                        "unexpected closing tag </{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                let element = stack.pop().unwrap_or_default();
                if stack.len() == 1 {
                    seen_root = true;
                }
                push_child(&mut stack, XmlNode::Element(element));
            }

            Event::Text(ref e) => {
                let text = e.unescape()?.into_owned();
                if stack.len() == 1 && !text.trim().is_empty() {
                    return Err(BusError::XmlParse(format!(
                        "text outside the root element: {:?}",
                        text.trim()
                    )));
                }
                push_child(&mut stack, XmlNode::Text(text));
            }

            Event::CData(ref e) => {
                push_child(&mut stack, XmlNode::CData(lossy(e)));
            }

            Event::Comment(ref e) => {
                push_child(&mut stack, XmlNode::Comment(lossy(e)));
            }

            Event::Decl(ref e) => {
                push_child(&mut stack, XmlNode::Declaration(lossy(e)));
            }

            Event::PI(ref e) => {
                push_child(&mut stack, XmlNode::ProcessingInstruction(lossy(e)));
            }

            Event::DocType(ref e) => {
                push_child(&mut stack, XmlNode::DocType(lossy(e)));
            }

            Event::Eof => break,
        }
    }

    if stack.len() > 1 {
        let open = stack.last().map(|e| e.name.clone()).unwrap_or_default();
        return Err(BusError::XmlParse(format!("unclosed element <{}>", open)));
    }
    if !seen_root {
        return Err(BusError::XmlParse("document has no root element".to_string()));
    }

    Ok(stack.pop().unwrap_or_default())
}

fn push_child(stack: &mut [Element], node: XmlNode) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn element_from_start(e: &BytesStart) -> Result<Element> {
    let mut element = Element::new(lossy(e.name().as_ref()));
    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        element
            .attributes
            .push(Attribute::new(lossy(attr.key.as_ref()), value.into_owned()));
    }
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT_REQUEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- account lookup -->
<acct:GetAccountRequest xmlns:acct="urn:example:account" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <acct:accountNumber type="checking">0001</acct:accountNumber>
  <acct:note><![CDATA[a < b]]></acct:note>
  <acct:empty/>
</acct:GetAccountRequest>"#;

    #[test]
    fn test_parse_and_serialize_round_trip() {
        let doc = parse_document(ACCOUNT_REQUEST).unwrap();
        assert!(doc.is_document());
        assert_eq!(doc.to_xml().unwrap(), ACCOUNT_REQUEST);
    }

    #[test]
    fn test_root_names_and_namespace() {
        let doc = parse_document(ACCOUNT_REQUEST).unwrap();
        let root = doc.first_element().unwrap();
        assert_eq!(root.name, "acct:GetAccountRequest");
        assert_eq!(root.local_name(), "GetAccountRequest");
        assert_eq!(root.prefix(), Some("acct"));
        assert_eq!(root.namespace(), Some("urn:example:account"));

        let declarations: Vec<_> = root.namespace_declarations().collect();
        assert_eq!(
            declarations,
            vec![
                (Some("acct"), "urn:example:account"),
                (Some("xsi"), "http://www.w3.org/2001/XMLSchema-instance"),
            ]
        );
    }

    #[test]
    fn test_default_namespace() {
        let doc = parse_document(r#"<GetAccountRequest xmlns="urn:example"><a/></GetAccountRequest>"#)
            .unwrap();
        let root = doc.first_element().unwrap();
        assert_eq!(root.prefix(), None);
        assert_eq!(root.namespace(), Some("urn:example"));
    }

    #[test]
    fn test_text_and_cdata() {
        let doc = parse_document(ACCOUNT_REQUEST).unwrap();
        let root = doc.first_element().unwrap();
        let children: Vec<_> = root.child_elements().collect();
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].text(), "0001");
        assert_eq!(children[0].attribute("type"), Some("checking"));
        assert_eq!(children[1].text(), "a < b");
        assert_eq!(children[2].text(), "");
    }

    #[test]
    fn test_escaping_on_write() {
        let mut element = Element::new("note");
        element.set_attribute("title", "\"quoted\" & <tagged>");
        element.set_text("Tom & Jerry <3");
        assert_eq!(
            element.to_xml().unwrap(),
            r#"<note title="&quot;quoted&quot; &amp; &lt;tagged&gt;">Tom &amp; Jerry &lt;3</note>"#
        );

        let reparsed = parse_document(&element.to_xml().unwrap()).unwrap();
        let note = reparsed.first_element().unwrap();
        assert_eq!(note.text(), "Tom & Jerry <3");
        assert_eq!(note.attribute("title"), Some("\"quoted\" & <tagged>"));
    }

    #[test]
    fn test_set_text_keeps_child_elements() {
        let mut doc = parse_document("<a>old<b/>tail</a>").unwrap();
        let root = doc.child_elements_mut().next().unwrap();
        root.set_text("new");
        assert_eq!(root.to_xml().unwrap(), "<a>new<b/></a>");
    }

    #[test]
    fn test_bad_attribute_and_entity_are_parse_errors() {
        assert!(matches!(
            parse_document(r#"<a x="1" x="2"/>"#),
            Err(BusError::XmlParse(_))
        ));
        assert!(matches!(
            parse_document("<a>&nbsp;</a>"),
            Err(BusError::XmlParse(_))
        ));
    }

    #[test]
    fn test_malformed_markup_is_rejected() {
        assert!(matches!(
            parse_document("<a><b></a>"),
            Err(BusError::XmlParse(_))
        ));
        assert!(matches!(parse_document("<a><b>"), Err(BusError::XmlParse(_))));
        assert!(matches!(parse_document(""), Err(BusError::XmlParse(_))));
        assert!(matches!(
            parse_document("<a/><b/>"),
            Err(BusError::XmlParse(_))
        ));
        assert!(matches!(
            parse_document("stray<a/>"),
            Err(BusError::XmlParse(_))
        ));
    }
}

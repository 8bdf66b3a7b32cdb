//! Outgoing SOAP envelope assembly.
//!
//! A body template's root element names the remote operation. Its name and
//! namespace are lifted to the envelope, its namespace declarations join the
//! envelope's namespace table, and only its child elements become the body
//! payload, so the operation element is not nested twice.
//!
//! Payload prefixes always keep their meaning. When the template claims the
//! envelope or operation prefix for another namespace, the envelope's own
//! prefix moves to the next free name (`env1`, `wsdl1`, ...).

use crate::error::{BusError, Result};
use crate::parser::{parse_document, Element};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::io::Write;
use tracing::debug;

/// SOAP 1.1 envelope namespace.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// XML Schema instance namespace, declared on every envelope.
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// Preferred prefix of the envelope elements.
pub const ENVELOPE_PREFIX: &str = "env";
/// Preferred prefix bound to the operation namespace.
pub const OPERATION_PREFIX: &str = "wsdl";

/// An outgoing SOAP 1.1 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapEnvelope {
    /// Namespace declarations on the envelope element (`xmlns:prefix` -> URI)
    pub namespaces: BTreeMap<String, String>,
    /// SOAP action
    pub action: String,
    /// Header markup placed inside the envelope `Header`
    pub header: Option<String>,
    /// Operation element local name
    pub input: String,
    /// Operation namespace
    pub namespace: Option<String>,
    /// Default namespace declared on the body template root
    pub default_namespace: Option<String>,
    /// Serialized child elements of the body template root
    pub body: String,
    /// Prefix of `Envelope`, `Header` and `Body`
    pub envelope_prefix: String,
    /// Prefix of the operation element
    pub operation_prefix: String,
}

fn xmlns(prefix: &str) -> String {
    format!("xmlns:{}", prefix)
}

impl SoapEnvelope {
    /// Empty envelope with the SOAP and XSI namespaces declared.
    pub fn new(action: impl Into<String>) -> Self {
        let mut namespaces = BTreeMap::new();
        namespaces.insert(xmlns(ENVELOPE_PREFIX), SOAP_11_NS.to_string());
        namespaces.insert(xmlns("xsi"), XSI_NS.to_string());
        Self {
            namespaces,
            action: action.into(),
            header: None,
            input: String::new(),
            namespace: None,
            default_namespace: None,
            body: String::new(),
            envelope_prefix: ENVELOPE_PREFIX.to_string(),
            operation_prefix: OPERATION_PREFIX.to_string(),
        }
    }

    /// Declare an additional namespace on the envelope.
    pub fn add_namespace(&mut self, prefix: &str, uri: impl Into<String>) {
        self.namespaces.insert(xmlns(prefix), uri.into());
    }

    pub fn set_header(&mut self, header: impl Into<String>) {
        self.header = Some(header.into());
    }

    /// Reshape a filled body template into this envelope.
    ///
    /// Fails with [`BusError::InvalidEnvelope`] when the template binds a
    /// prefix already declared on the envelope (`xsi` or a configured
    /// namespace) to a different URI.
    pub fn configure_body(&mut self, body: &str) -> Result<()> {
        let document = parse_document(body)?;
        let root = document
            .first_element()
            .ok_or_else(|| BusError::XmlParse("document has no root element".to_string()))?;

        self.input = root.local_name().to_string();
        self.namespace = root.namespace().map(str::to_string);

        let mut declared = Vec::new();
        for (prefix, uri) in root.namespace_declarations() {
            match prefix {
                Some(prefix) => declared.push((prefix, uri)),
                None => self.default_namespace = Some(uri.to_string()),
            }
        }

        if declared
            .iter()
            .any(|(prefix, uri)| *prefix == self.envelope_prefix && *uri != SOAP_11_NS)
        {
            self.namespaces.remove(&xmlns(&self.envelope_prefix));
            let taken: Vec<&str> = declared.iter().map(|(prefix, _)| *prefix).collect();
            let moved = self.free_prefix(ENVELOPE_PREFIX, SOAP_11_NS, &taken);
            debug!(prefix = %moved, "Envelope prefix taken by body template");
            self.add_namespace(&moved, SOAP_11_NS);
            self.envelope_prefix = moved;
        }

        for (prefix, uri) in declared {
            match self.namespaces.get(&xmlns(prefix)) {
                Some(existing) if existing != uri => {
                    return Err(BusError::InvalidEnvelope(format!(
                        "body template binds prefix {:?} to {}, envelope already binds it to {}",
                        prefix, uri, existing
                    )));
                }
                _ => self.add_namespace(prefix, uri),
            }
        }

        if let Some(namespace) = self.namespace.clone() {
            let prefix = self.free_prefix(OPERATION_PREFIX, &namespace, &[]);
            self.add_namespace(&prefix, namespace);
            self.operation_prefix = prefix;
        }

        self.body = children_as_string(root)?;

        debug!(
            input = %self.input,
            namespace = ?self.namespace,
            namespaces = self.namespaces.len(),
            "Configured SOAP body"
        );
        Ok(())
    }

    /// `base`, or `base1`, `base2`, ... : the first prefix that is unbound
    /// (or already bound to `uri`) and not in `taken`.
    fn free_prefix(&self, base: &str, uri: &str, taken: &[&str]) -> String {
        let usable = |prefix: &str| {
            !taken.contains(&prefix)
                && self
                    .namespaces
                    .get(&xmlns(prefix))
                    .is_none_or(|bound| bound == uri)
        };
        if usable(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}{}", base, n))
            .find(|prefix| usable(prefix))
            .unwrap_or_else(|| base.to_string())
    }

    /// Qualified name of the operation element.
    pub fn operation_name(&self) -> String {
        match self.namespace {
            Some(_) => format!("{}:{}", self.operation_prefix, self.input),
            None => self.input.clone(),
        }
    }

    /// Render the full envelope.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let envelope = format!("{}:Envelope", self.envelope_prefix);
        let mut start = BytesStart::new(envelope.as_str());
        for (name, uri) in &self.namespaces {
            start.push_attribute((name.as_str(), uri.as_str()));
        }
        writer.write_event(Event::Start(start))?;

        if let Some(header) = &self.header {
            let name = format!("{}:Header", self.envelope_prefix);
            write_wrapped(&mut writer, BytesStart::new(name.as_str()), header)?;
        }

        let body = format!("{}:Body", self.envelope_prefix);
        writer.write_event(Event::Start(BytesStart::new(body.as_str())))?;
        if self.input.is_empty() {
            writer.get_mut().write_all(self.body.as_bytes())?;
        } else {
            let operation = self.operation_name();
            let mut start = BytesStart::new(operation.as_str());
            // Unprefixed payload children stay in the template's default namespace.
            if let Some(default) = &self.default_namespace {
                start.push_attribute(("xmlns", default.as_str()));
            }
            write_wrapped(&mut writer, start, &self.body)?;
        }
        writer.write_event(Event::End(BytesEnd::new(body.as_str())))?;
        writer.write_event(Event::End(BytesEnd::new(envelope.as_str())))?;

        String::from_utf8(writer.into_inner()).map_err(|e| BusError::XmlWrite(e.to_string()))
    }
}

// `markup` is already serialized and goes out verbatim.
fn write_wrapped<W: Write>(writer: &mut Writer<W>, start: BytesStart, markup: &str) -> Result<()> {
    let end = start.to_end().into_owned();
    writer.write_event(Event::Start(start))?;
    writer.get_mut().write_all(markup.as_bytes())?;
    writer.write_event(Event::End(end))?;
    Ok(())
}

/// Serialized child elements of `root`, concatenated in order.
pub fn children_as_string(root: &Element) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    for child in root.child_elements() {
        child.write_xml(&mut writer)?;
    }
    String::from_utf8(writer.into_inner()).map_err(|e| BusError::XmlWrite(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xpath::XPathElement;

    const GET_ACCOUNT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GetAccountRequest xmlns="urn:example">
  <accountNumber>0001</accountNumber>
  <includeHistory>true</includeHistory>
</GetAccountRequest>"#;

    #[test]
    fn test_children_become_payload() {
        let mut envelope = SoapEnvelope::new("GetAccount");
        envelope.configure_body(GET_ACCOUNT).unwrap();

        assert_eq!(envelope.input, "GetAccountRequest");
        assert_eq!(envelope.namespace.as_deref(), Some("urn:example"));
        assert_eq!(
            envelope.body,
            "<accountNumber>0001</accountNumber><includeHistory>true</includeHistory>"
        );
        assert!(!envelope.body.contains("GetAccountRequest"));
        assert!(envelope.namespaces.values().any(|uri| uri == "urn:example"));
    }

    #[test]
    fn test_prefixed_root_declarations_are_copied() {
        let body = r#"<acct:CloseAccountRequest xmlns:acct="urn:example:account" xmlns:cmn="urn:example:common">
  <acct:accountNumber>0001</acct:accountNumber>
  <cmn:reason>moved</cmn:reason>
</acct:CloseAccountRequest>"#;
        let mut envelope = SoapEnvelope::new("CloseAccount");
        envelope.configure_body(body).unwrap();

        assert_eq!(envelope.input, "CloseAccountRequest");
        assert_eq!(
            envelope.namespaces.get("xmlns:acct").map(String::as_str),
            Some("urn:example:account")
        );
        assert_eq!(
            envelope.namespaces.get("xmlns:cmn").map(String::as_str),
            Some("urn:example:common")
        );
        assert_eq!(
            envelope.namespaces.get("xmlns:wsdl").map(String::as_str),
            Some("urn:example:account")
        );
        assert!(envelope.default_namespace.is_none());
    }

    #[test]
    fn test_root_without_namespace() {
        let mut envelope = SoapEnvelope::new("Ping");
        envelope.configure_body("<Ping><echo>hi</echo></Ping>").unwrap();
        assert!(envelope.namespace.is_none());
        assert!(!envelope.namespaces.contains_key("xmlns:wsdl"));
        assert!(envelope
            .to_xml()
            .unwrap()
            .contains("<env:Body><Ping><echo>hi</echo></Ping></env:Body>"));
    }

    #[test]
    fn test_malformed_body_is_rejected() {
        let mut envelope = SoapEnvelope::new("GetAccount");
        assert!(matches!(
            envelope.configure_body("<GetAccountRequest>"),
            Err(BusError::XmlParse(_))
        ));
    }

    #[test]
    fn test_rendered_envelope_is_well_formed() {
        let mut envelope = SoapEnvelope::new("GetAccount");
        envelope.set_header(r#"<WFContext xmlns="urn:wf"><messageId>m1</messageId></WFContext>"#);
        envelope.configure_body(GET_ACCOUNT).unwrap();
        let xml = envelope.to_xml().unwrap();

        assert!(xml.contains(r#"xmlns:env="http://schemas.xmlsoap.org/soap/envelope/""#));
        assert!(xml.contains(r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#));
        assert!(xml.contains(r#"xmlns:wsdl="urn:example""#));
        assert!(xml.contains(
            r#"<env:Body><wsdl:GetAccountRequest xmlns="urn:example"><accountNumber>0001</accountNumber>"#
        ));

        let parsed = XPathElement::parse(&xml).unwrap();
        assert_eq!(parsed.find_element("Header").len(), 1);
        assert_eq!(parsed.find_element("messageId").len(), 1);
        assert_eq!(parsed.find_element("GetAccountRequest").len(), 1);
        assert_eq!(parsed.find_element("accountNumber").len(), 1);
    }

    #[test]
    fn test_body_claiming_envelope_prefix_moves_envelope_aside() {
        let mut envelope = SoapEnvelope::new("Op");
        envelope
            .configure_body(r#"<env:Op xmlns:env="urn:vendor:env"><env:x>1</env:x></env:Op>"#)
            .unwrap();
        assert_eq!(envelope.envelope_prefix, "env1");
        assert_eq!(
            envelope.namespaces.get("xmlns:env").map(String::as_str),
            Some("urn:vendor:env")
        );

        let xml = envelope.to_xml().unwrap();
        let parsed = parse_document(&xml).unwrap();
        let root = parsed.first_element().unwrap();
        assert_eq!(root.name, "env1:Envelope");
        assert_eq!(root.namespace(), Some(SOAP_11_NS));
        assert_eq!(root.attribute("xmlns:env"), Some("urn:vendor:env"));
        assert!(xml.contains("<env1:Body><wsdl:Op><env:x>1</env:x></wsdl:Op></env1:Body>"));
    }

    #[test]
    fn test_body_claiming_operation_prefix_keeps_its_namespace() {
        let mut envelope = SoapEnvelope::new("Op");
        envelope
            .configure_body(r#"<a:Op xmlns:a="urn:a" xmlns:wsdl="urn:other"><wsdl:x>1</wsdl:x></a:Op>"#)
            .unwrap();
        assert_eq!(envelope.operation_prefix, "wsdl1");
        assert_eq!(envelope.operation_name(), "wsdl1:Op");

        let xml = envelope.to_xml().unwrap();
        let parsed = parse_document(&xml).unwrap();
        let root = parsed.first_element().unwrap();
        assert_eq!(root.attribute("xmlns:wsdl"), Some("urn:other"));
        assert_eq!(root.attribute("xmlns:wsdl1"), Some("urn:a"));
        assert!(xml.contains("<wsdl1:Op><wsdl:x>1</wsdl:x></wsdl1:Op>"));
    }

    #[test]
    fn test_same_uri_on_reserved_prefix_is_kept() {
        let mut envelope = SoapEnvelope::new("Op");
        envelope
            .configure_body(&format!(
                r#"<wsdl:Op xmlns:wsdl="urn:a" xmlns:env="{}"><wsdl:x/></wsdl:Op>"#,
                SOAP_11_NS
            ))
            .unwrap();
        assert_eq!(envelope.envelope_prefix, "env");
        assert_eq!(envelope.operation_prefix, "wsdl");
        assert_eq!(envelope.namespaces.len(), 3);
    }

    #[test]
    fn test_conflicting_declared_prefix_is_rejected() {
        let mut envelope = SoapEnvelope::new("Op");
        envelope.add_namespace("bus", "urn:bus:common");
        assert!(matches!(
            envelope.configure_body(r#"<bus:Op xmlns:bus="urn:elsewhere"/>"#),
            Err(BusError::InvalidEnvelope(_))
        ));

        let mut envelope = SoapEnvelope::new("Op");
        assert!(matches!(
            envelope.configure_body(r#"<Op xmlns:xsi="urn:not-xsi"/>"#),
            Err(BusError::InvalidEnvelope(_))
        ));
    }
}

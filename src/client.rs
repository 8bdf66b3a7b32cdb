//! Top-level SOAP call entry point.
//!
//! Ties templates, header/body construction, envelope assembly and the
//! transport together. Each call reads its templates fresh and performs a
//! single blocking round trip.

use crate::builder::{build_body, build_header};
use crate::config::{BusConfig, CallProperties};
use crate::envelope::SoapEnvelope;
use crate::error::Result;
use crate::fault::FaultContainer;
use crate::template::TemplateStore;
use crate::transport::{HttpTransport, SoapRequest, SoapTransport};
use crate::xpath::XPathElement;
use std::sync::Arc;
use tracing::{debug, info};

/// SOAP bus client.
///
/// Configuration is shared read-only, so one client can serve any number of
/// sequential calls.
pub struct BusClient<T = HttpTransport> {
    config: Arc<BusConfig>,
    templates: TemplateStore,
    transport: T,
}

impl BusClient<HttpTransport> {
    /// Create a client sending over HTTP.
    pub fn new(config: Arc<BusConfig>) -> Self {
        Self::with_transport(config, HttpTransport::new())
    }
}

impl<T: SoapTransport> BusClient<T> {
    /// Create a client with a custom transport.
    pub fn with_transport(config: Arc<BusConfig>, transport: T) -> Self {
        let templates = TemplateStore::from_config(&config.templates);
        Self {
            config,
            templates,
            transport,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Header markup for `identity`.
    pub fn build_header(&self, props: &CallProperties, identity: &str) -> Result<String> {
        build_header(&self.templates, &self.config.context, props, identity)
    }

    /// Body markup after `fill` has edited the request template.
    pub fn build_body<F>(&self, props: &CallProperties, fill: F) -> Result<String>
    where
        F: FnOnce(&mut XPathElement<'static>),
    {
        build_body(&self.templates, props, fill)
    }

    /// Assemble the outgoing envelope without sending it.
    pub fn build_request<F>(
        &self,
        props: &CallProperties,
        identity: &str,
        fill: F,
    ) -> Result<SoapEnvelope>
    where
        F: FnOnce(&mut XPathElement<'static>),
    {
        let header = self.build_header(props, identity)?;
        let body = self.build_body(props, fill)?;

        let mut envelope = SoapEnvelope::new(props.action.as_str());
        for (prefix, uri) in &self.config.transport.namespaces {
            envelope.add_namespace(prefix, uri.as_str());
        }
        envelope.set_header(header);
        envelope.configure_body(&body)?;
        Ok(envelope)
    }

    /// Build, send, and wrap the response of one SOAP call.
    pub fn call<F>(&self, props: &CallProperties, identity: &str, fill: F) -> Result<FaultContainer>
    where
        F: FnOnce(&mut XPathElement<'static>),
    {
        let envelope = self.build_request(props, identity, fill)?;
        let request = SoapRequest {
            end_point: props.end_point.clone(),
            action: props.action.clone(),
            xml: envelope.to_xml()?,
            read_timeout: props.effective_read_timeout(&self.config.transport),
        };

        info!(
            end_point = %request.end_point,
            action = %request.action,
            operation = %envelope.input,
            "Calling SOAP service"
        );

        let raw = self.transport.send(&request)?;
        debug!(bytes = raw.len(), "Parsing SOAP response");

        let mut container = FaultContainer::new(XPathElement::parse(&raw)?);
        container.request_url = Some(request.end_point);
        container.request = Some(request.xml);

        if container.is_fault() {
            info!(
                action = %props.action,
                fault_code = ?container.fault_code(),
                "SOAP call returned a fault"
            );
        }
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::error::BusError;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::TempDir;

    struct CannedTransport {
        response: String,
        sent: RefCell<Vec<SoapRequest>>,
    }

    impl SoapTransport for CannedTransport {
        fn send(&self, request: &SoapRequest) -> Result<String> {
            self.sent.borrow_mut().push(request.clone());
            Ok(self.response.clone())
        }
    }

    fn setup(response: &str) -> (TempDir, BusClient<CannedTransport>) {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("wf_context_2007.xml"),
            "<WFContext><messageId/><initiator><initiatorId/><initiatorIdType/></initiator></WFContext>",
        )
        .unwrap();
        fs::write(
            dir.path().join("get_account.xml"),
            r#"<GetAccountRequest xmlns="urn:example"><accountNumber/></GetAccountRequest>"#,
        )
        .unwrap();

        let mut config = BusConfig::default();
        config.templates.load_paths = vec![dir.path().to_path_buf()];
        config.context = ContextConfig {
            batch_process_identity: "BATCH01".to_string(),
            host_name: Some("test-host".to_string()),
            ..Default::default()
        };
        let transport = CannedTransport {
            response: response.to_string(),
            sent: RefCell::new(Vec::new()),
        };
        (dir, BusClient::with_transport(Arc::new(config), transport))
    }

    fn props() -> CallProperties {
        CallProperties {
            end_point: "http://bus.example.com/AccountService".to_string(),
            action: "GetAccount".to_string(),
            request: "get_account.xml".to_string(),
            wf_context_version: "2007".to_string(),
            read_timeout: Some(7),
        }
    }

    #[test]
    fn test_call_attaches_request_details() {
        let (_dir, client) = setup("<Envelope><Body><ok/></Body></Envelope>");
        let container = client
            .call(&props(), "U999", |doc| {
                doc.root_mut().unwrap().set_text("accountNumber", "0001");
            })
            .unwrap();

        assert!(!container.is_fault());
        assert_eq!(
            container.request_url.as_deref(),
            Some("http://bus.example.com/AccountService")
        );

        let sent = client.transport().sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].action, "GetAccount");
        assert_eq!(sent[0].read_timeout, Some(std::time::Duration::from_secs(7)));
        assert_eq!(container.request.as_deref(), Some(sent[0].xml.as_str()));
        assert!(sent[0].xml.contains("<accountNumber>0001</accountNumber>"));
    }

    #[test]
    fn test_malformed_response_is_error() {
        let (_dir, client) = setup("<html><body>Service Unavailable");
        assert!(matches!(
            client.call(&props(), "U999", |_| {}),
            Err(BusError::XmlParse(_))
        ));
    }

    #[test]
    fn test_missing_body_template_sends_nothing() {
        let (_dir, client) = setup("<ok/>");
        let props = CallProperties {
            request: "close_account.xml".to_string(),
            ..props()
        };
        assert!(matches!(
            client.call(&props, "U999", |_| {}),
            Err(BusError::TemplateNotFound { .. })
        ));
        assert!(client.transport().sent.borrow().is_empty());
    }
}

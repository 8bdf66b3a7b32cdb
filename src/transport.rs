//! Wire transport for assembled SOAP requests.

use crate::error::{BusError, Result};
use std::time::Duration;
use tracing::debug;
use ureq::Agent;

/// A fully assembled request ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequest {
    /// Target endpoint URL
    pub end_point: String,
    /// SOAP action
    pub action: String,
    /// Envelope markup
    pub xml: String,
    /// Response read timeout
    pub read_timeout: Option<Duration>,
}

/// Sends a request and returns the raw response text.
///
/// Implementations do not retry; failures go straight back to the caller.
pub trait SoapTransport {
    fn send(&self, request: &SoapRequest) -> Result<String>;
}

/// Blocking HTTP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

impl HttpTransport {
    pub fn new() -> Self {
        Self
    }
}

/// `SOAPAction` header value: the action in double quotes.
pub fn soap_action_header(action: &str) -> String {
    format!(r#""{}""#, action.trim().trim_matches('"'))
}

impl SoapTransport for HttpTransport {
    fn send(&self, request: &SoapRequest) -> Result<String> {
        // SOAP faults come back as HTTP 500; read the body regardless of status.
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_recv_response(request.read_timeout)
            .timeout_recv_body(request.read_timeout)
            .build();
        let agent: Agent = config.into();

        let mut response = agent
            .post(&request.end_point)
            .header("Content-Type", r#"text/xml; charset="utf-8""#)
            .header("SOAPAction", soap_action_header(&request.action).as_str())
            .send(request.xml.as_bytes())
            .map_err(|e| {
                BusError::Transport(format!("POST {} failed: {}", request.end_point, e))
            })?;

        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| BusError::Transport(format!("failed to read response body: {}", e)))?;

        debug!(
            end_point = %request.end_point,
            status = %status,
            bytes = body.len(),
            "Received SOAP response"
        );
        Ok(body)
    }
}

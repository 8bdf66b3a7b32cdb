//! Response wrapper for SOAP fault inspection.

use crate::error::Result;
use crate::xpath::{ElementValue, LocationMap, XPathElement};
use std::sync::Arc;

/// Accessors every fault container understands.
pub fn fault_locations() -> LocationMap {
    LocationMap::new()
        .with("fault_code", "Fault", "faultcode")
        .with("fault_string", "Fault", "faultstring")
        .with("fault_actor", "Fault", "faultactor")
        .with("fault_detail", "Fault", "detail")
}

/// A parsed response plus the request that produced it.
#[derive(Debug)]
pub struct FaultContainer {
    response: XPathElement<'static>,
    /// Endpoint the request was sent to
    pub request_url: Option<String>,
    /// Serialized outgoing envelope
    pub request: Option<String>,
}

impl FaultContainer {
    /// Wrap a parsed response. Accessors already attached to the response
    /// stay available next to the fault accessors.
    pub fn new(mut response: XPathElement<'static>) -> Self {
        let mut locations = fault_locations();
        if let Some(existing) = response.locations() {
            locations.merge(existing);
        }
        response.set_locations(Arc::new(locations));
        Self {
            response,
            request_url: None,
            request: None,
        }
    }

    pub fn response(&self) -> &XPathElement<'static> {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut XPathElement<'static> {
        &mut self.response
    }

    /// Whether the response carries a `Fault` element.
    pub fn is_fault(&self) -> bool {
        !self.response.find_element("Fault").is_absent()
    }

    pub fn fault_code(&self) -> Option<String> {
        self.first_text("fault_code")
    }

    pub fn fault_string(&self) -> Option<String> {
        self.first_text("fault_string")
    }

    pub fn fault_actor(&self) -> Option<String> {
        self.first_text("fault_actor")
    }

    /// Read any accessor known to the response.
    pub fn read(&self, accessor: &str) -> Result<ElementValue> {
        self.response.read(accessor)
    }

    fn first_text(&self, accessor: &str) -> Option<String> {
        self.read(accessor)
            .ok()
            .and_then(|value| value.into_list().into_iter().next())
    }
}

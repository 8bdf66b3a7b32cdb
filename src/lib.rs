//! Template-driven SOAP client.
//!
//! Loads XML templates, fills them with runtime values, and submits them as
//! SOAP header and body to a remote endpoint. The response comes back wrapped
//! for fault inspection.
//!
//! # Features
//!
//! - Namespace-agnostic navigation and editing of XML by local name
//! - Placeholder expansion: one template element becomes N siblings
//! - Named accessors resolved through an explicit location table
//! - WFContext header construction for the 2007 and older context layouts
//! - Envelope reshaping of request templates into a SOAP 1.1 body
//!
//! # Example
//!
//! ```ignore
//! use soap_bus_client::{BusClient, BusConfig, CallProperties};
//! use std::sync::Arc;
//!
//! let client = BusClient::new(Arc::new(BusConfig::load("config.yaml")?));
//! let response = client.call(&props, "X123", |doc| {
//!     if let Some(mut root) = doc.root_mut() {
//!         root.set_text("accountNumber", "0001");
//!         root.clone_with_text_values("initiator", &["A1", "A2"]);
//!     }
//! })?;
//! if response.is_fault() {
//!     eprintln!("{:?}", response.fault_string());
//! }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod parser;
pub mod template;
pub mod transport;
pub mod xpath;

pub use client::BusClient;
pub use config::{BusConfig, CallProperties};
pub use envelope::SoapEnvelope;
pub use error::{BusError, Result};
pub use fault::FaultContainer;
pub use template::TemplateStore;
pub use transport::{HttpTransport, SoapRequest, SoapTransport};
pub use xpath::{ElementValue, ElementView, Location, LocationMap, Lookup, XPathElement};

//! Error types for the SOAP bus client.

use std::path::PathBuf;
use thiserror::Error;

/// SOAP bus client errors.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("No {filename} template found in load path {search_path:?}")]
    TemplateNotFound {
        filename: String,
        search_path: Vec<PathBuf>,
    },

    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("XML serialization error: {0}")]
    XmlWrite(String),

    #[error("Unknown element accessor: {0}")]
    UnknownAccessor(String),

    #[error("Invalid SOAP envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for BusError {
    fn from(err: quick_xml::Error) -> Self {
        Self::XmlParse(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for BusError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::XmlParse(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BusError>;

//! Error types for the SDMX collector

use thiserror::Error;

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Errors raised while fetching, interpreting, or publishing SDMX feeds
#[derive(Error, Debug)]
pub enum CollectorError {
    /// The source answered with a non-200 status
    #[error("Request to {url} failed with status {status}: {body}")]
    Request {
        url: String,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required structural element is missing or unsupported
    #[error("Structural error: {0}")]
    Structural(String),

    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    /// The dataflow lookup validating a registration failed
    #[error("Cannot register {resource} provided by {agency}: {source}")]
    Registration {
        agency: String,
        resource: String,
        #[source]
        source: Box<CollectorError>,
    },

    #[error("Registry error: {0}")]
    Store(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] sdmx_common::CommonError),
}

impl From<roxmltree::Error> for CollectorError {
    fn from(err: roxmltree::Error) -> Self {
        CollectorError::Xml(err.to_string())
    }
}

impl From<quick_xml::Error> for CollectorError {
    fn from(err: quick_xml::Error) -> Self {
        CollectorError::Xml(err.to_string())
    }
}

impl CollectorError {
    pub(crate) fn structural(msg: impl Into<String>) -> Self {
        CollectorError::Structural(msg.into())
    }
}

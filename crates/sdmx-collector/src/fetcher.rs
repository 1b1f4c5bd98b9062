//! HTTP access to SDMX web services
//!
//! One GET per call, with a bounded timeout. Non-200 answers become
//! [`CollectorError::Request`]; bodies are dispatched to an XML or JSON
//! payload according to the response `Content-Type`.

use crate::error::{CollectorError, Result};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// `Accept` header for structure-specific data messages
pub const ACCEPT_SPECIFIC_DATA: &str =
    "application/vnd.sdmx.structurespecificdata+xml;version=2.1";

/// `Accept` header for generic data messages
pub const ACCEPT_GENERIC_DATA: &str = "application/vnd.sdmx.genericdata+xml;version=2.1";

/// Media types parsed as XML (compared on the essence, parameters ignored)
const XML_MEDIA_TYPES: &[&str] = &[
    "application/xml",
    "text/xml",
    "application/vnd.sdmx.structure+xml",
    "application/vnd.sdmx.structurespecificdata+xml",
    "application/vnd.sdmx.genericdata+xml",
    "application/vnd.sdmx.generic+xml",
    "application/vnd.sdmx.compactdata+xml",
];

const JSON_MEDIA_TYPE: &str = "application/json";

/// Parsed-enough response body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw XML text, parsed by the structure or observation extractor
    Xml(String),
    Json(serde_json::Value),
}

impl Payload {
    /// XML text, or a structural error naming `what` was expected
    pub fn into_xml(self, what: &str) -> Result<String> {
        match self {
            Payload::Xml(text) => Ok(text),
            Payload::Json(_) => Err(CollectorError::structural(format!(
                "expected an XML {what} message, got JSON"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFormat {
    Xml,
    Json,
}

fn classify(content_type: Option<&str>) -> Result<BodyFormat> {
    let raw = content_type.unwrap_or_default();
    let essence = raw
        .parse::<mime::Mime>()
        .map(|m| m.essence_str().to_ascii_lowercase())
        .unwrap_or_else(|_| raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());

    if XML_MEDIA_TYPES.contains(&essence.as_str()) {
        Ok(BodyFormat::Xml)
    } else if essence == JSON_MEDIA_TYPE {
        Ok(BodyFormat::Json)
    } else {
        Err(CollectorError::UnsupportedContentType(raw.to_string()))
    }
}

/// HTTP settings for [`WireFetcher`]
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: concat!("sdmx-collector/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Thin GET client shared by every session
#[derive(Debug, Clone)]
pub struct WireFetcher {
    client: Client,
}

impl WireFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        if config.timeout.is_zero() {
            return Err(CollectorError::Config("request timeout must be greater than 0".into()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }

    /// GET `url`, validate the status, and parse the body by content type.
    pub async fn get(&self, url: &str, accept: Option<&str>) -> Result<Payload> {
        debug!(url, accept, "GET");

        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }
        let response = request.send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::Request {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match classify(content_type.as_deref())? {
            BodyFormat::Xml => Ok(Payload::Xml(response.text().await?)),
            BodyFormat::Json => Ok(Payload::Json(response.json().await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_xml_types() {
        assert_eq!(classify(Some("application/xml")).unwrap(), BodyFormat::Xml);
        assert_eq!(
            classify(Some("application/vnd.sdmx.structure+xml; version=2.1")).unwrap(),
            BodyFormat::Xml
        );
        assert_eq!(classify(Some("text/xml;charset=UTF-8")).unwrap(), BodyFormat::Xml);
    }

    #[test]
    fn test_classify_json() {
        assert_eq!(classify(Some("application/json")).unwrap(), BodyFormat::Json);
    }

    #[test]
    fn test_classify_unsupported() {
        assert!(matches!(
            classify(Some("text/html")),
            Err(CollectorError::UnsupportedContentType(_))
        ));
        assert!(matches!(classify(None), Err(CollectorError::UnsupportedContentType(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = FetchConfig {
            timeout: Duration::ZERO,
            ..FetchConfig::default()
        };
        assert!(matches!(WireFetcher::new(&config), Err(CollectorError::Config(_))));
    }

    #[test]
    fn test_json_payload_is_not_xml() {
        let payload = Payload::Json(serde_json::json!({}));
        assert!(payload.into_xml("structure").is_err());
    }
}

use std::time::Duration;

use log::debug;
use reqwest::{header, StatusCode};
use thiserror::Error;
use xmltree::Element;

use crate::{
    constants::{FOTA_BASE_URL, USER_AGENT},
    fus::to_utf8_or_error_string,
};

/// The metadata document is small, so fail fast if the server stalls.
const FETCH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("Model or region not found")]
    NotFound,
    #[error("No firmware available")]
    NoFirmware,
    #[error("Unexpected HTTP {0}")]
    BadHttpResponse(StatusCode),
    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("XML parse error: {0}")]
    XmlParseError(#[from] xmltree::ParseError),
}

/// Normalize a `<pda>/<csc>/<phone>/<data>` version string:
/// * `A/B/C` becomes `A/B/C/A`
/// * an empty third component is replaced by the first (`A/B/` becomes `A/B/A`)
/// * anything else is returned unchanged
pub fn normalize_version(version: &str) -> String {
    let mut pieces: Vec<&str> = version.split('/').collect();

    if pieces.len() >= 3 {
        if pieces[2].is_empty() {
            pieces[2] = pieces[0];
        } else if pieces.len() == 3 {
            pieces.push(pieces[0]);
        }
    }

    pieces.join("/")
}

/// A firmware version offered as an upgrade.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FirmwareSpec {
    pub version: String,
    /// Size in bytes or 0 if the server did not say
    pub size: u64,
}

/// Contents of a `version.xml` metadata document. All version strings are
/// normalized.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VersionInfo {
    pub latest: Option<String>,
    pub upgrades: Vec<FirmwareSpec>,
}

impl VersionInfo {
    pub fn parse(data: &[u8]) -> Result<Self, VersionError> {
        let root = Element::parse(data)?;
        let version = root.get_child("firmware")
            .and_then(|e| e.get_child("version"));

        let latest = version
            .and_then(|e| e.get_child("latest"))
            .and_then(|e| e.get_text())
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty())
            .map(|t| normalize_version(&t));

        let upgrades = version
            .and_then(|e| e.get_child("upgrade"))
            .map(|upgrade| {
                upgrade.children.iter()
                    .filter_map(|n| n.as_element())
                    .filter(|e| e.name == "value")
                    .map(|e| FirmwareSpec {
                        version: normalize_version(
                            e.get_text().unwrap_or_default().trim()),
                        size: e.attributes.get("fwsize")
                            .and_then(|s| s.trim().parse().ok())
                            .unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            latest,
            upgrades,
        })
    }
}

/// Client for the FOTA server's `version.xml` metadata. This is independent
/// of the FUS session.
pub struct VersionClient {
    client: reqwest::Client,
    base_url: String,
}

impl VersionClient {
    pub fn new(ignore_tls_validation: bool) -> Result<Self, VersionError> {
        let client = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(ignore_tls_validation)
            .timeout(FETCH_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: FOTA_BASE_URL.to_owned(),
        })
    }

    /// Override the FOTA host.
    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_owned();
        self
    }

    fn document_url(&self, model: &str, region: &str) -> String {
        format!("{}/firmware/{region}/{model}/version.xml", self.base_url)
    }

    async fn fetch_document(&self, model: &str, region: &str) -> Result<Vec<u8>, VersionError> {
        let url = self.document_url(model, region);
        debug!("FOTA URL: {url}");

        let r = self.client.get(&url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = r.status();
        // The FOTA server returns 403 when the page is not found
        if status == StatusCode::FORBIDDEN {
            return Err(VersionError::NotFound);
        } else if status.is_client_error() || status.is_server_error() {
            return Err(VersionError::BadHttpResponse(status));
        }

        let data = r.bytes().await?;
        debug!("FOTA response: {:?}", to_utf8_or_error_string(&data));

        Ok(data.to_vec())
    }

    /// Get the latest version and the available upgrades for a given model
    /// number and CSC region code.
    pub async fn fetch_info(&self, model: &str, region: &str) -> Result<VersionInfo, VersionError> {
        let data = self.fetch_document(model, region).await?;
        VersionInfo::parse(&data)
    }

    /// Get the latest available firmware version for a given model number and
    /// CSC region code.
    pub async fn latest_version(&self, model: &str, region: &str) -> Result<String, VersionError> {
        self.fetch_info(model, region).await?
            .latest
            .ok_or(VersionError::NoFirmware)
    }
}

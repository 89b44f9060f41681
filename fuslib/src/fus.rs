use crate::{
    auth::{Nonce, Session},
    constants::{
        BINARY_DOWNLOAD_PATH, BINARY_INFORM_PATH, BINARY_INIT_PATH, DOWNLOAD_BASE_URL,
        FUS_BASE_URL, NONCE_HEADER, NONCE_PATH, SESSION_COOKIE, USER_AGENT,
    },
    crypto::{CryptoError, FusKeys},
    message::ProtocolMessage,
};

use std::{
    borrow::Cow,
    path::Path,
    str,
};

use base64::{
    Engine,
    engine::general_purpose::STANDARD,
};
use bytes::Bytes;
use futures_core::Stream;
use log::debug;
use reqwest::{
    header::{self, AUTHORIZATION, COOKIE, RANGE},
    Request, Response, StatusCode,
};
use thiserror::Error;
use xmltree::Element;

const NON_UTF8_MSG: &str = "[Non-UTF-8 data]";

pub(crate) fn to_utf8_or_error_string(data: &[u8]) -> &str {
    str::from_utf8(data).unwrap_or(NON_UTF8_MSG)
}

#[derive(Debug, Error)]
pub enum FusError {
    #[error("Server did not provide a nonce value")]
    NonceNotFound,
    #[error("Nonce is not exactly 16 bytes (got {0})")]
    NonceInvalidSize(usize),
    #[error("The requested firmware could not be found")]
    FirmwareNotFound,
    #[error("Expected HTTP {0}, but got HTTP {1}")]
    BadHttpResponse(StatusCode, StatusCode),
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        status: StatusCode,
        body: String,
    },
    #[error("Received unsuccessful FUS response: {0}")]
    FusBadResponse(String),
    #[error("Could not find field '{0}' in FUS response")]
    FusMissingField(String),
    #[error("Could not parse the value for field '{0}': '{1}'")]
    FusBadField(String, String),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
    #[error("Failed to decode base64 data: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),
    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("XML parse error: {0}")]
    XmlParseError(#[from] xmltree::ParseError),
    #[error("XML error: {0}")]
    XmlError(#[from] xmltree::Error),
}

/// Location and decryption inputs for a firmware binary, as returned by a
/// binary inform request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BinaryInfo {
    /// Firmware download path component
    pub path: String,
    /// Firmware filename. Guaranteed to have no directory component
    pub filename: String,
    /// Firmware size in bytes
    pub size: u64,
    /// Firmware version the server resolved the request to
    pub latest_version: Option<String>,
    /// Logic value used to derive the v4 decryption key
    pub logic_value_factory: Option<String>,
}

impl BinaryInfo {
    /// Interpret a binary inform response. The FUS status must be 200.
    pub fn from_response(root: &Element) -> Result<Self, FusError> {
        check_fus_status(root)?;

        let binary_name = get_fus_field(root, "BINARY_NAME")
            .filter(|s| !s.is_empty())
            .ok_or(FusError::FirmwareNotFound)?;
        let filename = Path::new(&*binary_name)
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| FusError::FusBadField(
                "BINARY_NAME".to_owned(), binary_name.to_string()))?
            .to_owned();

        let size = get_fus_field(root, "BINARY_BYTE_SIZE")
            .ok_or_else(|| FusError::FusMissingField("BINARY_BYTE_SIZE".to_owned()))?;
        let size: u64 = size.trim().parse()
            .map_err(|_| FusError::FusBadField("BINARY_BYTE_SIZE".to_owned(), size.to_string()))?;

        let path = get_fus_field(root, "MODEL_PATH")
            .ok_or_else(|| FusError::FusMissingField("MODEL_PATH".to_owned()))?
            .to_string();

        Ok(Self {
            path,
            filename,
            size,
            latest_version: get_elem_text(root, &["FUSBody", "Results", "LATEST_FW_VERSION", "Data"])
                .map(|s| s.to_string()),
            logic_value_factory: get_fus_field(root, "LOGIC_VALUE_FACTORY")
                .map(|s| s.to_string()),
        })
    }

    /// Full path of the binary on the download server.
    pub fn remote_path(&self) -> String {
        format!("{}{}", self.path, self.filename)
    }
}

fn get_elem_text<'a>(elem: &'a Element, path: &[&str]) -> Option<Cow<'a, str>> {
    let mut result = Some(elem);

    for p in path {
        result = result.and_then(|e| e.get_child(*p));
    }

    result.map(|e| e.get_text().unwrap_or(Cow::Borrowed("")))
}

fn get_fus_field<'a>(elem: &'a Element, field: &str) -> Option<Cow<'a, str>> {
    get_elem_text(elem, &["FUSBody", "Put", field, "Data"])
}

/// HTTP 200 does not mean success. The FUS status code in the body must also
/// be 200.
fn check_fus_status(root: &Element) -> Result<(), FusError> {
    let status = get_elem_text(root, &["FUSBody", "Results", "Status"])
        .ok_or_else(|| FusError::FusBadResponse("Missing FUS status field".to_owned()))?;

    if status.trim() != "200" {
        return Err(FusError::FusBadResponse(status.to_string()));
    }

    Ok(())
}

/// Builder type for creating FUS clients with non-default behavior.
#[derive(Clone)]
pub struct FusClientBuilder {
    keys: FusKeys,
    ignore_tls_validation: bool,
    fus_base_url: String,
    download_base_url: String,
}

impl FusClientBuilder {
    pub fn new(keys: FusKeys) -> Self {
        Self {
            keys,
            ignore_tls_validation: false,
            fus_base_url: FUS_BASE_URL.to_owned(),
            download_base_url: DOWNLOAD_BASE_URL.to_owned(),
        }
    }

    /// Ignore TLS certificate validation when performing HTTPS requests. By
    /// default, TLS certificate validation is enabled.
    pub fn ignore_tls_validation(mut self, value: bool) -> Self {
        self.ignore_tls_validation = value;
        self
    }

    /// Override the XML API host.
    pub fn fus_base_url(mut self, url: &str) -> Self {
        self.fus_base_url = url.trim_end_matches('/').to_owned();
        self
    }

    /// Override the binary download host.
    pub fn download_base_url(mut self, url: &str) -> Self {
        self.download_base_url = url.trim_end_matches('/').to_owned();
        self
    }

    /// Build an unauthenticated FUS client. This function fails if the TLS
    /// backend fails to initialize.
    pub fn build(&self) -> Result<FusClient, FusError> {
        FusClient::with_options(self)
    }

    /// Build a FUS client and perform the bootstrap request so that it holds
    /// a signed nonce.
    pub async fn connect(&self) -> Result<FusClient, FusError> {
        let mut client = self.build()?;
        client.bootstrap().await?;
        Ok(client)
    }
}

/// Type for interacting with the FUS service. A client holds mutable session
/// state and must only be used for one request at a time.
#[derive(Debug)]
pub struct FusClient {
    client: reqwest::Client,
    keys: FusKeys,
    session: Session,
    fus_base_url: String,
    download_base_url: String,
}

impl FusClient {
    /// Build a new FUS client object with the options from the specified
    /// builder.
    fn with_options(options: &FusClientBuilder) -> Result<Self, FusError> {
        debug!("TLS validation enabled: {}", !options.ignore_tls_validation);

        // The session cookie is tracked manually as part of the session state
        let client = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(options.ignore_tls_validation)
            .referer(false)
            .build()?;

        Ok(Self {
            client,
            keys: options.keys.clone(),
            session: Session::new(),
            fus_base_url: options.fus_base_url.clone(),
            download_base_url: options.download_base_url.clone(),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The current nonce. Fails if the client never received one.
    pub fn nonce(&self) -> Result<Nonce, FusError> {
        self.session.nonce().ok_or(FusError::NonceNotFound)
    }

    /// Perform the unauthenticated request whose only purpose is to receive
    /// the first nonce.
    pub async fn bootstrap(&mut self) -> Result<(), FusError> {
        debug!("Requesting nonce");

        self.send(NONCE_PATH, Vec::new()).await?;

        if !self.session.is_authenticated() {
            return Err(FusError::NonceNotFound);
        }

        Ok(())
    }

    fn api_request(&self, path: &str, body: Vec<u8>) -> Result<Request, FusError> {
        let url = format!("{}/{}", self.fus_base_url, path);
        debug!("FUS URL: {url}");

        let mut builder = self.client.post(&url)
            .header(AUTHORIZATION, self.session.api_authorization().to_string())
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::CONTENT_LENGTH, body.len())
            .body(body);

        if let Some(cookie) = self.session.cookie() {
            builder = builder.header(COOKIE, format!("{SESSION_COOKIE}={cookie}"));
        }

        Ok(builder.build()?)
    }

    fn download_request(&self, remote_path: &str, start: u64) -> Result<Request, FusError> {
        // This intentionally does not use RequestBuilder.query() because FUS
        // returns HTTP 405 if the requested filename is URL-encoded.
        let url = format!("{}/{}?file={}", self.download_base_url, BINARY_DOWNLOAD_PATH, remote_path);
        debug!("Requesting bytes {start}- from: {url}");

        let mut builder = self.client.get(&url)
            .header(AUTHORIZATION, self.session.download_authorization().to_string())
            .header(header::USER_AGENT, USER_AGENT);

        if start > 0 {
            builder = builder.header(RANGE, format!("bytes={start}-"));
        }

        Ok(builder.build()?)
    }

    /// Save the nonce and session cookie from a response, if present. This
    /// happens regardless of the status code.
    fn update_session(&mut self, response: &Response) -> Result<(), FusError> {
        if let Some(value) = response.headers().get(NONCE_HEADER) {
            let encrypted = value.to_str()
                .map_err(|_| FusError::FusBadField(NONCE_HEADER.to_owned(),
                    to_utf8_or_error_string(value.as_bytes()).to_owned()))?;
            self.session.rotate_nonce(&self.keys, encrypted)?;
        }

        for cookie in response.cookies() {
            if cookie.name() == SESSION_COOKIE {
                debug!("Received session cookie");
                self.session.set_cookie(cookie.value());
            }
        }

        Ok(())
    }

    /// POST a request body to the XML API and return the raw response body.
    /// The Authorization header and session cookie are filled in from the
    /// session, which is updated from the response.
    pub async fn send(&mut self, path: &str, body: Vec<u8>) -> Result<Bytes, FusError> {
        debug!("FUS request: {:?}", to_utf8_or_error_string(&body));

        let request = self.api_request(path, body)?;
        let r = self.client.execute(request).await?;
        let status = r.status();
        let session_result = self.update_session(&r);
        let data = r.bytes().await?;

        debug!("FUS response: {:?}", to_utf8_or_error_string(&data));

        // The HTTP status is the more useful error
        if status.is_client_error() || status.is_server_error() {
            if let Err(e) = session_result {
                debug!("Ignoring session update failure: {e}");
            }

            return Err(FusError::HttpStatus {
                status,
                body: to_utf8_or_error_string(&data).to_owned(),
            });
        }

        session_result?;

        Ok(data)
    }

    /// Send a protocol message and parse the XML response, interpreting the
    /// FUS status code.
    pub async fn send_message(
        &mut self,
        path: &str,
        msg: &ProtocolMessage,
    ) -> Result<Element, FusError> {
        let data = self.send(path, msg.to_xml()?).await?;
        let root = Element::parse(data.as_ref())?;

        check_fus_status(&root)?;

        Ok(root)
    }

    /// Ask the server about a specific firmware version for the given device.
    pub async fn binary_inform(
        &mut self,
        version: &str,
        model: &str,
        region: &str,
        device_id: &str,
    ) -> Result<BinaryInfo, FusError> {
        let nonce = self.nonce()?;
        let msg = ProtocolMessage::binary_inform(version, model, region, device_id, &nonce);
        let root = self.send_message(BINARY_INFORM_PATH, &msg).await?;

        BinaryInfo::from_response(&root)
    }

    /// Inform the server of the intention to download a binary.
    pub async fn binary_init(&mut self, filename: &str) -> Result<(), FusError> {
        let nonce = self.nonce()?;
        let msg = ProtocolMessage::binary_init(filename, &nonce);
        self.send_message(BINARY_INIT_PATH, &msg).await?;

        Ok(())
    }

    /// Start downloading a binary from the specified byte offset until the end
    /// of the file.
    pub async fn download_range(
        &mut self,
        remote_path: &str,
        start: u64,
    ) -> Result<FirmwareDownload, FusError> {
        let request = self.download_request(remote_path, start)?;
        let r = self.client.execute(request).await?;
        let status = r.status();

        if status.is_client_error() || status.is_server_error() {
            let data = r.bytes().await?;
            return Err(FusError::HttpStatus {
                status,
                body: to_utf8_or_error_string(&data).to_owned(),
            });
        }

        // Appending a full response to a partial file would corrupt it
        if start > 0 && status != StatusCode::PARTIAL_CONTENT {
            return Err(FusError::BadHttpResponse(StatusCode::PARTIAL_CONTENT, status));
        }

        Ok(FirmwareDownload { response: r })
    }
}

/// An in-progress binary download.
pub struct FirmwareDownload {
    response: Response,
}

impl FirmwareDownload {
    /// Digest from the base64-encoded `Content-MD5` header, if the server sent
    /// a valid one.
    pub fn content_md5(&self) -> Option<Vec<u8>> {
        let value = self.response.headers().get("Content-MD5")?;
        STANDARD.decode(value.as_bytes()).ok()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    pub fn into_stream(self) -> impl Stream<Item = reqwest::Result<Bytes>> {
        self.response.bytes_stream()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::test_server::{Reply, TestServer};

    use super::*;

    const NONCE_ABCD: &str = "DF4BnMBex58RaD+zhct36UWHDkFzVmbgsxZEE9YnkZc=";
    const NONCE_TESTING: &str = "fHjkAlCGbudbxoelCcnIQvXqUrK/etvhECOQY8xID+s=";

    const BINARY_INFORM_RESPONSE: &str = concat!(
        "<FUSMsg><FUSHdr><ProtoVer>1.0</ProtoVer></FUSHdr><FUSBody>",
        "<Results><Status>200</Status>",
        "<LATEST_FW_VERSION><Data>S928BXXU1AXA1/S928BOXM1AXA1/S928BXXU1AXA1/S928BXXU1AXA1</Data></LATEST_FW_VERSION>",
        "</Results>",
        "<Put>",
        "<BINARY_NAME><Data>SM-S928B_1_20240101123456_abcdefghij_fac.zip.enc4</Data></BINARY_NAME>",
        "<BINARY_BYTE_SIZE><Data>9876543210</Data></BINARY_BYTE_SIZE>",
        "<MODEL_PATH><Data>/neofus/9/</Data></MODEL_PATH>",
        "<LOGIC_VALUE_FACTORY><Data>ABCDEFGHIJKLMNOP</Data></LOGIC_VALUE_FACTORY>",
        "</Put></FUSBody></FUSMsg>",
    );

    fn authenticated_client() -> FusClient {
        let mut client = FusClientBuilder::new(FusKeys::default())
            .fus_base_url("https://fus.example.com/")
            .download_base_url("http://dl.example.com")
            .build()
            .unwrap();
        client.session
            .rotate_nonce(&client.keys, NONCE_ABCD)
            .unwrap();
        client
    }

    fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
        request.headers().get(name).map(|v| v.to_str().unwrap())
    }

    #[test]
    fn test_binary_info_from_response() {
        let root = Element::parse(BINARY_INFORM_RESPONSE.as_bytes()).unwrap();
        let info = BinaryInfo::from_response(&root).unwrap();

        assert_eq!(info, BinaryInfo {
            path: "/neofus/9/".to_owned(),
            filename: "SM-S928B_1_20240101123456_abcdefghij_fac.zip.enc4".to_owned(),
            size: 9876543210,
            latest_version: Some("S928BXXU1AXA1/S928BOXM1AXA1/S928BXXU1AXA1/S928BXXU1AXA1".to_owned()),
            logic_value_factory: Some("ABCDEFGHIJKLMNOP".to_owned()),
        });
        assert_eq!(info.remote_path(), "/neofus/9/SM-S928B_1_20240101123456_abcdefghij_fac.zip.enc4");
    }

    #[test]
    fn test_binary_info_errors() {
        let bad_status = BINARY_INFORM_RESPONSE.replace("<Status>200</Status>", "<Status>408</Status>");
        let root = Element::parse(bad_status.as_bytes()).unwrap();
        assert_matches!(BinaryInfo::from_response(&root), Err(FusError::FusBadResponse(s)) if s == "408");

        let no_name = BINARY_INFORM_RESPONSE.replace(
            "SM-S928B_1_20240101123456_abcdefghij_fac.zip.enc4", "");
        let root = Element::parse(no_name.as_bytes()).unwrap();
        assert_matches!(BinaryInfo::from_response(&root), Err(FusError::FirmwareNotFound));

        let bad_size = BINARY_INFORM_RESPONSE.replace("9876543210", "big");
        let root = Element::parse(bad_size.as_bytes()).unwrap();
        assert_matches!(BinaryInfo::from_response(&root), Err(FusError::FusBadField(f, _)) if f == "BINARY_BYTE_SIZE");

        let root = Element::parse("<FUSMsg><FUSBody/></FUSMsg>".as_bytes()).unwrap();
        assert_matches!(BinaryInfo::from_response(&root), Err(FusError::FusBadResponse(_)));
    }

    #[test]
    fn test_binary_info_strips_directories() {
        let with_dir = BINARY_INFORM_RESPONSE.replace(
            "<Data>SM-S928B_1", "<Data>../../SM-S928B_1");
        let root = Element::parse(with_dir.as_bytes()).unwrap();
        let info = BinaryInfo::from_response(&root).unwrap();
        assert_eq!(info.filename, "SM-S928B_1_20240101123456_abcdefghij_fac.zip.enc4");
    }

    #[test]
    fn test_unauthenticated_api_request() {
        let client = FusClientBuilder::new(FusKeys::default())
            .fus_base_url("https://fus.example.com")
            .build()
            .unwrap();
        assert_matches!(client.nonce(), Err(FusError::NonceNotFound));

        let request = client.api_request(NONCE_PATH, Vec::new()).unwrap();
        assert_eq!(request.method(), &reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "https://fus.example.com/NF_DownloadGenerateNonce.do");
        assert_eq!(header(&request, "authorization"),
                   Some(r#"FUS nonce="", signature="", nc="", type="", realm="", newauth="1""#));
        assert_eq!(header(&request, "user-agent"), Some("Kies2.0_FUS"));
        assert_eq!(header(&request, "cookie"), None);
    }

    #[test]
    fn test_authenticated_api_request() {
        let mut client = authenticated_client();
        client.session.set_cookie("abc123");

        let request = client.api_request(BINARY_INFORM_PATH, b"<FUSMsg/>".to_vec()).unwrap();
        assert_eq!(request.url().as_str(), "https://fus.example.com/NF_DownloadBinaryInform.do");
        assert_eq!(header(&request, "authorization"), Some(concat!(
            r#"FUS nonce="", signature="1nHLL64pm3WTHgVaEmSdRCwMP3KdWSBdzmsh1LiZdWA=", "#,
            r#"nc="", type="", realm="", newauth="1""#,
        )));
        assert_eq!(header(&request, "cookie"), Some("JSESSIONID=abc123"));
        assert_eq!(request.body().and_then(|b| b.as_bytes()), Some(&b"<FUSMsg/>"[..]));
    }

    #[test]
    fn test_download_request() {
        let client = authenticated_client();

        let request = client.download_request("/neofus/9/file.zip.enc4", 0).unwrap();
        assert_eq!(request.method(), &reqwest::Method::GET);
        assert_eq!(request.url().as_str(),
                   "http://dl.example.com/NF_DownloadBinaryForMass.do?file=/neofus/9/file.zip.enc4");
        assert_eq!(header(&request, "authorization"), Some(concat!(
            r#"FUS nonce="DF4BnMBex58RaD+zhct36UWHDkFzVmbgsxZEE9YnkZc=", "#,
            r#"signature="1nHLL64pm3WTHgVaEmSdRCwMP3KdWSBdzmsh1LiZdWA=", "#,
            r#"nc="", type="", realm="", newauth="1""#,
        )));
        assert_eq!(header(&request, "range"), None);

        let request = client.download_request("/neofus/9/file.zip.enc4", 4096).unwrap();
        assert_eq!(header(&request, "range"), Some("bytes=4096-"));
    }

    #[tokio::test]
    async fn test_send_updates_session() {
        let server = TestServer::start(|r| {
            if r.path() == format!("/{NONCE_PATH}") {
                Reply::new(200, "")
                    .header(NONCE_HEADER, NONCE_ABCD)
                    .header("Set-Cookie", "JSESSIONID=abc123; Path=/")
            } else {
                Reply::new(200, "<FUSMsg/>").header(NONCE_HEADER, NONCE_TESTING)
            }
        }).await;

        let mut client = FusClientBuilder::new(FusKeys::default())
            .fus_base_url(&server.url)
            .connect()
            .await
            .unwrap();
        assert_eq!(client.nonce().unwrap().as_slice(), b"ABCDEFGHIJKLMNOP");
        assert_eq!(client.session().cookie(), Some("abc123"));

        let data = client.send(BINARY_INFORM_PATH, b"<FUSMsg/>".to_vec()).await.unwrap();
        assert_eq!(&data[..], b"<FUSMsg/>");
        assert_eq!(client.nonce().unwrap().as_slice(), b"testing_testing_");
        assert_eq!(client.session().encrypted_nonce(), NONCE_TESTING);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].header("cookie"), None);

        // Signed with the nonce from the previous response
        assert_eq!(requests[1].path(), format!("/{BINARY_INFORM_PATH}"));
        assert_eq!(requests[1].header("authorization"), Some(concat!(
            r#"FUS nonce="", signature="1nHLL64pm3WTHgVaEmSdRCwMP3KdWSBdzmsh1LiZdWA=", "#,
            r#"nc="", type="", realm="", newauth="1""#,
        )));
        assert_eq!(requests[1].header("cookie"), Some("JSESSIONID=abc123"));
        assert_eq!(requests[1].body, b"<FUSMsg/>");
    }

    #[tokio::test]
    async fn test_bootstrap_without_nonce() {
        let server = TestServer::start(|_| Reply::new(200, "")).await;

        let result = FusClientBuilder::new(FusKeys::default())
            .fus_base_url(&server.url)
            .connect()
            .await;
        assert_matches!(result, Err(FusError::NonceNotFound));
    }

    #[tokio::test]
    async fn test_send_http_error() {
        let server = TestServer::start(|r| {
            if r.path() == format!("/{NONCE_PATH}") {
                Reply::new(200, "").header(NONCE_HEADER, NONCE_ABCD)
            } else if r.path() == format!("/{BINARY_INIT_PATH}") {
                // Unusable nonce on an error response
                Reply::new(403, "denied").header(NONCE_HEADER, "AAAA")
            } else {
                Reply::new(500, "oops").header(NONCE_HEADER, NONCE_TESTING)
            }
        }).await;

        let mut client = FusClientBuilder::new(FusKeys::default())
            .fus_base_url(&server.url)
            .connect()
            .await
            .unwrap();

        assert_matches!(
            client.send(BINARY_INFORM_PATH, vec![]).await,
            Err(FusError::HttpStatus { status, body })
                if status == StatusCode::INTERNAL_SERVER_ERROR && body == "oops"
        );
        // The nonce is rotated even for failed requests
        assert_eq!(client.nonce().unwrap().as_slice(), b"testing_testing_");

        assert_matches!(
            client.send(BINARY_INIT_PATH, vec![]).await,
            Err(FusError::HttpStatus { status, body })
                if status == StatusCode::FORBIDDEN && body == "denied"
        );
        assert_eq!(client.nonce().unwrap().as_slice(), b"testing_testing_");
    }

    #[tokio::test]
    async fn test_send_bad_nonce() {
        let server = TestServer::start(|r| {
            if r.path() == format!("/{NONCE_PATH}") {
                Reply::new(200, "").header(NONCE_HEADER, NONCE_ABCD)
            } else {
                Reply::new(200, "<FUSMsg/>").header(NONCE_HEADER, "AAAA")
            }
        }).await;

        let mut client = FusClientBuilder::new(FusKeys::default())
            .fus_base_url(&server.url)
            .connect()
            .await
            .unwrap();

        assert_matches!(client.send(BINARY_INFORM_PATH, vec![]).await,
                        Err(FusError::CryptoError(CryptoError::CiphertextUnaligned(3))));
        assert_eq!(client.nonce().unwrap().as_slice(), b"ABCDEFGHIJKLMNOP");
    }
}

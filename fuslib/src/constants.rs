/// Hardcoded fixed key used to AES-256 encrypt/decrypt nonces
pub const FIXED_KEY: &[u8; 32] = b"vicopx7dqu06emacgpnpy8j8zwhduwlh";

/// Suffix appended to "flexible keys", which are keys derived from the fixed
/// key based on an array of byte indexes
pub const FLEXIBLE_KEY_SUFFIX: &[u8; 16] = b"9u7qab84rpc16gvk";

/// Host serving the `version.xml` firmware metadata documents
pub const FOTA_BASE_URL: &str = "https://fota-cloud-dn.ospserver.net";
/// Host for the XML API (nonce generation, binary inform, binary init)
pub const FUS_BASE_URL: &str = "https://neofussvr.sslcs.cdngc.net";
/// Host for the actual binary downloads
pub const DOWNLOAD_BASE_URL: &str = "http://cloud-neofussvr.samsungmobile.com";

pub const USER_AGENT: &str = "Kies2.0_FUS";
pub const SESSION_COOKIE: &str = "JSESSIONID";
pub const NONCE_HEADER: &str = "NONCE";

pub const PROTO_VER: &str = "1.0";
pub const CLIENT_PRODUCT: &str = "Smart Switch";
pub const CLIENT_VERSION: &str = "4.3.23123_1";
pub const DEVICE_PLATFORM: &str = "Android";

pub const NONCE_PATH: &str = "NF_DownloadGenerateNonce.do";
pub const BINARY_INFORM_PATH: &str = "NF_DownloadBinaryInform.do";
pub const BINARY_INIT_PATH: &str = "NF_DownloadBinaryInitForMass.do";
pub const BINARY_DOWNLOAD_PATH: &str = "NF_DownloadBinaryForMass.do";

use std::{
    convert::TryInto,
    fmt,
    str,
};

use base64::{
    Engine,
    engine::general_purpose::STANDARD,
};
use log::debug;

use crate::{
    crypto::{FusAes256, FusKeys},
    fus::FusError,
};

const NON_UTF8_MSG: &str = "[Non-UTF-8 data]";

/// A type representing the Authorization field for FUS requests.
#[derive(Debug, Default)]
pub(crate) struct Authorization {
    pub nonce: String,
    pub signature: String,
}

impl Authorization {
    /// Authorization for the XML API. The nonce field is always left empty.
    pub fn with_signature(signature: &str) -> Self {
        Self {
            nonce: Default::default(),
            signature: signature.to_owned(),
        }
    }

    /// Authorization for the binary download endpoint, which also wants the
    /// nonce in its encrypted wire form.
    pub fn with_nonce_and_signature(encrypted_nonce: &str, signature: &str) -> Self {
        Self {
            nonce: encrypted_nonce.to_owned(),
            signature: signature.to_owned(),
        }
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // We do not support the legacy auth mechanism (unencrypted nonces), so
        // newauth is always set
        write!(
            f,
            "FUS nonce=\"{}\", signature=\"{}\", nc=\"\", type=\"\", realm=\"\", newauth=\"1\"",
            self.nonce,
            self.signature,
        )
    }
}

/// A type representing a FUS nonce value.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Nonce {
    // The flexible key is derived from the first 16 bytes and the logic check
    // assumes at least 16 bytes. The server always sends exactly 16.
    data: [u8; 16],
}

impl Nonce {
    /// Create instance from a byte slice containing the nonce.
    /// [`FusError::NonceInvalidSize`] is returned if the slice is not 16 bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, FusError> {
        Ok(Self {
            data: data.try_into().map_err(|_| FusError::NonceInvalidSize(data.len()))?,
        })
    }

    /// Get byte slice containing the nonce. The slice is guaranteed to always
    /// be 16 bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Create instance from a fixed-key-encrypted, base64-encoded nonce value.
    pub fn from_encrypted(keys: &FusKeys, data: &[u8]) -> Result<Self, FusError> {
        let decoded = STANDARD.decode(data)?;
        let plaintext = FusAes256::new(&keys.fixed_key)?.decrypt(&decoded)?;
        Self::from_slice(&plaintext)
    }

    /// Convert nonce to fixed-key-encrypted nonce. This is the inverse of
    /// [`Self::from_encrypted`].
    pub fn to_encrypted(self, keys: &FusKeys) -> Result<String, FusError> {
        Ok(STANDARD.encode(FusAes256::new(&keys.fixed_key)?.encrypt(&self.data)))
    }

    /// Get the nonce signature to be used in the Authorization header for FUS
    /// requests. The nonce is encrypted with the flexible key derived from
    /// itself.
    pub fn to_signature(self, keys: &FusKeys) -> Result<String, FusError> {
        let key = keys.get_flexible_key(self.as_slice());
        let ciphertext = FusAes256::new(&key)?.encrypt(self.as_slice());

        Ok(STANDARD.encode(ciphertext))
    }

    /// Nonce as a string for display. Non-UTF-8 data is replaced with a
    /// placeholder, so use [`Self::as_slice`] for anything sent to the server.
    pub fn as_str(&self) -> &str {
        str::from_utf8(&self.data).unwrap_or(NON_UTF8_MSG)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Intentionally keep error text at 16 bytes
        f.write_str(self.as_str())
    }
}

/// Authentication state carried across FUS requests. The nonce, its encrypted
/// form, and its signature are only ever replaced together.
#[derive(Clone, Debug, Default)]
pub struct Session {
    nonce: Option<Nonce>,
    encrypted_nonce: String,
    signature: String,
    cookie: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a nonce has been received and signed.
    pub fn is_authenticated(&self) -> bool {
        self.nonce.is_some()
    }

    pub fn nonce(&self) -> Option<Nonce> {
        self.nonce
    }

    pub fn encrypted_nonce(&self) -> &str {
        &self.encrypted_nonce
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// Accept a new encrypted nonce from the server. Nothing is modified unless
    /// the nonce decrypts and signs successfully.
    pub fn rotate_nonce(&mut self, keys: &FusKeys, encrypted: &str) -> Result<(), FusError> {
        let nonce = Nonce::from_encrypted(keys, encrypted.as_bytes())?;
        let signature = nonce.to_signature(keys)?;

        debug!("Received new nonce");

        self.nonce = Some(nonce);
        self.encrypted_nonce = encrypted.to_owned();
        self.signature = signature;

        Ok(())
    }

    pub fn set_cookie(&mut self, value: &str) {
        self.cookie = Some(value.to_owned());
    }

    /// Authorization header value for XML API requests.
    pub(crate) fn api_authorization(&self) -> Authorization {
        Authorization::with_signature(&self.signature)
    }

    /// Authorization header value for binary download requests.
    pub(crate) fn download_authorization(&self) -> Authorization {
        Authorization::with_nonce_and_signature(&self.encrypted_nonce, &self.signature)
    }
}

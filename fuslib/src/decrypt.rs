use std::{
    cmp,
    ffi::OsString,
    fs::{self, File},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use log::{debug, trace};
use thiserror::Error;

use crate::{
    crypto::{unpadded_len, CryptoError, FirmwareCipher, BLOCK_SIZE},
    fus::{BinaryInfo, FusClient, FusError},
    logic::logic_check,
    version::normalize_version,
};

/// Size of each read from the encrypted file
pub const DECRYPT_CHUNK_SIZE: usize = 4096;

const TEMP_EXT: &str = "part";

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("Encrypted file size ({0}) is not a multiple of the block size")]
    Unaligned(u64),
    #[error("Input and output refer to the same file: {0:?}")]
    SameFile(PathBuf),
    #[error("Binary inform response has no {0} field")]
    MissingKeyInput(&'static str),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("FUS error: {0}")]
    Fus(#[from] FusError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Firmware encryption scheme, identified by the file extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncryptionVersion {
    /// Key is derived locally from the region, model, and version
    V2,
    /// Key is derived from a logic value that must be requested from FUS
    V4,
}

impl EncryptionVersion {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            2 => Some(Self::V2),
            4 => Some(Self::V4),
            _ => None,
        }
    }

    /// Detect the scheme from a filename ending in `.enc2` or `.enc4`.
    pub fn from_filename(name: &str) -> Option<Self> {
        if name.ends_with(".enc2") {
            Some(Self::V2)
        } else if name.ends_with(".enc4") {
            Some(Self::V4)
        } else {
            None
        }
    }
}

/// Path of the decrypted output for an encrypted file: the `.enc2` or `.enc4`
/// suffix is removed. Other paths are returned unchanged.
pub fn decrypted_path(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("enc2") | Some("enc4") => path.with_extension(""),
        _ => path.to_owned(),
    }
}

/// Append the `.enc2` or `.enc4` suffix of the server's `filename` to a
/// user-chosen download path that does not already carry one. This keeps the
/// decrypted path distinct from the encrypted one.
pub fn encrypted_path(path: &Path, filename: &str) -> PathBuf {
    let has_suffix = path.file_name()
        .and_then(|n| n.to_str())
        .and_then(EncryptionVersion::from_filename)
        .is_some();

    match filename.rsplit_once('.') {
        Some((_, ext @ ("enc2" | "enc4"))) if !has_suffix => add_extension(path, ext),
        _ => path.to_owned(),
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    a == b || matches!((fs::canonicalize(a), fs::canonicalize(b)), (Ok(x), Ok(y)) if x == y)
}

/// Add an extension to a file path.
fn add_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Scheme v2 key: MD5 of `<region>:<model>:<version>`.
pub fn key_v2(version: &str, model: &str, region: &str) -> [u8; 16] {
    md5::compute(format!("{region}:{model}:{version}")).into()
}

/// Scheme v4 key from a binary inform response: MD5 of the firmware version
/// scrambled by the logic value.
pub fn key_v4_from_info(info: &BinaryInfo) -> Result<[u8; 16], DecryptError> {
    let version = info.latest_version.as_deref()
        .ok_or(DecryptError::MissingKeyInput("LATEST_FW_VERSION"))?;
    let logic_value = info.logic_value_factory.as_deref()
        .ok_or(DecryptError::MissingKeyInput("LOGIC_VALUE_FACTORY"))?;

    let passphrase = logic_check(version, logic_value.as_bytes());

    Ok(md5::compute(passphrase).into())
}

/// Scheme v4 key. This costs one binary inform round trip. Any failure aborts
/// rather than falling back to v2.
pub async fn key_v4(
    client: &mut FusClient,
    version: &str,
    model: &str,
    region: &str,
    device_id: &str,
) -> Result<[u8; 16], DecryptError> {
    let info = client
        .binary_inform(&normalize_version(version), model, region, device_id)
        .await?;

    key_v4_from_info(&info)
}

/// Result of [`decrypt_file`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecryptOutcome {
    /// Output was written. Contains the plaintext size.
    Decrypted(u64),
    /// Output already existed and nothing was done.
    AlreadyDecrypted,
}

/// Decrypt `input` to `output` with the independent-block cipher. Padding is
/// only stripped from the final chunk. `progress` is called with 10, 20, ...
/// 100 as each tenth of the input is processed.
///
/// If `output` already exists, neither file is touched. The plaintext goes to
/// a temporary file that is renamed into place once complete, so an existing
/// output always means a finished decryption. The input file is never deleted.
pub fn decrypt_file(
    input: &Path,
    output: &Path,
    key: &[u8],
    mut progress: impl FnMut(u8),
) -> Result<DecryptOutcome, DecryptError> {
    if is_same_file(input, output) {
        return Err(DecryptError::SameFile(output.to_owned()));
    }

    if output.exists() {
        debug!("{output:?} already exists");
        return Ok(DecryptOutcome::AlreadyDecrypted);
    }

    let mut input_file = File::open(input)?;
    let len = input_file.metadata()?.len();

    if len % BLOCK_SIZE as u64 != 0 {
        return Err(DecryptError::Unaligned(len));
    }

    let cipher = FirmwareCipher::new(key)?;
    let temp_path = add_extension(output, TEMP_EXT);

    let result = decrypt_stream(&mut input_file, &temp_path, len, &cipher, &mut progress)
        .and_then(|n| {
            fs::rename(&temp_path, output)?;
            Ok(n)
        });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result.map(DecryptOutcome::Decrypted)
}

fn decrypt_stream(
    input: &mut File,
    temp_path: &Path,
    len: u64,
    cipher: &FirmwareCipher,
    progress: &mut impl FnMut(u8),
) -> Result<u64, DecryptError> {
    debug!("Decrypting {len} bytes to {temp_path:?}");

    let mut writer = BufWriter::new(File::create(temp_path)?);
    let mut buf = [0u8; DECRYPT_CHUNK_SIZE];
    let mut remaining = len;
    let mut written = 0u64;
    let mut last_decile = 0u64;

    // Intentionally don't handle files that grow during reads
    while remaining > 0 {
        let to_read = cmp::min(remaining, buf.len() as u64) as usize;
        let chunk = &mut buf[..to_read];
        input.read_exact(chunk)?;

        cipher.decrypt_in_place(chunk)?;

        remaining -= to_read as u64;

        let plaintext = if remaining == 0 {
            &chunk[..unpadded_len(chunk)]
        } else {
            &chunk[..]
        };
        trace!("Writing {} decrypted bytes", plaintext.len());

        writer.write_all(plaintext)?;
        written += plaintext.len() as u64;

        let decile = (len - remaining) * 10 / len;
        if decile > last_decile {
            last_decile = decile;
            progress((decile * 10) as u8);
        }
    }

    writer.flush()?;

    if len == 0 {
        progress(100);
    }

    Ok(written)
}

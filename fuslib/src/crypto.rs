use std::convert::TryInto;

use aes::{Aes128, Aes256};
use cbc::{Decryptor, Encryptor};
use cipher::{
    block_padding::{NoPadding, Pkcs7},
    generic_array::GenericArray,
    BlockDecrypt, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit,
};
use thiserror::Error;

/// AES block size. Both the chained and the independent-block modes use it.
pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Fixed key has incorrect length (expected 32 bytes, got {0})")]
    IncorrectFixedKeyLength(usize),
    #[error("Flexible key suffix has incorrect length (expected 16 bytes, got {0})")]
    IncorrectFlexibleKeySuffixLength(usize),
    #[error("Key has unsupported length: {0} bytes")]
    InvalidKeyLength(usize),
    #[error("Ciphertext length ({0}) is not a multiple of the block size")]
    CiphertextUnaligned(usize),
}

/// Container for holding FUS encryption keys.
#[derive(Clone, Debug)]
pub struct FusKeys {
    pub fixed_key: [u8; 32],
    pub flexible_key_suffix: [u8; 16],
}

impl FusKeys {
    /// Load keys from the specified byte slices. The fixed key should be 32
    /// bytes and the flexible key suffix should be 16 bytes.
    pub fn new(
        fixed_key: &[u8],
        flexible_key_suffix: &[u8],
    ) -> Result<Self, CryptoError> {
        Ok(Self {
            fixed_key: fixed_key.try_into()
                .map_err(|_| CryptoError::IncorrectFixedKeyLength(fixed_key.len()))?,
            flexible_key_suffix: flexible_key_suffix.try_into()
                .map_err(|_| CryptoError::IncorrectFlexibleKeySuffixLength(
                    flexible_key_suffix.len()))?,
        })
    }

    /// Derive the FUS "flexible key" from the given base. The first 16 bytes
    /// of the base, each taken mod 16, select bytes of the fixed key. The
    /// hardcoded suffix fills the remaining 16 bytes.
    pub fn get_flexible_key(&self, key_base: &[u8]) -> [u8; 32] {
        let mut key = [0u8; 32];

        for (out, b) in key.iter_mut().zip(key_base.iter().take(16)) {
            *out = self.fixed_key[(b % 16) as usize];
        }
        key[16..].copy_from_slice(&self.flexible_key_suffix);

        key
    }
}

impl Default for FusKeys {
    fn default() -> Self {
        Self {
            fixed_key: *crate::constants::FIXED_KEY,
            flexible_key_suffix: *crate::constants::FLEXIBLE_KEY_SUFFIX,
        }
    }
}

/// Compute the length of `data` after removing PKCS#7-style padding. The pad
/// length is read from the last byte. If it is larger than the buffer, the
/// data is treated as unpadded. The pad bytes themselves are not checked.
pub fn unpadded_len(data: &[u8]) -> usize {
    match data.last() {
        Some(&n) if n as usize <= data.len() => data.len() - n as usize,
        _ => data.len(),
    }
}

/// Type for performing AES operations in the way that FUS expects. Notably:
/// * The key must be exactly 32 bytes.
/// * The IV is not transmitted. It is the first 16 bytes of the key.
/// * The data is PKCS#7 padded to the next 16-byte boundary. A full block of
///   padding is added if the data is already aligned.
/// * During decryption, padding that claims to be longer than the plaintext is
///   ignored and the plaintext is returned as-is.
#[derive(Debug)]
pub struct FusAes256 {
    key: [u8; 32],
}

impl FusAes256 {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            key: key.try_into().map_err(|_| CryptoError::InvalidKeyLength(key.len()))?,
        })
    }

    fn iv(&self) -> &[u8] {
        &self.key[..BLOCK_SIZE]
    }

    /// Encrypt the provided plaintext data.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        let key = GenericArray::from_slice(&self.key);
        let iv = GenericArray::from_slice(self.iv());

        Encryptor::<Aes256>::new(key, iv)
            .encrypt_padded_vec_mut::<Pkcs7>(data)
    }

    /// Decrypt the provided FUS ciphertext and strip the padding.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = GenericArray::from_slice(&self.key);
        let iv = GenericArray::from_slice(self.iv());

        let mut plaintext = Decryptor::<Aes256>::new(key, iv)
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(|_| CryptoError::CiphertextUnaligned(data.len()))?;

        plaintext.truncate(unpadded_len(&plaintext));

        Ok(plaintext)
    }
}

/// Type for decrypting files downloaded from FUS. Every 16-byte block is
/// decrypted on its own (ECB) and no padding is removed here.
#[derive(Clone, Debug)]
pub enum FirmwareCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl FirmwareCipher {
    /// Create a new cipher instance for decrypting FUS files. The key must be
    /// 16 or 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::InvalidKeyLength(key.len());

        match key.len() {
            16 => Ok(Self::Aes128(Aes128::new_from_slice(key).map_err(invalid)?)),
            32 => Ok(Self::Aes256(Aes256::new_from_slice(key).map_err(invalid)?)),
            n => Err(CryptoError::InvalidKeyLength(n)),
        }
    }

    /// Decrypt the provided ciphertext in-place.
    pub fn decrypt_in_place(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        if buf.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::CiphertextUnaligned(buf.len()));
        }

        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(c) => c.decrypt_block(block),
                Self::Aes256(c) => c.decrypt_block(block),
            }
        }

        Ok(())
    }
}

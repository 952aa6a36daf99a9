//! Crypto methods for shadowsocks

use ::openssl::symm;

pub use self::{
    cipher::{available_ciphers, CipherKind, CipherResult, Error},
    encryptor::{decrypt_all, encrypt_all, DecryptHalf, EncryptHalf, Encryptor},
    stream::{new_stream, StreamCipher, StreamCipherVariant},
    table::SubstitutionTable,
    util::bytes_to_key,
};

pub mod cipher;
pub mod encryptor;
pub mod openssl;
pub mod rc4_md5;
pub mod stream;
pub mod table;
pub mod util;

/// Crypto mode, encrypt or decrypt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptoMode {
    Encrypt,
    Decrypt,
}

impl From<CryptoMode> for symm::Mode {
    fn from(m: CryptoMode) -> symm::Mode {
        match m {
            CryptoMode::Encrypt => symm::Mode::Encrypt,
            CryptoMode::Decrypt => symm::Mode::Decrypt,
        }
    }
}

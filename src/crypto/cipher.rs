//! Cipher methods

use std::{
    fmt::{self, Display},
    io,
    str::FromStr,
};

use bytes::Bytes;
use rand::RngCore;

/// Cipher result
pub type CipherResult<T> = Result<T, Error>;

/// Cipher error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown cipher method \"{0}\"")]
    UnknownCipherType(String),
    #[error("cipher method {0} is not available in the linked OpenSSL")]
    UnavailableCipher(CipherKind),
    #[error("packet too short for {0}, expecting at least {1} bytes")]
    PacketTooShort(CipherKind, usize),
    #[error("{0}")]
    OpenSSLError(#[from] openssl::error::ErrorStack),
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::new(io::ErrorKind::Other, e)
    }
}

#[rustfmt::skip]
mod consts {
    pub const CIPHER_AES_128_CFB:      &str = "aes-128-cfb";
    pub const CIPHER_AES_192_CFB:      &str = "aes-192-cfb";
    pub const CIPHER_AES_256_CFB:      &str = "aes-256-cfb";
    pub const CIPHER_BF_CFB:           &str = "bf-cfb";
    pub const CIPHER_CAMELLIA_128_CFB: &str = "camellia-128-cfb";
    pub const CIPHER_CAMELLIA_192_CFB: &str = "camellia-192-cfb";
    pub const CIPHER_CAMELLIA_256_CFB: &str = "camellia-256-cfb";
    pub const CIPHER_CAST5_CFB:        &str = "cast5-cfb";
    pub const CIPHER_DES_CFB:          &str = "des-cfb";
    pub const CIPHER_IDEA_CFB:         &str = "idea-cfb";
    pub const CIPHER_RC2_CFB:          &str = "rc2-cfb";
    pub const CIPHER_RC4:              &str = "rc4";
    pub const CIPHER_RC4_MD5:          &str = "rc4-md5";
    pub const CIPHER_SEED_CFB:         &str = "seed-cfb";
    pub const CIPHER_TABLE:            &str = "table";
}

/// Stream cipher methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CipherKind {
    Table,

    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    BfCfb,
    Camellia128Cfb,
    Camellia192Cfb,
    Camellia256Cfb,
    Cast5Cfb,
    DesCfb,
    IdeaCfb,
    Rc2Cfb,
    Rc4,
    Rc4Md5,
    SeedCfb,
}

/// All supported method names
pub const fn available_ciphers() -> &'static [&'static str] {
    &[
        consts::CIPHER_AES_128_CFB,
        consts::CIPHER_AES_192_CFB,
        consts::CIPHER_AES_256_CFB,
        consts::CIPHER_BF_CFB,
        consts::CIPHER_CAMELLIA_128_CFB,
        consts::CIPHER_CAMELLIA_192_CFB,
        consts::CIPHER_CAMELLIA_256_CFB,
        consts::CIPHER_CAST5_CFB,
        consts::CIPHER_DES_CFB,
        consts::CIPHER_IDEA_CFB,
        consts::CIPHER_RC2_CFB,
        consts::CIPHER_RC4,
        consts::CIPHER_RC4_MD5,
        consts::CIPHER_SEED_CFB,
        consts::CIPHER_TABLE,
    ]
}

impl CipherKind {
    /// Method name, as in configuration files
    #[rustfmt::skip]
    pub fn name(self) -> &'static str {
        match self {
            CipherKind::Table          => consts::CIPHER_TABLE,
            CipherKind::Aes128Cfb      => consts::CIPHER_AES_128_CFB,
            CipherKind::Aes192Cfb      => consts::CIPHER_AES_192_CFB,
            CipherKind::Aes256Cfb      => consts::CIPHER_AES_256_CFB,
            CipherKind::BfCfb          => consts::CIPHER_BF_CFB,
            CipherKind::Camellia128Cfb => consts::CIPHER_CAMELLIA_128_CFB,
            CipherKind::Camellia192Cfb => consts::CIPHER_CAMELLIA_192_CFB,
            CipherKind::Camellia256Cfb => consts::CIPHER_CAMELLIA_256_CFB,
            CipherKind::Cast5Cfb       => consts::CIPHER_CAST5_CFB,
            CipherKind::DesCfb         => consts::CIPHER_DES_CFB,
            CipherKind::IdeaCfb        => consts::CIPHER_IDEA_CFB,
            CipherKind::Rc2Cfb         => consts::CIPHER_RC2_CFB,
            CipherKind::Rc4            => consts::CIPHER_RC4,
            CipherKind::Rc4Md5         => consts::CIPHER_RC4_MD5,
            CipherKind::SeedCfb        => consts::CIPHER_SEED_CFB,
        }
    }

    /// `table` has no key or IV framing
    pub fn is_table(self) -> bool {
        self == CipherKind::Table
    }

    /// Length of the key derived from password
    #[rustfmt::skip]
    pub fn key_size(self) -> usize {
        match self {
            CipherKind::Table => 0,

            CipherKind::Aes128Cfb      => 16,
            CipherKind::Aes192Cfb      => 24,
            CipherKind::Aes256Cfb      => 32,
            CipherKind::BfCfb          => 16,
            CipherKind::Camellia128Cfb => 16,
            CipherKind::Camellia192Cfb => 24,
            CipherKind::Camellia256Cfb => 32,
            CipherKind::Cast5Cfb       => 16,
            CipherKind::DesCfb         => 8,
            CipherKind::IdeaCfb        => 16,
            CipherKind::Rc2Cfb         => 16,
            CipherKind::Rc4            => 16,
            CipherKind::Rc4Md5         => 16,
            CipherKind::SeedCfb        => 16,
        }
    }

    /// Length of the IV prefixed to every stream
    #[rustfmt::skip]
    pub fn iv_size(self) -> usize {
        match self {
            CipherKind::Table | CipherKind::Rc4 => 0,

            CipherKind::Aes128Cfb      => 16,
            CipherKind::Aes192Cfb      => 16,
            CipherKind::Aes256Cfb      => 16,
            CipherKind::BfCfb          => 8,
            CipherKind::Camellia128Cfb => 16,
            CipherKind::Camellia192Cfb => 16,
            CipherKind::Camellia256Cfb => 16,
            CipherKind::Cast5Cfb       => 8,
            CipherKind::DesCfb         => 8,
            CipherKind::IdeaCfb        => 8,
            CipherKind::Rc2Cfb         => 8,
            CipherKind::Rc4Md5         => 16,
            CipherKind::SeedCfb        => 16,
        }
    }

    /// Generate a random initialize vector for this cipher
    pub fn gen_init_vec(self) -> Bytes {
        let mut iv = vec![0u8; self.iv_size()];
        rand::thread_rng().fill_bytes(&mut iv);
        Bytes::from(iv)
    }
}

impl FromStr for CipherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<CipherKind, Error> {
        use self::consts::*;

        match s.to_ascii_lowercase().as_str() {
            CIPHER_TABLE | "" => Ok(CipherKind::Table),
            CIPHER_AES_128_CFB => Ok(CipherKind::Aes128Cfb),
            CIPHER_AES_192_CFB => Ok(CipherKind::Aes192Cfb),
            CIPHER_AES_256_CFB => Ok(CipherKind::Aes256Cfb),
            CIPHER_BF_CFB => Ok(CipherKind::BfCfb),
            CIPHER_CAMELLIA_128_CFB => Ok(CipherKind::Camellia128Cfb),
            CIPHER_CAMELLIA_192_CFB => Ok(CipherKind::Camellia192Cfb),
            CIPHER_CAMELLIA_256_CFB => Ok(CipherKind::Camellia256Cfb),
            CIPHER_CAST5_CFB => Ok(CipherKind::Cast5Cfb),
            CIPHER_DES_CFB => Ok(CipherKind::DesCfb),
            CIPHER_IDEA_CFB => Ok(CipherKind::IdeaCfb),
            CIPHER_RC2_CFB => Ok(CipherKind::Rc2Cfb),
            CIPHER_RC4 => Ok(CipherKind::Rc4),
            CIPHER_RC4_MD5 => Ok(CipherKind::Rc4Md5),
            CIPHER_SEED_CFB => Ok(CipherKind::SeedCfb),
            _ => Err(Error::UnknownCipherType(s.to_owned())),
        }
    }
}

impl Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

//! Cipher backed by OpenSSL's EVP interface

use bytes::BytesMut;
use openssl::{nid::Nid, symm};

use super::{
    cipher::{CipherKind, CipherResult, Error},
    stream::StreamCipher,
    CryptoMode,
};

/// OpenSSL's legacy ciphers (bf, cast5, des, idea, rc2, rc4, seed) have to be loaded
/// explicitly since OpenSSL 3.0. The provider lives until the process exits.
#[cfg(ossl300)]
fn load_legacy_provider() {
    use std::sync::Once;

    use log::debug;
    use openssl::provider::Provider;

    static LEGACY_PROVIDER: Once = Once::new();

    LEGACY_PROVIDER.call_once(|| match Provider::try_load(None, "legacy", true) {
        Ok(provider) => std::mem::forget(provider),
        Err(err) => debug!("openssl legacy provider is not available, {}", err),
    });
}

#[cfg(not(ossl300))]
fn load_legacy_provider() {}

#[rustfmt::skip]
fn openssl_cipher(kind: CipherKind) -> Option<symm::Cipher> {
    let nid = match kind {
        CipherKind::Aes128Cfb      => Nid::AES_128_CFB128,
        CipherKind::Aes192Cfb      => Nid::AES_192_CFB128,
        CipherKind::Aes256Cfb      => Nid::AES_256_CFB128,
        CipherKind::BfCfb          => Nid::BF_CFB64,
        CipherKind::Camellia128Cfb => Nid::CAMELLIA_128_CFB128,
        CipherKind::Camellia192Cfb => Nid::CAMELLIA_192_CFB128,
        CipherKind::Camellia256Cfb => Nid::CAMELLIA_256_CFB128,
        CipherKind::Cast5Cfb       => Nid::CAST5_CFB64,
        CipherKind::DesCfb         => Nid::DES_CFB64,
        CipherKind::IdeaCfb        => Nid::IDEA_CFB64,
        CipherKind::Rc2Cfb         => Nid::RC2_CFB64,
        CipherKind::Rc4 |
        CipherKind::Rc4Md5         => Nid::RC4,
        CipherKind::SeedCfb        => Nid::SEED_CFB128,
        CipherKind::Table          => return None,
    };

    symm::Cipher::from_nid(nid)
}

/// Core cipher of OpenSSL
pub struct OpenSSLCrypto {
    cipher: symm::Cipher,
    inner: symm::Crypter,
}

impl OpenSSLCrypto {
    /// Creates by type
    pub fn new(kind: CipherKind, key: &[u8], iv: &[u8], mode: CryptoMode) -> CipherResult<OpenSSLCrypto> {
        load_legacy_provider();

        let cipher = openssl_cipher(kind).ok_or(Error::UnavailableCipher(kind))?;
        let iv = if iv.is_empty() { None } else { Some(iv) };

        let inner = symm::Crypter::new(cipher, From::from(mode), key, iv)?;

        Ok(OpenSSLCrypto { cipher, inner })
    }
}

impl StreamCipher for OpenSSLCrypto {
    fn update(&mut self, data: &[u8], out: &mut BytesMut) -> CipherResult<()> {
        let mut buf = vec![0u8; data.len() + self.cipher.block_size()];
        let n = self.inner.update(data, &mut buf)?;
        out.extend_from_slice(&buf[..n]);
        Ok(())
    }

    fn finalize(&mut self, out: &mut BytesMut) -> CipherResult<()> {
        let mut buf = vec![0u8; self.cipher.block_size()];
        let n = self.inner.finalize(&mut buf)?;
        out.extend_from_slice(&buf[..n]);
        Ok(())
    }
}

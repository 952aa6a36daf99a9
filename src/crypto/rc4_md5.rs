//! Rc4Md5 cipher definition

use bytes::BytesMut;

use super::{
    cipher::{CipherKind, CipherResult},
    openssl::OpenSSLCrypto,
    stream::StreamCipher,
    util::md5_key_iv,
    CryptoMode,
};

/// Rc4Md5 Cipher
///
/// Plain RC4 keyed with `MD5(key || iv)`
pub struct Rc4Md5Cipher {
    crypto: OpenSSLCrypto,
}

impl Rc4Md5Cipher {
    pub fn new(key: &[u8], iv: &[u8], mode: CryptoMode) -> CipherResult<Rc4Md5Cipher> {
        let key = md5_key_iv(key, iv);
        let crypto = OpenSSLCrypto::new(CipherKind::Rc4, &key, b"", mode)?;
        Ok(Rc4Md5Cipher { crypto })
    }
}

impl StreamCipher for Rc4Md5Cipher {
    fn update(&mut self, data: &[u8], out: &mut BytesMut) -> CipherResult<()> {
        self.crypto.update(data, out)
    }

    fn finalize(&mut self, out: &mut BytesMut) -> CipherResult<()> {
        self.crypto.finalize(out)
    }
}

//! Stream ciphers

use bytes::BytesMut;

use super::{
    cipher::{CipherKind, CipherResult},
    openssl::OpenSSLCrypto,
    rc4_md5::Rc4Md5Cipher,
    table::TableCipher,
    CryptoMode,
};

/// Basic operation of a stream cipher
///
/// The `update` method could be called multiple times with arbitrary split points, and
/// the `finalize` method flushes whatever the cipher still holds
pub trait StreamCipher {
    fn update(&mut self, data: &[u8], out: &mut BytesMut) -> CipherResult<()>;
    fn finalize(&mut self, out: &mut BytesMut) -> CipherResult<()>;
}

macro_rules! define_stream_ciphers {
    ($($name:ident => $cipher:ty,)+) => {
        /// Variant cipher which contains all possible ciphers
        pub enum StreamCipherVariant {
            $(
                $name($cipher),
            )+
        }

        impl StreamCipher for StreamCipherVariant {
            fn update(&mut self, data: &[u8], out: &mut BytesMut) -> CipherResult<()> {
                match *self {
                    $(
                        StreamCipherVariant::$name(ref mut cipher) => cipher.update(data, out),
                    )+
                }
            }

            fn finalize(&mut self, out: &mut BytesMut) -> CipherResult<()> {
                match *self {
                    $(
                        StreamCipherVariant::$name(ref mut cipher) => cipher.finalize(out),
                    )+
                }
            }
        }

        $(
            impl From<$cipher> for StreamCipherVariant {
                fn from(cipher: $cipher) -> StreamCipherVariant {
                    StreamCipherVariant::$name(cipher)
                }
            }
        )+
    }
}

define_stream_ciphers! {
    TableCipher => TableCipher,
    Rc4Md5Cipher => Rc4Md5Cipher,
    OpenSSLCipher => OpenSSLCrypto,
}

/// Generate a specific cipher with key and initialize vector
///
/// `table` has no key material and is built from the cached `SubstitutionTable` by `Encryptor`.
pub fn new_stream(t: CipherKind, key: &[u8], iv: &[u8], mode: CryptoMode) -> CipherResult<StreamCipherVariant> {
    let cipher: StreamCipherVariant = match t {
        CipherKind::Rc4Md5 => From::from(Rc4Md5Cipher::new(key, iv, mode)?),
        _ => From::from(OpenSSLCrypto::new(t, key, iv, mode)?),
    };
    Ok(cipher)
}

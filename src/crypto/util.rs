//! Key derivation

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};

/// Equivalent to OpenSSL's `EVP_BytesToKey()` with MD5, no salt and count 1
///
/// ```plain
/// D_0 = MD5(password)
/// D_i = MD5(D_{i-1} || password)
/// key || iv = D_0 || D_1 || ...
/// ```
pub fn bytes_to_key(password: &[u8], key_len: usize, iv_len: usize) -> (Bytes, Bytes) {
    let total = key_len + iv_len;

    let mut material = BytesMut::with_capacity(total + 16);
    let mut last_digest: Option<[u8; 16]> = None;

    while material.len() < total {
        let mut m = Md5::new();
        if let Some(ref d) = last_digest {
            m.update(d);
        }
        m.update(password);

        let mut digest = [0u8; 16];
        digest.copy_from_slice(&m.finalize());
        material.extend_from_slice(&digest);
        last_digest = Some(digest);
    }

    material.truncate(total);
    let iv = material.split_off(key_len);
    (material.freeze(), iv.freeze())
}

/// `MD5(key || iv)`, the per-session key of `rc4-md5`
pub fn md5_key_iv(key: &[u8], iv: &[u8]) -> Bytes {
    let mut m = Md5::new();
    m.update(key);
    m.update(iv);
    Bytes::copy_from_slice(&m.finalize())
}

#[cfg(test)]
mod test {
    use openssl::{hash::MessageDigest, pkcs5, symm};

    use super::*;

    #[test]
    fn test_bytes_to_key_golden() {
        // MD5("password")
        let expected = [
            0x5f, 0x4d, 0xcc, 0x3b, 0x5a, 0xa7, 0x65, 0xd6, 0x1d, 0x83, 0x27, 0xde, 0xb8, 0x82, 0xcf, 0x99,
        ];

        let (key, iv) = bytes_to_key(b"password", 16, 0);
        assert_eq!(&key[..], &expected[..]);
        assert!(iv.is_empty());

        // MD5(MD5("password") || "password")
        let expected_iv = [
            0x2b, 0x95, 0x99, 0x0a, 0x91, 0x51, 0x37, 0x4a, 0xbd, 0x8f, 0xf8, 0xc5, 0xa7, 0xa0, 0xfe, 0x08,
        ];

        let (key, iv) = bytes_to_key(b"password", 16, 16);
        assert_eq!(&key[..], &expected[..]);
        assert_eq!(&iv[..], &expected_iv[..]);
    }

    #[test]
    fn test_bytes_to_key_openssl() {
        let password = b"PASSword";

        for (cipher, key_len, iv_len) in [
            (symm::Cipher::aes_128_cfb128(), 16, 16),
            (symm::Cipher::aes_256_cfb128(), 32, 16),
        ] {
            let (key, iv) = bytes_to_key(password, key_len, iv_len);
            let expected = pkcs5::bytes_to_key(cipher, MessageDigest::md5(), password, None, 1).unwrap();

            assert_eq!(&key[..], &expected.key[..]);
            assert_eq!(&iv[..], &expected.iv.unwrap()[..]);
        }
    }

    #[test]
    fn test_bytes_to_key_prefix_stable() {
        let (k1, _) = bytes_to_key(b"foobar", 32, 16);
        let (k2, iv2) = bytes_to_key(b"foobar", 16, 32);
        assert_eq!(&k1[..16], &k2[..]);
        assert_eq!(&k1[16..], &iv2[..16]);
    }
}

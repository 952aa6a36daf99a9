//! Per-session encryptor
//!
//! The first encrypted chunk of a session carries the IV generated for it:
//!
//! ```plain
//! +--------+------------+------------+-----
//! |   IV   | ciphertext | ciphertext | ...
//! +--------+------------+------------+-----
//! | iv_len |  Variable  |  Variable  |
//! +--------+------------+------------+-----
//! ```
//!
//! The decrypt side takes the first `iv_len` bytes it receives as the peer's IV. `table`
//! has no IV at all.

use bytes::{Bytes, BytesMut};

use super::{
    cipher::{CipherKind, CipherResult, Error},
    stream::{new_stream, StreamCipher, StreamCipherVariant},
    table::TableCipher,
    CryptoMode,
};
use crate::context::Context;

/// Encrypting half of an `Encryptor`
pub struct EncryptHalf {
    cipher: StreamCipherVariant,
    pending_iv: Option<Bytes>,
}

impl EncryptHalf {
    /// Encrypt `data`, prefixed with the session IV on the first call
    pub fn encrypt(&mut self, data: &[u8]) -> CipherResult<Bytes> {
        let iv = self.pending_iv.take();

        let mut out = BytesMut::with_capacity(iv.as_ref().map_or(0, |iv| iv.len()) + data.len());
        if let Some(iv) = iv {
            out.extend_from_slice(&iv);
        }
        self.cipher.update(data, &mut out)?;
        Ok(out.freeze())
    }

    /// Whether the IV has been emitted already
    pub fn iv_sent(&self) -> bool {
        self.pending_iv.is_none()
    }

    fn finalize(&mut self, out: &mut BytesMut) -> CipherResult<()> {
        self.cipher.finalize(out)
    }
}

/// Decrypting half of an `Encryptor`
pub struct DecryptHalf {
    kind: CipherKind,
    key: Bytes,
    cipher: Option<StreamCipherVariant>,
    peer_iv: BytesMut,
}

impl DecryptHalf {
    /// Decrypt `data`
    ///
    /// Bytes belonging to the peer's IV are consumed, and nothing is returned until the IV
    /// is complete.
    pub fn decrypt(&mut self, mut data: &[u8]) -> CipherResult<Bytes> {
        if self.cipher.is_none() {
            let iv_len = self.kind.iv_size();
            let remaining = iv_len - self.peer_iv.len();
            let n = remaining.min(data.len());

            self.peer_iv.extend_from_slice(&data[..n]);
            data = &data[n..];

            if self.peer_iv.len() < iv_len {
                return Ok(Bytes::new());
            }

            let cipher = new_stream(self.kind, &self.key, &self.peer_iv, CryptoMode::Decrypt)?;
            self.cipher = Some(cipher);
        }

        let mut out = BytesMut::with_capacity(data.len());
        if let Some(ref mut cipher) = self.cipher {
            cipher.update(data, &mut out)?;
        }
        Ok(out.freeze())
    }

    /// Whether the peer's IV has been received
    pub fn iv_received(&self) -> bool {
        self.cipher.is_some()
    }
}

/// Session encryptor, owns the encrypt and decrypt streams of one session
pub struct Encryptor {
    kind: CipherKind,
    encryptor: EncryptHalf,
    decryptor: DecryptHalf,
}

impl Encryptor {
    /// Creates an encryptor of `kind` for `password`
    ///
    /// Key material and tables are taken from `context`'s caches.
    pub fn new(context: &Context, password: &str, kind: CipherKind) -> CipherResult<Encryptor> {
        if kind.is_table() {
            let table = context.substitution_table(password);

            return Ok(Encryptor {
                kind,
                encryptor: EncryptHalf {
                    cipher: From::from(TableCipher::with_table(table.clone(), CryptoMode::Encrypt)),
                    pending_iv: None,
                },
                decryptor: DecryptHalf {
                    kind,
                    key: Bytes::new(),
                    cipher: Some(From::from(TableCipher::with_table(table, CryptoMode::Decrypt))),
                    peer_iv: BytesMut::new(),
                },
            });
        }

        // The derived IV is not used, every session sends its own random IV
        let (key, _) = context.key_material(password, kind.key_size(), kind.iv_size());
        let iv = kind.gen_init_vec();

        let cipher = new_stream(kind, &key, &iv, CryptoMode::Encrypt)?;

        Ok(Encryptor {
            kind,
            encryptor: EncryptHalf {
                cipher,
                pending_iv: Some(iv),
            },
            decryptor: DecryptHalf {
                kind,
                key,
                cipher: None,
                peer_iv: BytesMut::with_capacity(kind.iv_size()),
            },
        })
    }

    /// Cipher method
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Encrypt `data`, see `EncryptHalf::encrypt`
    pub fn encrypt(&mut self, data: &[u8]) -> CipherResult<Bytes> {
        self.encryptor.encrypt(data)
    }

    /// Decrypt `data`, see `DecryptHalf::decrypt`
    pub fn decrypt(&mut self, data: &[u8]) -> CipherResult<Bytes> {
        self.decryptor.decrypt(data)
    }

    /// Split into halves that could be driven independently
    pub fn into_split(self) -> (EncryptHalf, DecryptHalf) {
        (self.encryptor, self.decryptor)
    }
}

/// Encrypt a whole UDP packet with a fresh IV
pub fn encrypt_all(context: &Context, password: &str, kind: CipherKind, data: &[u8]) -> CipherResult<Bytes> {
    let (mut encryptor, _) = Encryptor::new(context, password, kind)?.into_split();

    let encrypted = encryptor.encrypt(data)?;
    let mut out = BytesMut::from(&encrypted[..]);
    encryptor.finalize(&mut out)?;
    Ok(out.freeze())
}

/// Decrypt a whole UDP packet
pub fn decrypt_all(context: &Context, password: &str, kind: CipherKind, data: &[u8]) -> CipherResult<Bytes> {
    if data.len() < kind.iv_size() {
        return Err(Error::PacketTooShort(kind, kind.iv_size()));
    }

    let (_, mut decryptor) = Encryptor::new(context, password, kind)?.into_split();
    decryptor.decrypt(data)
}

#[cfg(test)]
mod test {
    use rand::Rng;

    use super::*;
    use crate::crypto::available_ciphers;

    fn all_kinds() -> Vec<CipherKind> {
        available_ciphers().iter().map(|n| n.parse().unwrap()).collect()
    }

    fn new_pair(context: &Context, password: &str, kind: CipherKind) -> Option<(Encryptor, Encryptor)> {
        match (Encryptor::new(context, password, kind), Encryptor::new(context, password, kind)) {
            (Ok(a), Ok(b)) => Some((a, b)),
            (Err(err), ..) | (_, Err(err)) => {
                // Legacy ciphers may be compiled out of the linked OpenSSL
                assert!(
                    !matches!(kind, CipherKind::Aes128Cfb | CipherKind::Aes192Cfb | CipherKind::Aes256Cfb),
                    "{} must be available, {}",
                    kind,
                    err
                );
                None
            }
        }
    }

    #[test]
    fn test_round_trip_chunked() {
        let context = Context::new();
        let password = "the-password";

        let mut rng = rand::thread_rng();
        let mut message = vec![0u8; 4096];
        rng.fill(&mut message[..]);

        for kind in all_kinds() {
            let (mut local, mut remote) = match new_pair(&context, password, kind) {
                Some(p) => p,
                None => continue,
            };

            // Whole
            let encrypted = local.encrypt(&message).unwrap();
            assert_eq!(encrypted.len(), kind.iv_size() + message.len(), "{}", kind);
            let decrypted = remote.decrypt(&encrypted).unwrap();
            assert_eq!(&decrypted[..], &message[..], "{}", kind);

            // 1-byte chunks in both directions
            let mut encrypted = BytesMut::new();
            for b in message.chunks(1) {
                encrypted.extend_from_slice(&remote.encrypt(b).unwrap());
            }
            let mut decrypted = BytesMut::new();
            for b in encrypted.chunks(1) {
                decrypted.extend_from_slice(&local.decrypt(b).unwrap());
            }
            assert_eq!(&decrypted[..], &message[..], "{}", kind);

            // Random split points, decrypted with different split points
            let mut encrypted = BytesMut::new();
            let mut rest = &message[..];
            while !rest.is_empty() {
                let n = rng.gen_range(1..=rest.len().min(700));
                encrypted.extend_from_slice(&local.encrypt(&rest[..n]).unwrap());
                rest = &rest[n..];
            }
            let mut decrypted = BytesMut::new();
            let mut rest = &encrypted[..];
            while !rest.is_empty() {
                let n = rng.gen_range(1..=rest.len().min(513));
                decrypted.extend_from_slice(&remote.decrypt(&rest[..n]).unwrap());
                rest = &rest[n..];
            }
            assert_eq!(&decrypted[..], &message[..], "{}", kind);
        }
    }

    #[test]
    fn test_iv_sent_once() {
        let context = Context::new();
        let (mut enc, _) = Encryptor::new(&context, "pwd", CipherKind::Aes128Cfb).unwrap().into_split();

        assert!(!enc.iv_sent());
        let first = enc.encrypt(b"abc").unwrap();
        assert!(enc.iv_sent());
        let second = enc.encrypt(b"abc").unwrap();

        assert_eq!(first.len(), 16 + 3);
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn test_partial_iv() {
        let context = Context::new();
        let mut local = Encryptor::new(&context, "pwd", CipherKind::Aes256Cfb).unwrap();
        let (_, mut remote) = Encryptor::new(&context, "pwd", CipherKind::Aes256Cfb).unwrap().into_split();

        let encrypted = local.encrypt(b"hello").unwrap();

        assert!(remote.decrypt(&encrypted[..10]).unwrap().is_empty());
        assert!(!remote.iv_received());
        let decrypted = remote.decrypt(&encrypted[10..]).unwrap();
        assert!(remote.iv_received());
        assert_eq!(&decrypted[..], b"hello");
    }

    #[test]
    fn test_table_is_stateless() {
        let context = Context::new();
        let mut a = Encryptor::new(&context, "foobar!", CipherKind::Table).unwrap();
        let mut b = Encryptor::new(&context, "foobar!", CipherKind::Table).unwrap();

        let encrypted = a.encrypt(b"hello world").unwrap();
        assert_eq!(encrypted.len(), 11);
        assert_eq!(&b.decrypt(&encrypted[6..]).unwrap()[..], b"world");
        assert_eq!(&b.decrypt(&encrypted[..5]).unwrap()[..], b"hello");
    }

    #[test]
    fn test_encrypt_all() {
        let context = Context::new();

        for kind in [CipherKind::Table, CipherKind::Aes192Cfb, CipherKind::Camellia128Cfb] {
            let packet = match encrypt_all(&context, "udp", kind, b"\x01\x08\x08\x08\x08\x00\x35abc") {
                Ok(p) => p,
                Err(..) if kind == CipherKind::Camellia128Cfb => continue,
                Err(err) => panic!("{}: {}", kind, err),
            };
            assert_eq!(packet.len(), kind.iv_size() + 10);

            let plain = decrypt_all(&context, "udp", kind, &packet).unwrap();
            assert_eq!(&plain[..], b"\x01\x08\x08\x08\x08\x00\x35abc");
        }

        assert!(decrypt_all(&context, "udp", CipherKind::Aes256Cfb, b"short").is_err());
    }
}

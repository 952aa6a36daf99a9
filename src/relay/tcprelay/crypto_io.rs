//! IO facilities for TCP relay

use std::{
    io::{self, ErrorKind},
    pin::Pin,
    task::{self, Poll},
};

use bytes::{Buf, Bytes};
use futures::ready;
use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::crypto::{DecryptHalf, EncryptHalf};

use super::utils::Activity;

const READ_BUFFER_SIZE: usize = 1 << 14;

/// Reader wrapper that will decrypt data automatically
///
/// Decrypted bytes that don't fit into the caller's buffer are kept for the next read.
#[pin_project]
pub struct DecryptedReader<R> {
    #[pin]
    reader: R,
    decryptor: DecryptHalf,
    pending: Bytes,
    buffer: Box<[u8]>,
    activity: Option<Activity>,
}

impl<R> DecryptedReader<R> {
    pub fn new(reader: R, decryptor: DecryptHalf) -> DecryptedReader<R> {
        DecryptedReader {
            reader,
            decryptor,
            pending: Bytes::new(),
            buffer: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            activity: None,
        }
    }

    /// Record every read from the wrapped reader into `activity`
    pub fn with_activity(mut self, activity: Activity) -> DecryptedReader<R> {
        self.activity = Some(activity);
        self
    }

    /// Whether the peer's IV has been received
    pub fn iv_received(&self) -> bool {
        self.decryptor.iv_received()
    }
}

impl<R> AsyncRead for DecryptedReader<R>
where
    R: AsyncRead,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut task::Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();

        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending[..n]);
                this.pending.advance(n);
                return Poll::Ready(Ok(()));
            }

            let mut read_buf = ReadBuf::new(&mut this.buffer[..]);
            ready!(this.reader.as_mut().poll_read(cx, &mut read_buf))?;

            let n = read_buf.filled().len();
            if n == 0 {
                return Poll::Ready(Ok(()));
            }

            if let Some(activity) = this.activity {
                activity.touch();
            }

            // Empty while the peer's IV is still incomplete
            *this.pending = this.decryptor.decrypt(&this.buffer[..n])?;
        }
    }
}

/// Writer wrapper that will encrypt data automatically
///
/// A buffer is encrypted as a whole and the call only completes once all of its ciphertext
/// has been written, so the caller must retry with the same buffer after `Pending`.
#[pin_project]
pub struct EncryptedWriter<W> {
    #[pin]
    writer: W,
    encryptor: EncryptHalf,
    state: EncryptWriteState,
    activity: Option<Activity>,
}

enum EncryptWriteState {
    AssemblePacket,
    Writing { data: Bytes, plain_len: usize },
}

impl<W> EncryptedWriter<W> {
    pub fn new(writer: W, encryptor: EncryptHalf) -> EncryptedWriter<W> {
        EncryptedWriter {
            writer,
            encryptor,
            state: EncryptWriteState::AssemblePacket,
            activity: None,
        }
    }

    /// Record every write into the wrapped writer into `activity`
    pub fn with_activity(mut self, activity: Activity) -> EncryptedWriter<W> {
        self.activity = Some(activity);
        self
    }

    /// Whether the session IV has been written
    pub fn iv_sent(&self) -> bool {
        self.encryptor.iv_sent()
    }
}

impl<W> AsyncWrite for EncryptedWriter<W>
where
    W: AsyncWrite,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut task::Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut this = self.project();

        loop {
            match *this.state {
                EncryptWriteState::AssemblePacket => {
                    let data = this.encryptor.encrypt(buf)?;
                    *this.state = EncryptWriteState::Writing {
                        data,
                        plain_len: buf.len(),
                    };
                }
                EncryptWriteState::Writing {
                    ref mut data,
                    plain_len,
                } => {
                    while !data.is_empty() {
                        let n = ready!(this.writer.as_mut().poll_write(cx, &data[..]))?;
                        if n == 0 {
                            return Poll::Ready(Err(ErrorKind::WriteZero.into()));
                        }
                        data.advance(n);

                        if let Some(activity) = this.activity {
                            activity.touch();
                        }
                    }

                    *this.state = EncryptWriteState::AssemblePacket;
                    return Poll::Ready(Ok(plain_len));
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        self.project().writer.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        self.project().writer.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::{
        context::Context,
        crypto::{CipherKind, Encryptor},
    };

    #[tokio::test]
    async fn test_encrypted_stream() {
        let context = Context::new();
        let (enc, _) = Encryptor::new(&context, "p@ss", CipherKind::Aes256Cfb).unwrap().into_split();
        let (_, dec) = Encryptor::new(&context, "p@ss", CipherKind::Aes256Cfb).unwrap().into_split();

        let (client, server) = tokio::io::duplex(64);

        let mut writer = EncryptedWriter::new(client, enc);
        let mut reader = DecryptedReader::new(server, dec);

        let message = (0..5000u32).map(|i| (i % 251) as u8).collect::<Vec<u8>>();
        let expected = message.clone();

        let writing = tokio::spawn(async move {
            writer.write_all(&message).await.unwrap();
            writer.write_all(b"tail").await.unwrap();
            assert!(writer.iv_sent());
            writer.shutdown().await.unwrap();
        });

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        writing.await.unwrap();

        assert!(reader.iv_received());
        assert_eq!(&received[..expected.len()], &expected[..]);
        assert_eq!(&received[expected.len()..], b"tail");
    }

    #[tokio::test]
    async fn test_decrypted_reader_small_buffer() {
        let context = Context::new();
        let mut enc = Encryptor::new(&context, "p@ss", CipherKind::Table).unwrap();
        let (_, dec) = Encryptor::new(&context, "p@ss", CipherKind::Table).unwrap().into_split();

        let encrypted = enc.encrypt(b"hello world").unwrap();
        let mut reader = DecryptedReader::new(&encrypted[..], dec);

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hell");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(&rest[..], b"o world");
    }
}

//! Utilities for TCP relay
//!
//! The `CopyBuffer` and `Copy` are borrowed from the [tokio](https://github.com/tokio-rs/tokio) project.
//! LICENSE MIT

use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::{
    future::{self, Either},
    ready,
};
use log::{debug, trace};
use pin_project::pin_project;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf},
    net::TcpStream,
    time::{self, Instant},
};

use crate::relay::socks5::Address;

/// Stream cipher uses 16K buffer
const COPY_BUFFER_SIZE: usize = 1 << 14;

/// Last time any byte of a session was transferred
///
/// Cloned into both directions of a tunnel, which touch it whenever they move data.
#[derive(Clone)]
pub struct Activity {
    inner: Arc<ActivityInner>,
}

struct ActivityInner {
    start: Instant,
    last_active_ms: AtomicU64,
}

impl Activity {
    pub fn new() -> Activity {
        Activity {
            inner: Arc::new(ActivityInner {
                start: Instant::now(),
                last_active_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Mark the session active now
    pub fn touch(&self) {
        let elapsed = self.inner.start.elapsed().as_millis() as u64;
        self.inner.last_active_ms.fetch_max(elapsed, Ordering::AcqRel);
    }

    /// Time since the last transfer
    pub fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.inner.last_active_ms.load(Ordering::Acquire));
        self.inner.start.elapsed().saturating_sub(last)
    }

    /// Completes once the session has been idle for `timeout`
    pub async fn expired(&self, timeout: Duration) {
        loop {
            let idle = self.idle();
            if idle >= timeout {
                return;
            }
            time::sleep(timeout - idle).await;
        }
    }
}

impl Default for Activity {
    fn default() -> Activity {
        Activity::new()
    }
}

struct CopyBuffer {
    read_done: bool,
    pos: usize,
    cap: usize,
    amt: u64,
    buf: Box<[u8]>,
}

impl CopyBuffer {
    fn new(buffer_size: usize) -> CopyBuffer {
        CopyBuffer {
            read_done: false,
            pos: 0,
            cap: 0,
            amt: 0,
            buf: vec![0; buffer_size].into_boxed_slice(),
        }
    }

    fn poll_copy<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<io::Result<u64>>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        loop {
            // If our buffer is empty, then we need to read some data to
            // continue. Nothing is read while a write is still pending.
            if self.pos == self.cap && !self.read_done {
                let me = &mut *self;
                let mut buf = ReadBuf::new(&mut me.buf);
                ready!(reader.as_mut().poll_read(cx, &mut buf))?;
                let n = buf.filled().len();
                if n == 0 {
                    self.read_done = true;
                } else {
                    self.pos = 0;
                    self.cap = n;
                }
            }

            // If our buffer has some data, let's write it out!
            while self.pos < self.cap {
                let me = &mut *self;
                let i = ready!(writer.as_mut().poll_write(cx, &me.buf[me.pos..me.cap]))?;
                if i == 0 {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write zero byte into writer",
                    )));
                } else {
                    self.pos += i;
                    self.amt += i as u64;
                }
            }

            // EOF from the reader, half-close the writer
            if self.pos == self.cap && self.read_done {
                ready!(writer.as_mut().poll_flush(cx))?;
                ready!(writer.as_mut().poll_shutdown(cx))?;
                return Poll::Ready(Ok(self.amt));
            }
        }
    }
}

/// A future that asynchronously copies the entire contents of a reader into a
/// writer, then shuts the writer down.
#[pin_project]
#[must_use = "futures do nothing unless you `.await` or poll them"]
struct Copy<'a, R: ?Sized, W: ?Sized> {
    #[pin]
    reader: &'a mut R,
    #[pin]
    writer: &'a mut W,
    buf: CopyBuffer,
}

impl<R, W> Future for Copy<'_, R, W>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    type Output = io::Result<u64>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.project();
        this.buf.poll_copy(cx, this.reader, this.writer)
    }
}

/// Copy data from encrypted reader to plain writer
pub async fn copy_from_encrypted<ER, PW>(reader: &mut ER, writer: &mut PW) -> io::Result<u64>
where
    ER: AsyncRead + Unpin + ?Sized,
    PW: AsyncWrite + Unpin + ?Sized,
{
    Copy {
        reader,
        writer,
        buf: CopyBuffer::new(COPY_BUFFER_SIZE),
    }
    .await
}

/// Copy data from plain reader to encrypted writer
pub async fn copy_to_encrypted<PR, EW>(reader: &mut PR, writer: &mut EW) -> io::Result<u64>
where
    PR: AsyncRead + Unpin + ?Sized,
    EW: AsyncWrite + Unpin + ?Sized,
{
    Copy {
        reader,
        writer,
        buf: CopyBuffer::new(COPY_BUFFER_SIZE),
    }
    .await
}

/// Pipe a plain stream and an encrypted stream until both directions reach EOF
///
/// An error in either direction, or `timeout` without any transfer recorded in
/// `activity`, ends both directions.
#[allow(clippy::too_many_arguments)]
pub async fn establish_tcp_tunnel<PR, PW, ER, EW>(
    plain_reader: &mut PR,
    plain_writer: &mut PW,
    encrypted_reader: &mut ER,
    encrypted_writer: &mut EW,
    activity: &Activity,
    timeout: Duration,
    peer_addr: SocketAddr,
    target_addr: &Address,
) -> io::Result<()>
where
    PR: AsyncRead + Unpin + ?Sized,
    PW: AsyncWrite + Unpin + ?Sized,
    ER: AsyncRead + Unpin + ?Sized,
    EW: AsyncWrite + Unpin + ?Sized,
{
    let p2e = copy_to_encrypted(plain_reader, encrypted_writer);
    let e2p = copy_from_encrypted(encrypted_reader, plain_writer);

    let tunnel = future::try_join(p2e, e2p);
    let idle = activity.expired(timeout);

    tokio::pin!(tunnel);
    tokio::pin!(idle);

    debug!("established tcp tunnel {} <-> {}", peer_addr, target_addr);

    match future::select(tunnel, idle).await {
        Either::Left((Ok((tx, rx)), ..)) => {
            trace!(
                "tcp tunnel {} <-> {} closed, tx: {} bytes, rx: {} bytes",
                peer_addr,
                target_addr,
                tx,
                rx
            );
        }
        Either::Left((Err(err), ..)) => {
            trace!(
                "tcp tunnel {} <-> {} closed with error: {}",
                peer_addr,
                target_addr,
                err
            );
        }
        Either::Right(..) => {
            debug!(
                "tcp tunnel {} <-> {} closed after {:?} of inactivity",
                peer_addr, target_addr, timeout
            );
        }
    }

    Ok(())
}

/// Connect to `addr`, resolving domain names
pub async fn connect_tcp_stream(addr: &Address) -> io::Result<TcpStream> {
    trace!("connecting {}", addr);

    match *addr {
        Address::SocketAddress(ref sa) => TcpStream::connect(sa).await,
        Address::DomainNameAddress(ref dn, port) => TcpStream::connect((dn.as_str(), port)).await,
    }
}

/// Read and discard everything until EOF
///
/// Fails with `TimedOut` once nothing has been received for `timeout`.
pub async fn ignore_until_end<R>(reader: &mut R, timeout: Duration) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 2048];

    loop {
        let n = match time::timeout(timeout, reader.read(&mut buffer)).await {
            Ok(r) => r?,
            Err(..) => return Err(io::ErrorKind::TimedOut.into()),
        };
        if n == 0 {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_activity_expired() {
        let activity = Activity::new();

        time::sleep(Duration::from_secs(3)).await;
        activity.touch();
        assert!(activity.idle() < Duration::from_secs(1));

        let start = Instant::now();
        activity.expired(Duration::from_secs(10)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignore_until_end_idle() {
        let (mut a, mut b) = tokio::io::duplex(64);

        let holding = tokio::spawn(async move { ignore_until_end(&mut b, Duration::from_secs(5)).await });

        time::sleep(Duration::from_secs(3)).await;
        a.write_all(b"keepalive").await.unwrap();
        time::sleep(Duration::from_secs(3)).await;
        assert!(!holding.is_finished());

        let err = holding.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        drop(a);
    }

    #[tokio::test]
    async fn test_ignore_until_end_eof() {
        let (mut a, mut b) = tokio::io::duplex(64);

        a.write_all(b"discarded").await.unwrap();
        drop(a);

        ignore_until_end(&mut b, Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_half_close() {
        let (mut a, b) = tokio::io::duplex(64);
        let (mut c, mut d) = tokio::io::duplex(64);

        let (mut br, _bw) = tokio::io::split(b);
        let copying = tokio::spawn(async move { copy_to_encrypted(&mut br, &mut c).await });

        a.write_all(b"0123456789abcdefghijklmnopqrstuvwxyz").await.unwrap();
        a.shutdown().await.unwrap();

        let mut received = Vec::new();
        d.read_to_end(&mut received).await.unwrap();
        assert_eq!(&received[..], b"0123456789abcdefghijklmnopqrstuvwxyz");
        assert_eq!(copying.await.unwrap().unwrap(), 36);
    }
}

//! Remote side of the TCP relay

use std::{
    fmt,
    io::{self, ErrorKind},
    net::SocketAddr,
    time::Duration,
};

use log::{debug, error, trace, warn};
use tokio::{net::TcpStream, time};

use crate::{
    context::SharedContext,
    crypto::{CipherKind, Encryptor},
    relay::socks5::{Address, Error as Socks5Error},
};

use super::{
    crypto_io::{DecryptedReader, EncryptedWriter},
    utils::{connect_tcp_stream, establish_tcp_tunnel, Activity},
};

/// Timeout of connecting to the destination
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Stage of a remote session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitHeader = 0,
    HeaderCached = 4,
    Piping = 5,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

/// One client connection of a server instance
pub struct TcpServerClient {
    context: SharedContext,
    password: String,
    method: CipherKind,
    timeout: Duration,
    peer_addr: SocketAddr,
    stream: TcpStream,
}

impl TcpServerClient {
    pub fn new(
        context: SharedContext,
        password: String,
        method: CipherKind,
        timeout: Duration,
        peer_addr: SocketAddr,
        stream: TcpStream,
    ) -> TcpServerClient {
        TcpServerClient {
            context,
            password,
            method,
            timeout,
            peer_addr,
            stream,
        }
    }

    pub async fn serve(self) -> io::Result<()> {
        let TcpServerClient {
            context,
            password,
            method,
            timeout,
            peer_addr,
            mut stream,
        } = self;

        let encryptor = Encryptor::new(&context, &password, method)?;
        let (enc, dec) = encryptor.into_split();

        let activity = Activity::new();

        let (lr, lw) = stream.split();
        let mut local_reader = DecryptedReader::new(lr, dec).with_activity(activity.clone());

        trace!("tcp server {} stage {}", peer_addr, Stage::AwaitHeader);

        let target_addr = match time::timeout(timeout, Address::read_from(&mut local_reader)).await {
            Ok(Ok(a)) => a,
            Ok(Err(Socks5Error::IoError(ref err))) if err.kind() == ErrorKind::UnexpectedEof => {
                debug!("tcp server {} closed before sending a complete header", peer_addr);
                return Ok(());
            }
            Ok(Err(err)) => {
                error!(
                    "can't parse header, maybe wrong method or password. peer: {}, error: {}",
                    peer_addr, err
                );
                return Err(err.into());
            }
            Err(..) => {
                warn!("tcp server {} timed out waiting for header", peer_addr);
                return Err(ErrorKind::TimedOut.into());
            }
        };

        // Bytes beyond the header stay in `local_reader`, and reading stops while connecting
        trace!(
            "tcp server {} stage {}, connecting {}",
            peer_addr,
            Stage::HeaderCached,
            target_addr
        );

        let mut remote_stream = match time::timeout(CONNECT_TIMEOUT, connect_tcp_stream(&target_addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(err)) => {
                error!(
                    "tcp server {} failed to connect {}, error: {}",
                    peer_addr, target_addr, err
                );
                return Err(err);
            }
            Err(..) => {
                error!("tcp server {} connect {} timed out", peer_addr, target_addr);
                return Err(ErrorKind::TimedOut.into());
            }
        };

        trace!("tcp server {} stage {}", peer_addr, Stage::Piping);

        let mut local_writer = EncryptedWriter::new(lw, enc).with_activity(activity.clone());
        let (mut rr, mut rw) = remote_stream.split();

        establish_tcp_tunnel(
            &mut rr,
            &mut rw,
            &mut local_reader,
            &mut local_writer,
            &activity,
            timeout,
            peer_addr,
            &target_addr,
        )
        .await
    }
}

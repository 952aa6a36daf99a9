//! Local side of the TCP relay, accepts SOCKS5 clients

use std::{
    fmt,
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use bytes::BytesMut;
use log::{debug, error, trace, warn};
use tokio::{io::AsyncWriteExt, net::TcpStream, time};

use crate::{
    config::{pick_server, ServerConfig},
    context::SharedContext,
    crypto::Encryptor,
    relay::socks5::{
        self,
        Address,
        Command,
        Error as Socks5Error,
        HandshakeRequest,
        HandshakeResponse,
        Reply,
        TcpRequestHeader,
        TcpResponseHeader,
    },
};

use super::{
    crypto_io::{DecryptedReader, EncryptedWriter},
    utils::{connect_tcp_stream, establish_tcp_tunnel, ignore_until_end, Activity},
};

/// Bound address sent back to clients after CONNECT succeeded
const CONNECT_REPLY_ADDR: (Ipv4Addr, u16) = (Ipv4Addr::UNSPECIFIED, 2222);

/// Stage of a local session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    GreetingPending = 0,
    AwaitRequest = 1,
    ForwardingHeader = 4,
    Piping = 5,
    UdpAssociated = 10,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

/// SOCKS5 client handler of a local instance
pub struct Socks5TcpHandler {
    context: SharedContext,
    udp_associate_addr: SocketAddr,
    servers: Arc<Vec<ServerConfig>>,
    timeout: Duration,
}

impl Socks5TcpHandler {
    pub fn new(
        context: SharedContext,
        udp_associate_addr: SocketAddr,
        servers: Arc<Vec<ServerConfig>>,
        timeout: Duration,
    ) -> Socks5TcpHandler {
        Socks5TcpHandler {
            context,
            udp_associate_addr,
            servers,
            timeout,
        }
    }

    pub async fn handle_socks5_client(self, mut stream: TcpStream, peer_addr: SocketAddr) -> io::Result<()> {
        // 1. Handshake, methods offered by clients are not checked

        trace!("socks5 {} stage {}", peer_addr, Stage::GreetingPending);

        let handshake_req = match time::timeout(self.timeout, HandshakeRequest::read_from(&mut stream)).await {
            Ok(Ok(r)) => r,
            Ok(Err(Socks5Error::IoError(ref err))) if err.kind() == ErrorKind::UnexpectedEof => {
                trace!("socks5 handshake early eof. peer: {}", peer_addr);
                return Ok(());
            }
            Ok(Err(err)) => {
                error!("socks5 handshake error: {}, peer: {}", err, peer_addr);
                return Err(err.into());
            }
            Err(..) => {
                debug!("socks5 {} timed out waiting for handshake", peer_addr);
                return Err(ErrorKind::TimedOut.into());
            }
        };

        trace!("socks5 {:?} peer: {}", handshake_req, peer_addr);

        let resp = HandshakeResponse::new(socks5::SOCKS5_AUTH_METHOD_NONE);
        resp.write_to(&mut stream).await?;

        // 2. Fetch headers

        trace!("socks5 {} stage {}", peer_addr, Stage::AwaitRequest);

        let header = match time::timeout(self.timeout, TcpRequestHeader::read_from(&mut stream)).await {
            Ok(Ok(h)) => h,
            Ok(Err(Socks5Error::UnsupportedCommand(cmd))) => {
                warn!("socks5 command {:#x} is not supported, peer: {}", cmd, peer_addr);
                let rh = TcpResponseHeader::new(Reply::CommandNotSupported, unspecified_address());
                rh.write_to(&mut stream).await?;
                return Ok(());
            }
            Ok(Err(Socks5Error::AddressTypeNotSupported(atyp))) => {
                // Closed without reply
                error!("socks5 address type {:#x} is not supported, peer: {}", atyp, peer_addr);
                return Ok(());
            }
            Ok(Err(err)) => {
                error!("failed to get TcpRequestHeader: {}, peer: {}", err, peer_addr);
                return Err(err.into());
            }
            Err(..) => {
                debug!("socks5 {} timed out waiting for request", peer_addr);
                return Err(ErrorKind::TimedOut.into());
            }
        };

        trace!("socks5 {:?} peer: {}", header, peer_addr);

        let addr = header.address;

        // 3. Handle Command
        match header.command {
            Command::TcpConnect => {
                debug!("CONNECT {}", addr);

                self.handle_tcp_connect(stream, peer_addr, addr).await
            }
            Command::UdpAssociate => {
                debug!("UDP ASSOCIATE from {}", addr);

                self.handle_udp_associate(stream, peer_addr).await
            }
            Command::TcpBind => {
                warn!("BIND is not supported");
                let rh = TcpResponseHeader::new(Reply::CommandNotSupported, unspecified_address());
                rh.write_to(&mut stream).await?;

                Ok(())
            }
        }
    }

    async fn handle_tcp_connect(self, mut stream: TcpStream, peer_addr: SocketAddr, target_addr: Address) -> io::Result<()> {
        let svr_cfg = match pick_server(&self.servers) {
            Some(s) => s.clone(),
            None => {
                let rh = TcpResponseHeader::new(Reply::GeneralFailure, unspecified_address());
                let _ = rh.write_to(&mut stream).await;
                return Err(io::Error::new(ErrorKind::Other, "no server configured"));
            }
        };

        trace!("picked server {} for {} -> {}", svr_cfg.addr(), peer_addr, target_addr);

        let server_addr = Address::from(svr_cfg.addr());
        let remote = match time::timeout(self.timeout, connect_tcp_stream(&server_addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(err)) => {
                error!("failed to connect server {}, error: {}", svr_cfg.addr(), err);

                let reply = match err.kind() {
                    ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
                    ErrorKind::ConnectionAborted | ErrorKind::TimedOut => Reply::HostUnreachable,
                    _ => Reply::NetworkUnreachable,
                };

                let rh = TcpResponseHeader::new(reply, unspecified_address());
                let _ = rh.write_to(&mut stream).await;

                return Err(err);
            }
            Err(..) => {
                error!("connect server {} timed out", svr_cfg.addr());

                let rh = TcpResponseHeader::new(Reply::HostUnreachable, unspecified_address());
                let _ = rh.write_to(&mut stream).await;

                return Err(ErrorKind::TimedOut.into());
            }
        };

        // Tell the client that we are ready
        let rh = TcpResponseHeader::new(Reply::Succeeded, Address::SocketAddress(CONNECT_REPLY_ADDR.into()));
        rh.write_to(&mut stream).await?;

        trace!("sent header: {:?}", rh);

        let encryptor = Encryptor::new(&self.context, svr_cfg.password(), svr_cfg.method())?;
        let (enc, dec) = encryptor.into_split();

        let activity = Activity::new();

        let (rr, rw) = remote.into_split();
        let mut remote_reader = DecryptedReader::new(rr, dec).with_activity(activity.clone());
        let mut remote_writer = EncryptedWriter::new(rw, enc).with_activity(activity.clone());

        // Request bytes beyond the header are still in `stream` and follow the header in order
        trace!("socks5 {} stage {}", peer_addr, Stage::ForwardingHeader);

        let mut header_buf = BytesMut::with_capacity(target_addr.serialized_len());
        target_addr.write_to_buf(&mut header_buf);
        remote_writer.write_all(&header_buf).await?;

        trace!("socks5 {} stage {}", peer_addr, Stage::Piping);

        let (mut lr, mut lw) = stream.split();
        establish_tcp_tunnel(
            &mut lr,
            &mut lw,
            &mut remote_reader,
            &mut remote_writer,
            &activity,
            self.timeout,
            peer_addr,
            &target_addr,
        )
        .await
    }

    async fn handle_udp_associate(self, mut stream: TcpStream, peer_addr: SocketAddr) -> io::Result<()> {
        // shadowsocks accepts both TCP and UDP from the same address
        let rh = TcpResponseHeader::new(Reply::Succeeded, Address::SocketAddress(self.udp_associate_addr));
        rh.write_to(&mut stream).await?;

        trace!("socks5 {} stage {}", peer_addr, Stage::UdpAssociated);

        // Hold connection until EOF, or until it has been idle for `timeout`
        match ignore_until_end(&mut stream, self.timeout).await {
            Ok(()) => trace!("socks5 udp associate of {} ended", peer_addr),
            Err(err) => debug!("socks5 udp associate of {} closed, error: {}", peer_addr, err),
        }

        Ok(())
    }
}

fn unspecified_address() -> Address {
    Address::SocketAddress(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0))
}

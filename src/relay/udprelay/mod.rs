//! Relay for UDP implementation
//!
//! ## ShadowSocks UDP protocol
//!
//! SOCKS5 UDP Request and Response, between applications and the local instance
//! ```plain
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```
//!
//! shadowsocks UDP Request and Response (before encrypted)
//! ```plain
//! +------+----------+----------+----------+
//! | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +------+----------+----------+----------+
//! |  1   | Variable |    2     | Variable |
//! +------+----------+----------+----------+
//! ```
//!
//! shadowsocks UDP Request and Response (after encrypted)
//! ```plain
//! +-------+--------------+
//! |   IV  |    PAYLOAD   |
//! +-------+--------------+
//! | Fixed |   Variable   |
//! +-------+--------------+
//! ```
//!
//! Every datagram is encrypted with a fresh cipher context, so datagrams are independent of
//! each other. The `table` method has no IV.

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use tokio::net::UdpSocket;

use crate::{
    config::{pick_server, ServerConfig},
    context::SharedContext,
    crypto::{decrypt_all, CipherKind},
    relay::{
        cache::SessionCache,
        socks5::{Address, Error as Socks5Error, UdpAssociateHeader},
    },
};

pub use self::flow::{FlowKey, UdpFlow};
use self::flow::{FlowUpstream, UdpFlowContext};

mod flow;

/// The maximum UDP payload size (defined in the original shadowsocks Python)
///
/// *I cannot find any references about why clowwindy used this value as the maximum
/// Socks5 UDP ASSOCIATE packet size. The only thing I can find is
/// [here](http://support.microsoft.com/kb/822061/)*
pub const MAXIMUM_UDP_PAYLOAD_SIZE: usize = 65536;

/// Interval between two sweeps of the flow cache
pub const FLOW_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

type FlowCache = SessionCache<FlowKey, Arc<UdpFlow>>;

/// Which side of the tunnel a `UdpRelay` serves
#[derive(Debug, Clone)]
pub enum UdpRole {
    /// Accepts SOCKS5 UDP datagrams from applications and forwards them to one of `servers`
    Local { servers: Arc<Vec<ServerConfig>> },
    /// Accepts encrypted datagrams and forwards their payload to the destinations
    Remote { password: String, method: CipherKind },
}

/// UDP relay of either role
///
/// Every `(sender, destination)` pair gets its own outbound socket, kept in a
/// `SessionCache` and closed after being idle for `timeout`.
pub struct UdpRelay {
    context: SharedContext,
    role: UdpRole,
    socket: Arc<UdpSocket>,
    flows: Arc<FlowCache>,
}

impl Drop for UdpRelay {
    fn drop(&mut self) {
        self.flows.destroy();
    }
}

impl UdpRelay {
    /// Bind the listening socket on `addr`
    pub async fn bind(context: SharedContext, addr: SocketAddr, role: UdpRole, timeout: Duration) -> io::Result<UdpRelay> {
        let socket = UdpSocket::bind(addr).await?;

        Ok(UdpRelay {
            context,
            role,
            socket: Arc::new(socket),
            flows: Arc::new(SessionCache::new(timeout, FLOW_SWEEP_INTERVAL)),
        })
    }

    /// Address of the listening socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Number of live flows
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Receive and dispatch datagrams forever
    pub async fn run(&self) -> io::Result<()> {
        info!("udp relay listening on {}", self.socket.local_addr()?);

        let mut buffer = vec![0u8; MAXIMUM_UDP_PAYLOAD_SIZE];
        loop {
            let (n, peer_addr) = match self.socket.recv_from(&mut buffer).await {
                Ok(s) => s,
                Err(err) => {
                    error!("udp server recv_from failed with error: {}", err);
                    continue;
                }
            };

            let data = &buffer[..n];
            if let Err(err) = self.handle_packet(peer_addr, data) {
                debug!(
                    "udp packet from {} with {} bytes dropped, error: {}",
                    peer_addr,
                    data.len(),
                    err
                );
            }
        }
    }

    fn handle_packet(&self, peer_addr: SocketAddr, data: &[u8]) -> io::Result<()> {
        match self.role {
            UdpRole::Local { ref servers } => {
                let (header, _) = match UdpAssociateHeader::decode(data) {
                    Ok(h) => h,
                    Err(Socks5Error::UdpFragmentNotSupported(frag)) => {
                        warn!("drop a message from {} since frag {} is not 0", peer_addr, frag);
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                };

                // ATYP DST.ADDR DST.PORT DATA, encrypted with the server's key by the flow
                let payload = Bytes::copy_from_slice(&data[3..]);
                let key = FlowKey::new(peer_addr, header.address);

                self.send_packet(key, payload, || {
                    let svr_cfg = pick_server(servers)
                        .ok_or_else(|| io::Error::new(ErrorKind::Other, "no server configured"))?;
                    Ok(FlowUpstream::Server(svr_cfg.clone()))
                })
            }
            UdpRole::Remote { ref password, method } => {
                let decrypted = decrypt_all(&self.context, password, method, data)?;
                let (target_addr, header_len) = match Address::decode(&decrypted) {
                    Ok(h) => h,
                    Err(err) => {
                        error!(
                            "can't parse udp header from {}, maybe wrong method or password, error: {}",
                            peer_addr, err
                        );
                        return Ok(());
                    }
                };

                let payload = decrypted.slice(header_len..);
                let key = FlowKey::new(peer_addr, target_addr);

                self.send_packet(key, payload, || {
                    Ok(FlowUpstream::Destination {
                        password: password.clone(),
                        method,
                    })
                })
            }
        }
    }

    fn send_packet<F>(&self, key: FlowKey, payload: Bytes, make_upstream: F) -> io::Result<()>
    where
        F: FnOnce() -> io::Result<FlowUpstream>,
    {
        trace!(
            "udp relay {} -> {} with {} bytes",
            key.sender(),
            key.destination(),
            payload.len()
        );

        if let Some(flow) = self.flows.get(&key) {
            match flow.try_send(payload.clone()) {
                Ok(()) => {
                    self.flows.touch(&key);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    debug!("udp flow {} -> {} is closed, recreating", key.sender(), key.destination());
                    self.flows.delete(&key);
                }
                Err(err) => return Err(err),
            }
        }

        let flow_context = UdpFlowContext::new(
            self.context.clone(),
            key.clone(),
            make_upstream()?,
            self.socket.clone(),
            self.flows.clone(),
        );
        let flow = Arc::new(UdpFlow::spawn(flow_context));

        debug!("created udp flow {} -> {}", key.sender(), key.destination());

        self.flows.set(key, flow.clone());
        trace!("udp flows: {}", self.flows.len());

        flow.try_send(payload)
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use bytes::{BufMut, BytesMut};
    use tokio::time;

    use super::*;
    use crate::{context::Context, crypto::encrypt_all, relay::cache::Closeable};

    async fn spawn_echo_server() -> SocketAddr {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
                socket.send_to(&buf[..n], peer).await.unwrap();
            }
        });

        addr
    }

    async fn spawn_relay(role: UdpRole) -> (Arc<UdpRelay>, SocketAddr) {
        let relay = UdpRelay::bind(
            Context::new_shared(),
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0),
            role,
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        let relay = Arc::new(relay);
        let addr = relay.local_addr().unwrap();

        let r = relay.clone();
        tokio::spawn(async move { r.run().await });

        (relay, addr)
    }

    #[tokio::test]
    async fn test_remote_relay_echo() {
        let _ = env_logger::try_init();

        let context = Context::new();
        let method = CipherKind::Aes128Cfb;
        let echo_addr = spawn_echo_server().await;
        let (relay, relay_addr) = spawn_relay(UdpRole::Remote {
            password: "p@ss".to_owned(),
            method,
        })
        .await;

        let mut request = BytesMut::new();
        Address::SocketAddress(echo_addr).write_to_buf(&mut request);
        request.put_slice(b"abc");
        let encrypted = encrypt_all(&context, "p@ss", method, &request).unwrap();

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        client.send_to(&encrypted, relay_addr).await.unwrap();

        let mut buf = [0u8; 2048];
        let (n, from) = time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, relay_addr);

        let decrypted = decrypt_all(&context, "p@ss", method, &buf[..n]).unwrap();
        let (source, header_len) = Address::decode(&decrypted).unwrap();
        assert_eq!(source, Address::SocketAddress(echo_addr));
        assert_eq!(&decrypted[header_len..], b"abc");
        assert_eq!(relay.flow_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_flow_is_recreated() {
        let _ = env_logger::try_init();

        let context = Context::new();
        let method = CipherKind::Aes128Cfb;
        let echo_addr = spawn_echo_server().await;
        let (relay, relay_addr) = spawn_relay(UdpRole::Remote {
            password: "p@ss".to_owned(),
            method,
        })
        .await;

        let mut request = BytesMut::new();
        Address::SocketAddress(echo_addr).write_to_buf(&mut request);
        request.put_slice(b"abc");

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let key = FlowKey::new(client.local_addr().unwrap(), Address::SocketAddress(echo_addr));

        let mut buf = [0u8; 2048];
        for round in 0..2 {
            let encrypted = encrypt_all(&context, "p@ss", method, &request).unwrap();
            client.send_to(&encrypted, relay_addr).await.unwrap();

            let (n, _) = time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            let decrypted = decrypt_all(&context, "p@ss", method, &buf[..n]).unwrap();
            let (_, header_len) = Address::decode(&decrypted).unwrap();
            assert_eq!(&decrypted[header_len..], b"abc");
            assert_eq!(relay.flow_count(), 1);

            if round == 0 {
                // The task ends while its entry is still cached
                relay.flows.get(&key).unwrap().close();
                time::sleep(Duration::from_millis(100)).await;
                assert_eq!(relay.flow_count(), 1);
            }
        }
    }

    #[tokio::test]
    async fn test_local_relay_drops_fragments() {
        let _ = env_logger::try_init();

        let (relay, relay_addr) = spawn_relay(UdpRole::Local {
            servers: Arc::new(Vec::new()),
        })
        .await;

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let packet = [0x00, 0x00, 0x01, 0x01, 127, 0, 0, 1, 0x00, 0x50, b'x'];
        client.send_to(&packet, relay_addr).await.unwrap();

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(relay.flow_count(), 0);
    }
}

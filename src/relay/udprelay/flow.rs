//! One outbound socket per `(sender, destination)` pair

use std::{
    io::{self, ErrorKind},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, error, trace, warn};
use tokio::{
    net::{lookup_host, UdpSocket},
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::{
    config::ServerConfig,
    context::SharedContext,
    crypto::{decrypt_all, encrypt_all, CipherKind},
    relay::{cache::Closeable, socks5::Address},
};

use super::{FlowCache, MAXIMUM_UDP_PAYLOAD_SIZE};

/// Pending packets of a flow. Packets beyond it are dropped.
const FLOW_CHANNEL_SIZE: usize = 64;

/// Identity of a flow
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    sender: SocketAddr,
    destination: Address,
}

impl FlowKey {
    pub fn new(sender: SocketAddr, destination: Address) -> FlowKey {
        FlowKey { sender, destination }
    }

    /// Where the datagrams come from, and where replies go back to
    pub fn sender(&self) -> SocketAddr {
        self.sender
    }

    /// The destination requested by the sender
    pub fn destination(&self) -> &Address {
        &self.destination
    }
}

/// Where a flow sends its datagrams
pub(super) enum FlowUpstream {
    /// Local role, datagrams are encrypted for this server
    Server(ServerConfig),
    /// Remote role, plain payload goes straight to the destination and replies are encrypted
    Destination { password: String, method: CipherKind },
}

/// A live flow, owned by the flow cache
///
/// Closing it aborts the task that owns the outbound socket.
pub struct UdpFlow {
    flow_handle: JoinHandle<()>,
    sender: mpsc::Sender<Bytes>,
}

impl Closeable for UdpFlow {
    fn close(&self) {
        self.flow_handle.abort();
    }
}

impl Drop for UdpFlow {
    fn drop(&mut self) {
        self.flow_handle.abort();
    }
}

impl UdpFlow {
    pub(super) fn spawn(flow: UdpFlowContext) -> UdpFlow {
        let (sender, receiver) = mpsc::channel(FLOW_CHANNEL_SIZE);
        let flow_handle = tokio::spawn(flow.dispatch_packet(receiver));
        UdpFlow { flow_handle, sender }
    }

    /// Queue a packet without waiting
    ///
    /// Fails with `BrokenPipe` if the flow's task has already ended.
    pub fn try_send(&self, data: Bytes) -> io::Result<()> {
        match self.sender.try_send(data) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(..)) => Err(io::Error::new(ErrorKind::Other, "udp relay channel full")),
            Err(TrySendError::Closed(..)) => Err(io::Error::new(ErrorKind::BrokenPipe, "udp flow is closed")),
        }
    }
}

pub(super) struct UdpFlowContext {
    context: SharedContext,
    key: FlowKey,
    upstream: FlowUpstream,
    inbound: Arc<UdpSocket>,
    flows: Arc<FlowCache>,
}

impl Drop for UdpFlowContext {
    fn drop(&mut self) {
        debug!(
            "udp flow {} -> {} is closed",
            self.key.sender, self.key.destination
        );
    }
}

impl UdpFlowContext {
    pub(super) fn new(
        context: SharedContext,
        key: FlowKey,
        upstream: FlowUpstream,
        inbound: Arc<UdpSocket>,
        flows: Arc<FlowCache>,
    ) -> UdpFlowContext {
        UdpFlowContext {
            context,
            key,
            upstream,
            inbound,
            flows,
        }
    }

    async fn dispatch_packet(self, receiver: mpsc::Receiver<Bytes>) {
        if let Err(err) = self.relay(receiver).await {
            error!(
                "udp flow {} -> {} failed, error: {}",
                self.key.sender, self.key.destination, err
            );
            // The flow's own task is aborted by this, there is no await point left
            self.flows.delete(&self.key);
        }
    }

    async fn relay(&self, mut receiver: mpsc::Receiver<Bytes>) -> io::Result<()> {
        let target_addr = match self.upstream {
            FlowUpstream::Server(ref svr_cfg) => lookup_address(&Address::from(svr_cfg.addr())).await?,
            FlowUpstream::Destination { .. } => lookup_address(&self.key.destination).await?,
        };

        let outbound = bind_outbound(&target_addr).await?;
        trace!(
            "udp flow {} -> {} bound {} for {}",
            self.key.sender,
            self.key.destination,
            outbound.local_addr()?,
            target_addr
        );

        let mut buffer = vec![0u8; MAXIMUM_UDP_PAYLOAD_SIZE];

        loop {
            tokio::select! {
                packet = receiver.recv() => {
                    let data = match packet {
                        Some(d) => d,
                        None => {
                            trace!("udp flow {} -> {} channel closed", self.key.sender, self.key.destination);
                            return Ok(());
                        }
                    };

                    self.send_outbound_packet(&outbound, target_addr, &data).await?;
                }

                received = outbound.recv_from(&mut buffer) => {
                    let (n, addr) = received?;

                    // Keep the flow alive in the cache
                    self.flows.touch(&self.key);

                    self.send_respond_packet(addr, &buffer[..n]).await;
                }
            }
        }
    }

    async fn send_outbound_packet(&self, outbound: &UdpSocket, target_addr: SocketAddr, data: &[u8]) -> io::Result<()> {
        let packet = match self.upstream {
            FlowUpstream::Server(ref svr_cfg) => {
                match encrypt_all(&self.context, svr_cfg.password(), svr_cfg.method(), data) {
                    Ok(p) => p,
                    Err(err) => {
                        error!("udp flow {} encrypt failed, error: {}", self.key.sender, err);
                        return Ok(());
                    }
                }
            }
            FlowUpstream::Destination { .. } => Bytes::copy_from_slice(data),
        };

        let n = outbound.send_to(&packet, target_addr).await?;
        if n != packet.len() {
            warn!(
                "{} -> {} sent {} bytes != expected {} bytes",
                self.key.sender,
                target_addr,
                n,
                packet.len()
            );
        }

        trace!(
            "udp flow {} -> {} sent {} bytes to {}",
            self.key.sender,
            self.key.destination,
            n,
            target_addr
        );

        Ok(())
    }

    async fn send_respond_packet(&self, addr: SocketAddr, data: &[u8]) {
        trace!("udp flow {} <- {} received {} bytes", self.key.sender, addr, data.len());

        let packet = match self.upstream {
            FlowUpstream::Server(ref svr_cfg) => {
                let decrypted = match decrypt_all(&self.context, svr_cfg.password(), svr_cfg.method(), data) {
                    Ok(d) => d,
                    Err(err) => {
                        error!("udp flow {} <- {} decrypt failed, error: {}", self.key.sender, addr, err);
                        return;
                    }
                };

                let source = match Address::decode(&decrypted) {
                    Ok((a, _)) => a,
                    Err(err) => {
                        error!(
                            "udp flow {} <- {} has invalid header, error: {}",
                            self.key.sender, addr, err
                        );
                        return;
                    }
                };
                trace!("udp flow {} <- {} from {}", self.key.sender, addr, source);

                let mut packet = BytesMut::with_capacity(3 + decrypted.len());
                packet.put_slice(&[0x00, 0x00, 0x00]);
                packet.put_slice(&decrypted);
                packet.freeze()
            }
            FlowUpstream::Destination { ref password, method } => {
                let source = Address::SocketAddress(addr);

                let mut packet = BytesMut::with_capacity(source.serialized_len() + data.len());
                source.write_to_buf(&mut packet);
                packet.put_slice(data);

                match encrypt_all(&self.context, password, method, &packet) {
                    Ok(p) => p,
                    Err(err) => {
                        error!("udp flow {} <- {} encrypt failed, error: {}", self.key.sender, addr, err);
                        return;
                    }
                }
            }
        };

        if let Err(err) = self.inbound.send_to(&packet, self.key.sender).await {
            warn!(
                "udp failed to send back to client {}, from target {}, error: {}",
                self.key.sender, addr, err
            );
        }
    }
}

/// Resolve `addr` into the first socket address
async fn lookup_address(addr: &Address) -> io::Result<SocketAddr> {
    match *addr {
        Address::SocketAddress(sa) => Ok(sa),
        Address::DomainNameAddress(ref dname, port) => match lookup_host((dname.as_str(), port)).await?.next() {
            Some(sa) => Ok(sa),
            None => Err(io::Error::new(
                ErrorKind::Other,
                format!("dns resolved {} to nothing", dname),
            )),
        },
    }
}

/// Bind an unspecified socket of the same family as `target_addr`
async fn bind_outbound(target_addr: &SocketAddr) -> io::Result<UdpSocket> {
    let bind_addr = match *target_addr {
        SocketAddr::V4(..) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
        SocketAddr::V6(..) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
    };
    UdpSocket::bind(bind_addr).await
}

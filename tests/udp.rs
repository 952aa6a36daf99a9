use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use bytes::{BufMut, BytesMut};
use tokio::{net::UdpSocket, time};

use shadowsocks_stream::{
    config::{ServerAddr, ServerConfig},
    context::Context,
    crypto::CipherKind,
    relay::socks5::{Address, UdpAssociateHeader},
    LocalServer,
    RemoteServer,
};

const PASSWORD: &str = "test-password";

fn localhost() -> SocketAddr {
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)
}

async fn start_udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind(localhost()).await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
            socket.send_to(&buf[..n], peer).await.unwrap();
        }
    });

    addr
}

/// Starts a remote and a local instance, returns the UDP address of the local one
async fn start_tunnel(method: CipherKind) -> SocketAddr {
    let context = Context::new_shared();
    let timeout = Duration::from_secs(30);

    let remote = RemoteServer::bind(context.clone(), localhost(), PASSWORD.to_owned(), method, timeout)
        .await
        .unwrap();
    let remote_addr = remote.udp_addr().unwrap();
    tokio::spawn(remote.run());

    let servers = vec![ServerConfig::new(ServerAddr::from(remote_addr), PASSWORD, method)];
    let local = LocalServer::bind(context, localhost(), servers, timeout).await.unwrap();
    let local_addr = local.udp_addr().unwrap();
    tokio::spawn(local.run());

    local_addr
}

async fn udp_relay_echo(method: CipherKind) {
    let echo_addr = start_udp_echo_server().await;
    let local_addr = start_tunnel(method).await;

    let client = UdpSocket::bind(localhost()).await.unwrap();

    let header = UdpAssociateHeader::new(0, Address::SocketAddress(echo_addr));
    let mut packet = BytesMut::with_capacity(header.serialized_len() + 3);
    header.write_to_buf(&mut packet);
    packet.put_slice(b"abc");

    client.send_to(&packet, local_addr).await.unwrap();

    let mut buf = vec![0u8; 65536];
    let (n, from) = time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, local_addr);

    let (reply_header, header_len) = UdpAssociateHeader::decode(&buf[..n]).unwrap();
    assert_eq!(reply_header.address, Address::SocketAddress(echo_addr));
    assert_eq!(&buf[header_len..n], b"abc");
}

#[tokio::test]
async fn udp_relay_aes_cfb() {
    let _ = env_logger::try_init();
    udp_relay_echo(CipherKind::Aes128Cfb).await;
}

#[tokio::test]
async fn udp_relay_table() {
    let _ = env_logger::try_init();
    udp_relay_echo(CipherKind::Table).await;
}

#[tokio::test]
async fn udp_relay_remote_sees_plain_payload() {
    let _ = env_logger::try_init();

    // The destination receives exactly DATA, without any header
    let destination = UdpSocket::bind(localhost()).await.unwrap();
    let destination_addr = destination.local_addr().unwrap();
    let local_addr = start_tunnel(CipherKind::Aes192Cfb).await;

    let client = UdpSocket::bind(localhost()).await.unwrap();
    let header = UdpAssociateHeader::new(0, Address::SocketAddress(destination_addr));
    let mut packet = BytesMut::new();
    header.write_to_buf(&mut packet);
    packet.put_slice(b"abc");
    client.send_to(&packet, local_addr).await.unwrap();

    let mut buf = [0u8; 2048];
    let (n, _) = time::timeout(Duration::from_secs(5), destination.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"abc");
}

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time,
};

use shadowsocks_stream::{
    config::{ServerAddr, ServerConfig},
    context::Context,
    crypto::CipherKind,
    relay::socks5::Address,
    LocalServer,
    RemoteServer,
};

const PASSWORD: &str = "test-password";

fn localhost() -> SocketAddr {
    SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)
}

/// Starts a remote and a local instance, returns the SOCKS5 address of the local one
async fn start_tunnel(method: CipherKind) -> SocketAddr {
    start_tunnel_with(method, PASSWORD, PASSWORD, Duration::from_secs(30)).await
}

async fn start_tunnel_with(
    method: CipherKind,
    local_password: &str,
    remote_password: &str,
    timeout: Duration,
) -> SocketAddr {
    let context = Context::new_shared();

    let remote = RemoteServer::bind(context.clone(), localhost(), remote_password.to_owned(), method, timeout)
        .await
        .unwrap();
    let remote_addr = remote.local_addr().unwrap();
    tokio::spawn(remote.run());

    let servers = vec![ServerConfig::new(ServerAddr::from(remote_addr), local_password, method)];
    let local = LocalServer::bind(context, localhost(), servers, timeout).await.unwrap();
    let local_addr = local.local_addr().unwrap();
    tokio::spawn(local.run());

    local_addr
}

/// Reads until the peer closes. A reset counts as closed too.
async fn wait_closed(stream: &mut TcpStream, limit: Duration) {
    let mut buf = [0u8; 64];
    let n = time::timeout(limit, stream.read(&mut buf))
        .await
        .expect("stream is still open")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind(localhost()).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });

    addr
}

async fn socks5_connect(local_addr: SocketAddr, target: &Address) -> TcpStream {
    let mut stream = TcpStream::connect(local_addr).await.unwrap();

    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await.unwrap();
    assert_eq!(greeting, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00];
    let mut header = bytes::BytesMut::new();
    target.write_to_buf(&mut header);
    request.extend_from_slice(&header);
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x08, 0xAE]);

    stream
}

async fn relay_echo(method: CipherKind) {
    let echo_addr = start_echo_server().await;
    let local_addr = start_tunnel(method).await;

    let mut stream = socks5_connect(local_addr, &Address::SocketAddress(echo_addr)).await;

    let message = (0..20000u32).map(|i| (i % 253) as u8).collect::<Vec<u8>>();
    stream.write_all(&message).await.unwrap();
    stream.write_all(b"the end").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut received = Vec::new();
    time::timeout(Duration::from_secs(10), stream.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(received.len(), message.len() + 7);
    assert_eq!(&received[..message.len()], &message[..]);
    assert_eq!(&received[message.len()..], b"the end");
}

#[tokio::test]
async fn socks5_relay_aes_cfb() {
    let _ = env_logger::try_init();
    relay_echo(CipherKind::Aes256Cfb).await;
}

#[tokio::test]
async fn socks5_relay_table() {
    let _ = env_logger::try_init();
    relay_echo(CipherKind::Table).await;
}

#[tokio::test]
async fn socks5_relay_rc4_md5() {
    let _ = env_logger::try_init();
    relay_echo(CipherKind::Rc4Md5).await;
}

#[tokio::test]
async fn socks5_request_split_across_writes() {
    let _ = env_logger::try_init();

    let echo_addr = start_echo_server().await;
    let local_addr = start_tunnel(CipherKind::Aes128Cfb).await;

    let mut stream = TcpStream::connect(local_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await.unwrap();
    assert_eq!(greeting, [0x05, 0x00]);

    let port = echo_addr.port().to_be_bytes();
    stream.write_all(&[0x05, 0x01, 0x00, 0x01, 127]).await.unwrap();
    time::sleep(Duration::from_millis(50)).await;
    stream.write_all(&[0, 0, 1, port[0]]).await.unwrap();
    time::sleep(Duration::from_millis(50)).await;
    // Payload follows the port in the same write
    stream.write_all(&[port[1], b'h', b'i']).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..2], &[0x05, 0x00]);

    let mut echoed = [0u8; 2];
    time::timeout(Duration::from_secs(10), stream.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"hi");
}

#[tokio::test]
async fn socks5_bind_not_supported() {
    let _ = env_logger::try_init();

    let local_addr = start_tunnel(CipherKind::Aes128Cfb).await;

    let mut stream = TcpStream::connect(local_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await.unwrap();

    stream
        .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
        .await
        .unwrap();

    let mut reply = Vec::new();
    time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply[..2], &[0x05, 0x07]);
}

#[tokio::test]
async fn socks5_udp_associate_replies_udp_addr() {
    let _ = env_logger::try_init();

    let context = Arc::new(Context::new());
    let servers = vec![ServerConfig::new(
        ServerAddr::from(localhost()),
        PASSWORD,
        CipherKind::Aes128Cfb,
    )];
    let local = LocalServer::bind(context, localhost(), servers, Duration::from_secs(30))
        .await
        .unwrap();
    let local_addr = local.local_addr().unwrap();
    let udp_addr = local.udp_addr().unwrap();
    assert_eq!(local_addr, udp_addr);
    tokio::spawn(local.run());

    let mut stream = TcpStream::connect(local_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await.unwrap();

    stream
        .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
    assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
    assert_eq!(u16::from_be_bytes([reply[8], reply[9]]), udp_addr.port());
}

#[tokio::test]
async fn socks5_wrong_password_closes_session() {
    let _ = env_logger::try_init();

    let echo_addr = start_echo_server().await;
    let local_addr = start_tunnel_with(
        CipherKind::Aes256Cfb,
        "local-password",
        "remote-password",
        Duration::from_secs(2),
    )
    .await;

    // The local instance replies before the remote one has seen the header
    let mut stream = socks5_connect(local_addr, &Address::SocketAddress(echo_addr)).await;

    // Garbage headers fail to decode, or hit the header and connect timeouts
    wait_closed(&mut stream, Duration::from_secs(20)).await;
}

#[tokio::test]
async fn socks5_idle_tunnel_closes_both_sides() {
    let _ = env_logger::try_init();

    // Accepts one connection and never writes to it
    let listener = TcpListener::bind(localhost()).await.unwrap();
    let silent_addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        wait_closed(&mut stream, Duration::from_secs(10)).await;
        let _ = closed_tx.send(());
    });

    let local_addr = start_tunnel_with(CipherKind::Aes128Cfb, PASSWORD, PASSWORD, Duration::from_secs(1)).await;
    let mut stream = socks5_connect(local_addr, &Address::SocketAddress(silent_addr)).await;

    wait_closed(&mut stream, Duration::from_secs(5)).await;
    time::timeout(Duration::from_secs(5), closed_rx)
        .await
        .expect("destination is still connected")
        .unwrap();
}

#[tokio::test]
async fn socks5_silent_client_times_out() {
    let _ = env_logger::try_init();

    let local_addr = start_tunnel_with(CipherKind::Aes128Cfb, PASSWORD, PASSWORD, Duration::from_secs(1)).await;

    // Nothing is sent, not even the greeting
    let mut stream = TcpStream::connect(local_addr).await.unwrap();
    wait_closed(&mut stream, Duration::from_secs(4)).await;

    // Greeting only, the request never comes
    let mut stream = TcpStream::connect(local_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await.unwrap();
    assert_eq!(greeting, [0x05, 0x00]);
    wait_closed(&mut stream, Duration::from_secs(4)).await;
}

#[tokio::test]
async fn socks5_idle_udp_associate_times_out() {
    let _ = env_logger::try_init();

    let local_addr = start_tunnel_with(CipherKind::Aes128Cfb, PASSWORD, PASSWORD, Duration::from_secs(1)).await;

    let mut stream = TcpStream::connect(local_addr).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await.unwrap();

    stream
        .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply[..2], &[0x05, 0x00]);

    wait_closed(&mut stream, Duration::from_secs(4)).await;
}

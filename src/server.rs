//! Remote instance, decrypts tunnels and connects to their destinations

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    time::Duration,
};

use futures::future::{self, Either};
use log::{debug, error, info, trace};
use tokio::{
    net::{lookup_host, TcpListener},
    time,
};

use crate::{
    config::{Config, ConfigType, ServerAddr, ServerConfig},
    context::{Context, SharedContext},
    crypto::CipherKind,
    relay::{
        tcprelay::TcpServerClient,
        udprelay::{UdpRelay, UdpRole},
    },
    utils::ServerHandle,
};

/// TCP and UDP listeners of one port and password
pub struct RemoteServer {
    context: SharedContext,
    listener: TcpListener,
    udp_relay: UdpRelay,
    password: String,
    method: CipherKind,
    timeout: Duration,
}

impl RemoteServer {
    /// Bind both listeners on `addr`
    ///
    /// With port 0 the UDP relay takes the port chosen for the TCP listener.
    pub async fn bind(
        context: SharedContext,
        addr: SocketAddr,
        password: String,
        method: CipherKind,
        timeout: Duration,
    ) -> io::Result<RemoteServer> {
        let listener = TcpListener::bind(addr).await?;
        let tcp_addr = listener.local_addr()?;

        let udp_relay = UdpRelay::bind(
            context.clone(),
            tcp_addr,
            UdpRole::Remote {
                password: password.clone(),
                method,
            },
            timeout,
        )
        .await?;

        Ok(RemoteServer {
            context,
            listener,
            udp_relay,
            password,
            method,
            timeout,
        })
    }

    /// Bind on the address of `svr_cfg`, resolving domain names
    pub async fn bind_server(context: SharedContext, svr_cfg: &ServerConfig, timeout: Duration) -> io::Result<RemoteServer> {
        let addr = match *svr_cfg.addr() {
            ServerAddr::SocketAddr(sa) => sa,
            ServerAddr::DomainName(ref dname, port) => match lookup_host((dname.as_str(), port)).await?.next() {
                Some(sa) => sa,
                None => {
                    let err = io::Error::new(ErrorKind::Other, format!("dns resolved {} to nothing", dname));
                    return Err(err);
                }
            },
        };

        RemoteServer::bind(context, addr, svr_cfg.password().to_owned(), svr_cfg.method(), timeout).await
    }

    /// Address of the TCP listener
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address of the UDP relay
    pub fn udp_addr(&self) -> io::Result<SocketAddr> {
        self.udp_relay.local_addr()
    }

    /// Serve until either listener fails
    pub async fn run(self) -> io::Result<()> {
        info!(
            "shadowsocks server TCP listening on {}, UDP on {}, method {}",
            self.local_addr()?,
            self.udp_addr()?,
            self.method
        );

        let tcp_fut = self.run_tcp_server();
        let udp_fut = self.udp_relay.run();

        tokio::pin!(tcp_fut);
        tokio::pin!(udp_fut);

        match future::select(tcp_fut, udp_fut).await {
            Either::Left((res, ..)) => res,
            Either::Right((res, ..)) => res,
        }
    }

    async fn run_tcp_server(&self) -> io::Result<()> {
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(s) => s,
                Err(err) => {
                    error!("tcp server accept failed with error: {}", err);
                    time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            trace!("tcp server accepted client {}", peer_addr);

            let client = TcpServerClient::new(
                self.context.clone(),
                self.password.clone(),
                self.method,
                self.timeout,
                peer_addr,
                stream,
            );

            tokio::spawn(async move {
                if let Err(err) = client.serve().await {
                    debug!("tcp server stream aborted with error: {}", err);
                }
            });
        }
    }
}

/// Starts a remote instance for every configured server address
pub async fn run(config: Config) -> io::Result<()> {
    assert_eq!(config.config_type, ConfigType::Server);

    trace!("{:?}", config);

    if config.server.is_empty() {
        return Err(io::Error::new(ErrorKind::Other, "server instance requires servers"));
    }

    let context = Context::new_shared();
    let timeout = config.timeout();

    let mut servers = Vec::with_capacity(config.server.len());
    for svr_cfg in &config.server {
        let server = RemoteServer::bind_server(context.clone(), svr_cfg, timeout).await?;
        servers.push(server);
    }

    if servers.len() == 1 {
        if let Some(server) = servers.pop() {
            return server.run().await;
        }
    }

    let vfut = servers
        .into_iter()
        .map(|server| ServerHandle::spawn(server.run()))
        .collect::<Vec<_>>();

    let (res, ..) = future::select_all(vfut).await;
    res
}

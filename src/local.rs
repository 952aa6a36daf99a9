//! Local instance, a SOCKS5 server tunneling through remote servers

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use futures::future::{self, Either};
use log::{debug, error, info, trace};
use tokio::{net::TcpListener, time};

use crate::{
    config::{Config, ConfigType, ServerConfig},
    context::{Context, SharedContext},
    relay::{
        tcprelay::Socks5TcpHandler,
        udprelay::{UdpRelay, UdpRole},
    },
};

/// SOCKS5 TCP listener plus the UDP relay on the same address
pub struct LocalServer {
    context: SharedContext,
    listener: TcpListener,
    udp_relay: UdpRelay,
    servers: Arc<Vec<ServerConfig>>,
    timeout: Duration,
}

impl LocalServer {
    /// Bind both listeners on `addr`
    ///
    /// With port 0 the UDP relay takes the port chosen for the TCP listener.
    pub async fn bind(
        context: SharedContext,
        addr: SocketAddr,
        servers: Vec<ServerConfig>,
        timeout: Duration,
    ) -> io::Result<LocalServer> {
        let listener = TcpListener::bind(addr).await?;
        let tcp_addr = listener.local_addr()?;

        let servers = Arc::new(servers);
        let udp_relay = UdpRelay::bind(
            context.clone(),
            tcp_addr,
            UdpRole::Local {
                servers: servers.clone(),
            },
            timeout,
        )
        .await?;

        Ok(LocalServer {
            context,
            listener,
            udp_relay,
            servers,
            timeout,
        })
    }

    /// Address of the SOCKS5 TCP listener
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address of the UDP relay, which is sent to UDP ASSOCIATE clients
    pub fn udp_addr(&self) -> io::Result<SocketAddr> {
        self.udp_relay.local_addr()
    }

    /// Serve until either listener fails
    pub async fn run(self) -> io::Result<()> {
        let udp_associate_addr = self.udp_addr()?;

        info!(
            "shadowsocks socks5 TCP listening on {}, UDP on {}",
            self.local_addr()?,
            udp_associate_addr
        );

        let tcp_fut = self.run_tcp_server(udp_associate_addr);
        let udp_fut = self.udp_relay.run();

        tokio::pin!(tcp_fut);
        tokio::pin!(udp_fut);

        match future::select(tcp_fut, udp_fut).await {
            Either::Left((res, ..)) => res,
            Either::Right((res, ..)) => res,
        }
    }

    async fn run_tcp_server(&self, udp_associate_addr: SocketAddr) -> io::Result<()> {
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(s) => s,
                Err(err) => {
                    error!("socks5 accept failed with error: {}", err);
                    time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            trace!("socks5 accepted client {}", peer_addr);

            let handler = Socks5TcpHandler::new(
                self.context.clone(),
                udp_associate_addr,
                self.servers.clone(),
                self.timeout,
            );

            tokio::spawn(async move {
                if let Err(err) = handler.handle_socks5_client(stream, peer_addr).await {
                    debug!("socks5 client {} closed with error: {}", peer_addr, err);
                }
            });
        }
    }
}

/// Starts a local instance from a resolved configuration
pub async fn run(config: Config) -> io::Result<()> {
    assert_eq!(config.config_type, ConfigType::Local);

    trace!("{:?}", config);

    let local_addr = match config.local_addr {
        Some(a) => a,
        None => return Err(io::Error::new(ErrorKind::Other, "local instance requires local address")),
    };

    if config.server.is_empty() {
        return Err(io::Error::new(ErrorKind::Other, "local instance requires servers"));
    }

    for svr_cfg in &config.server {
        debug!("using server {} with method {}", svr_cfg.addr(), svr_cfg.method());
    }

    let timeout = config.timeout();
    let server = LocalServer::bind(Context::new_shared(), local_addr, config.server, timeout).await?;
    server.run().await
}

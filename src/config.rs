//! This is a mod for storing and parsing configuration
//!
//! The configuration file is in JSON format (parsed as JSON5, so comments and trailing
//! commas are accepted):
//!
//! ```json
//! {
//!     "server": "127.0.0.1",
//!     "server_port": 8388,
//!     "local_address": "127.0.0.1",
//!     "local_port": 1080,
//!     "password": "the-password",
//!     "timeout": 300,
//!     "method": "aes-256-cfb"
//! }
//! ```
//!
//! `server` and `server_port` could also be arrays. A local instance picks one server
//! randomly from `server` x `server_port` for every connection, and a `server` entry
//! written as `"host:port"` carries its own port. A server instance listens on all of
//! them, or on the ports of `port_password`, each with its own password:
//!
//! ```json
//! {
//!     "server": ["0.0.0.0", "::"],
//!     "port_password": {
//!         "8381": "foobar1",
//!         "8382": "foobar2"
//!     },
//!     "method": "aes-256-cfb"
//! }
//! ```

use std::{
    collections::HashMap,
    env,
    fmt::{self, Debug, Display, Formatter},
    fs::OpenOptions,
    io::Read,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use log::warn;
use rand::seq::SliceRandom;
use serde::Deserialize;

use crate::{crypto::CipherKind, relay::socks5::Address};

/// Default timeout of a local instance
pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(600);
/// Default timeout of a server instance
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(300);
/// Default listen address of a local instance
pub const DEFAULT_LOCAL_ADDRESS: &str = "127.0.0.1";

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(t) => vec![t],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Port written as a number or as a string
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum SSPort {
    Number(u16),
    Text(String),
}

impl SSPort {
    fn parse(&self) -> Result<u16, Error> {
        match *self {
            SSPort::Number(p) => Ok(p),
            SSPort::Text(ref s) => s.trim().parse::<u16>().map_err(|_| {
                Error::new(
                    ErrorKind::Malformed,
                    "port must be a number within 0~65535",
                    Some(s.clone()),
                )
            }),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct SSConfig {
    server: Option<OneOrMany<String>>,
    server_port: Option<OneOrMany<SSPort>>,
    port_password: Option<HashMap<String, String>>,
    local_address: Option<String>,
    local_port: Option<SSPort>,
    password: Option<String>,
    method: Option<String>,
    timeout: Option<u64>,
}

/// Values given on the command line
///
/// They replace the matching fields of the configuration file before it is resolved.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverride {
    pub server: Option<String>,
    pub server_port: Option<u16>,
    pub local_address: Option<String>,
    pub local_port: Option<u16>,
    pub password: Option<String>,
    pub method: Option<String>,
    pub timeout: Option<u64>,
}

impl ConfigOverride {
    fn apply(&self, config: &mut SSConfig) {
        if let Some(ref server) = self.server {
            config.server = Some(OneOrMany::One(server.clone()));
        }
        if let Some(port) = self.server_port {
            config.server_port = Some(OneOrMany::One(SSPort::Number(port)));
        }
        if let Some(ref local_address) = self.local_address {
            config.local_address = Some(local_address.clone());
        }
        if let Some(port) = self.local_port {
            config.local_port = Some(SSPort::Number(port));
        }
        if let Some(ref password) = self.password {
            config.password = Some(password.clone());
        }
        if let Some(ref method) = self.method {
            config.method = Some(method.clone());
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
    }
}

/// Server address
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerAddr {
    /// IP Address
    SocketAddr(SocketAddr),
    /// Domain name address, eg. example.com:8080
    DomainName(String, u16),
}

impl ServerAddr {
    /// Create from a host, either an IP address or a domain name, and a port
    pub fn from_host_port(host: &str, port: u16) -> ServerAddr {
        match host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            Ok(ip) => ServerAddr::SocketAddr(SocketAddr::new(ip, port)),
            Err(..) => ServerAddr::DomainName(host.to_owned(), port),
        }
    }

    /// Get string representation of domain
    pub fn host(&self) -> String {
        match *self {
            ServerAddr::SocketAddr(ref s) => s.ip().to_string(),
            ServerAddr::DomainName(ref dm, _) => dm.clone(),
        }
    }

    /// Get port
    pub fn port(&self) -> u16 {
        match *self {
            ServerAddr::SocketAddr(ref s) => s.port(),
            ServerAddr::DomainName(_, p) => p,
        }
    }
}

/// Parse `ServerAddr` error
#[derive(Debug)]
pub struct ServerAddrError;

impl Display for ServerAddrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid ServerAddr")
    }
}

impl std::error::Error for ServerAddrError {}

impl FromStr for ServerAddr {
    type Err = ServerAddrError;

    fn from_str(s: &str) -> Result<ServerAddr, ServerAddrError> {
        match s.parse::<SocketAddr>() {
            Ok(addr) => Ok(ServerAddr::SocketAddr(addr)),
            Err(..) => match s.rsplit_once(':') {
                Some((dn, port)) if !dn.is_empty() && !dn.contains(':') => match port.parse::<u16>() {
                    Ok(port) => Ok(ServerAddr::DomainName(dn.to_owned(), port)),
                    Err(..) => Err(ServerAddrError),
                },
                _ => Err(ServerAddrError),
            },
        }
    }
}

impl Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ServerAddr::SocketAddr(ref a) => write!(f, "{a}"),
            ServerAddr::DomainName(ref d, port) => write!(f, "{d}:{port}"),
        }
    }
}

impl From<SocketAddr> for ServerAddr {
    fn from(addr: SocketAddr) -> ServerAddr {
        ServerAddr::SocketAddr(addr)
    }
}

impl<I: Into<String>> From<(I, u16)> for ServerAddr {
    fn from((dname, port): (I, u16)) -> ServerAddr {
        ServerAddr::DomainName(dname.into(), port)
    }
}

impl From<&ServerAddr> for Address {
    fn from(addr: &ServerAddr) -> Address {
        match *addr {
            ServerAddr::SocketAddr(sa) => Address::SocketAddress(sa),
            ServerAddr::DomainName(ref dn, port) => Address::DomainNameAddress(dn.clone(), port),
        }
    }
}

/// Configuration for a server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    addr: ServerAddr,
    password: String,
    method: CipherKind,
}

impl ServerConfig {
    /// Create a new `ServerConfig`
    pub fn new<P: Into<String>>(addr: ServerAddr, password: P, method: CipherKind) -> ServerConfig {
        ServerConfig {
            addr,
            password: password.into(),
            method,
        }
    }

    /// Get server address
    pub fn addr(&self) -> &ServerAddr {
        &self.addr
    }

    /// Get password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Get method
    pub fn method(&self) -> CipherKind {
        self.method
    }
}

/// Pick one server uniformly at random
pub fn pick_server(servers: &[ServerConfig]) -> Option<&ServerConfig> {
    servers.choose(&mut rand::thread_rng())
}

/// Server config type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigType {
    /// Config for local
    ///
    /// Requires `local` configuration
    Local,

    /// Config for server
    Server,
}

impl ConfigType {
    /// Check if it is local server type
    pub fn is_local(self) -> bool {
        self == ConfigType::Local
    }

    /// Check if it is remote server type
    pub fn is_server(self) -> bool {
        self == ConfigType::Server
    }
}

/// Configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Remote ShadowSocks server configurations
    pub server: Vec<ServerConfig>,
    /// Local server's bind address
    pub local_addr: Option<SocketAddr>,
    /// Idle timeout of TCP sessions and UDP flows
    pub timeout: Option<Duration>,
    /// Config is for Client or Server
    pub config_type: ConfigType,
    /// Configuration file path, if loaded from a file
    pub config_path: Option<PathBuf>,
}

/// Read and parse a configuration file without resolving it
fn read_ssconfig(filename: &Path) -> Result<SSConfig, Error> {
    let mut reader = OpenOptions::new().read(true).open(filename)?;
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    Ok(json5::from_str::<SSConfig>(&content)?)
}

/// Configuration parsing error kind
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing required fields in JSON configuration
    MissingField,
    /// Missing some keys that must be provided together
    Malformed,
    /// Invalid value of some configuration keys
    Invalid,
    /// Invalid JSON
    JsonParsingError,
    /// `std::io::Error`
    IoError,
}

/// Configuration parsing error
pub struct Error {
    pub kind: ErrorKind,
    pub desc: &'static str,
    pub detail: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, desc: &'static str, detail: Option<String>) -> Error {
        Error { kind, desc, detail }
    }
}

macro_rules! impl_from {
    ($error:ty, $kind:expr, $desc:expr) => {
        impl From<$error> for Error {
            fn from(err: $error) -> Self {
                Error::new($kind, $desc, Some(format!("{:?}", err)))
            }
        }
    };
}

impl_from!(::std::io::Error, ErrorKind::IoError, "error while reading file");
impl_from!(json5::Error, ErrorKind::JsonParsingError, "json parse error");

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.detail {
            None => write!(f, "{}", self.desc),
            Some(ref det) => write!(f, "{} {}", self.desc, det),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.detail {
            None => f.write_str(self.desc),
            Some(ref d) => write!(f, "{}, {}", self.desc, d),
        }
    }
}

impl std::error::Error for Error {}

impl Config {
    /// Creates an empty configuration
    pub fn new(config_type: ConfigType) -> Config {
        Config {
            server: Vec::new(),
            local_addr: None,
            timeout: None,
            config_type,
            config_path: None,
        }
    }

    /// Idle timeout, or the default of the role
    pub fn timeout(&self) -> Duration {
        match self.timeout {
            Some(t) => t,
            None => match self.config_type {
                ConfigType::Local => DEFAULT_LOCAL_TIMEOUT,
                ConfigType::Server => DEFAULT_SERVER_TIMEOUT,
            },
        }
    }

    fn load_from_ssconfig(config: SSConfig, config_type: ConfigType) -> Result<Config, Error> {
        let mut nconfig = Config::new(config_type);

        let method = match config.method {
            // Missing or empty method is `table`
            None => CipherKind::Table,
            Some(ref m) => match m.parse::<CipherKind>() {
                Ok(m) => m,
                Err(..) => {
                    let err = Error::new(
                        ErrorKind::Invalid,
                        "unsupported method",
                        Some(format!("`{}` is not supported", m)),
                    );
                    return Err(err);
                }
            },
        };

        if method == CipherKind::Rc4 {
            warn!("RC4 is not safe; please use a safer cipher, like AES-256-CFB");
        }

        let hosts = config.server.map(OneOrMany::into_vec).unwrap_or_default();
        let ports = match config.server_port {
            Some(ports) => ports
                .into_vec()
                .iter()
                .map(SSPort::parse)
                .collect::<Result<Vec<u16>, Error>>()?,
            None => Vec::new(),
        };

        for host in &hosts {
            if host == "127.0.0.1" || host == "localhost" {
                warn!("server is set to {}, maybe it's not correct", host);
            }
        }

        match (config.port_password, config_type) {
            (Some(port_password), ConfigType::Server) => {
                if hosts.is_empty() {
                    let err = Error::new(
                        ErrorKind::MissingField,
                        "`port_password` requires `server` to listen on",
                        None,
                    );
                    return Err(err);
                }

                let mut port_password = port_password
                    .into_iter()
                    .map(|(port, pwd)| SSPort::Text(port).parse().map(|p| (p, pwd)))
                    .collect::<Result<Vec<(u16, String)>, Error>>()?;
                port_password.sort_by_key(|(p, _)| *p);

                for host in &hosts {
                    for (port, pwd) in &port_password {
                        let addr = ServerAddr::from_host_port(host, *port);
                        nconfig.server.push(ServerConfig::new(addr, pwd.clone(), method));
                    }
                }
            }
            (port_password, ..) => {
                if port_password.is_some() {
                    warn!("`port_password` is only used by servers, ignored");
                }

                if !hosts.is_empty() {
                    let password = match config.password {
                        Some(p) => p,
                        None if method.is_table() => String::new(),
                        None => {
                            let err = Error::new(ErrorKind::MissingField, "`password` is required", None);
                            return Err(err);
                        }
                    };

                    for host in &hosts {
                        // "host:port" carries its own port
                        if let Some(addr) = host_with_port(host) {
                            nconfig.server.push(ServerConfig::new(addr, password.clone(), method));
                            continue;
                        }

                        if ports.is_empty() {
                            let err = Error::new(
                                ErrorKind::Malformed,
                                "`server` must be used with `server_port`",
                                Some(host.clone()),
                            );
                            return Err(err);
                        }

                        for port in &ports {
                            let addr = ServerAddr::from_host_port(host, *port);
                            nconfig.server.push(ServerConfig::new(addr, password.clone(), method));
                        }
                    }
                }
            }
        }

        if config_type.is_local() {
            if let Some(port) = config.local_port {
                let port = port.parse()?;
                let local_address = config.local_address.as_deref().unwrap_or(DEFAULT_LOCAL_ADDRESS);
                let ip = match local_address.parse::<IpAddr>() {
                    Ok(ip) => ip,
                    Err(..) => {
                        let err = Error::new(
                            ErrorKind::Malformed,
                            "`local_address` must be an IP address",
                            Some(local_address.to_owned()),
                        );
                        return Err(err);
                    }
                };
                nconfig.local_addr = Some(SocketAddr::new(ip, port));
            }
        }

        nconfig.timeout = config.timeout.map(Duration::from_secs);

        Ok(nconfig)
    }

    /// Load Config from a `str`
    pub fn load_from_str(s: &str, config_type: ConfigType) -> Result<Config, Error> {
        let c = json5::from_str::<SSConfig>(s)?;
        Config::load_from_ssconfig(c, config_type)
    }

    /// Load Config from a File
    pub fn load_from_file<P: AsRef<Path>>(filename: P, config_type: ConfigType) -> Result<Config, Error> {
        Config::load_with_override(Some(filename.as_ref()), &ConfigOverride::default(), config_type)
    }

    /// Load Config from an optional file, with command line values taking precedence
    pub fn load_with_override(
        filename: Option<&Path>,
        overrides: &ConfigOverride,
        config_type: ConfigType,
    ) -> Result<Config, Error> {
        let mut ssconfig = match filename {
            Some(filename) => read_ssconfig(filename)?,
            None => SSConfig::default(),
        };

        overrides.apply(&mut ssconfig);

        let mut config = Config::load_from_ssconfig(ssconfig, config_type)?;
        config.config_path = filename.map(Path::to_owned);

        Ok(config)
    }

    /// Check if all required fields are already set
    pub fn check_integrity(&self) -> Result<(), Error> {
        if self.server.is_empty() {
            let err = Error::new(
                ErrorKind::MissingField,
                "missing any valid servers in configuration",
                None,
            );
            return Err(err);
        }

        if self.config_type.is_local() && self.local_addr.is_none() {
            let err = Error::new(
                ErrorKind::MissingField,
                "missing `local_port` for client configuration",
                None,
            );
            return Err(err);
        }

        for server in &self.server {
            if self.config_type.is_server() {
                if let ServerAddr::DomainName(..) = *server.addr() {
                    // Resolved by the listener, only checks the port here
                    if server.addr().port() == 0 {
                        let err = Error::new(ErrorKind::Invalid, "server port must not be 0", None);
                        return Err(err);
                    }
                }
            }

            if !server.method().is_table() && server.password().is_empty() {
                let err = Error::new(
                    ErrorKind::MissingField,
                    "`password` is required",
                    Some(format!("server {}", server.addr())),
                );
                return Err(err);
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                let err = Error::new(ErrorKind::Invalid, "`timeout` must be > 0", None);
                return Err(err);
            }
        }

        Ok(())
    }
}

fn host_with_port(host: &str) -> Option<ServerAddr> {
    match host.parse::<SocketAddr>() {
        Ok(sa) => Some(ServerAddr::SocketAddr(sa)),
        // "host:port", a bare IPv6 address contains more than one ':'
        Err(..) => match host.split_once(':') {
            Some((dn, port)) if !dn.is_empty() && !port.contains(':') => {
                port.parse::<u16>().ok().map(|p| ServerAddr::from_host_port(dn, p))
            }
            _ => None,
        },
    }
}

/// Default configuration file path
///
/// `config.json` in the working directory, or next to the executable.
pub fn get_default_config_path() -> Option<PathBuf> {
    let config_path = PathBuf::from("config.json");
    if config_path.exists() {
        return Some(config_path);
    }

    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let config_path = dir.join("config.json");
            if config_path.exists() {
                return Some(config_path);
            }
        }
    }

    None
}

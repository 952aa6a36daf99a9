//! shadowsocks-stream is a SOCKS5 tunnel proxy with the classic shadowsocks stream ciphers.
//!
//! ## Usage
//!
//! Build it and you will get 2 binaries: `sslocal` and `ssserver`
//!
//! Write your servers in a configuration file, for example:
//!
//! ```json
//! {
//!    "server": "my_server_ip",
//!    "server_port": 8388,
//!    "local_address": "127.0.0.1",
//!    "local_port": 1080,
//!    "password": "mypassword",
//!    "timeout": 300,
//!    "method": "aes-256-cfb"
//! }
//! ```
//!
//! Save it in file `config.json` and run local proxy server with
//!
//! ```bash
//! cargo run --bin sslocal -- -c config.json
//! ```
//!
//! Now you can use SOCKS5 protocol to proxy your requests, for example:
//!
//! ```bash
//! curl --socks5-hostname 127.0.0.1:1080 https://www.example.com
//! ```
//!
//! On the server side, you can run the server with
//!
//! ```bash
//! cargo run --bin ssserver -- -c config.json
//! ```
//!
//! ## API Usage
//!
//! ```no_run
//! use shadowsocks_stream::{run_local, Config, ConfigType};
//!
//! # async fn local() -> std::io::Result<()> {
//! let config = Config::load_from_file("config.json", ConfigType::Local).unwrap();
//! run_local(config).await
//! # }
//! ```

/// ShadowSocks version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code when server exits unexpectedly (`EX_SOFTWARE`)
pub const EXIT_CODE_SERVER_EXIT_UNEXPECTEDLY: u8 = 70;
/// Exit code when server aborted (`EX_SOFTWARE`)
pub const EXIT_CODE_SERVER_ABORTED: u8 = 70;
/// Exit code when loading configuration from file fails (`EX_CONFIG`)
pub const EXIT_CODE_LOAD_CONFIG_FAILURE: u8 = 78;
/// Exit code when insufficient params are passed via CLI (`EX_USAGE`)
pub const EXIT_CODE_INSUFFICIENT_PARAMS: u8 = 64;

pub use self::{
    config::{Config, ConfigType, ServerAddr, ServerConfig},
    local::{run as run_local, LocalServer},
    server::{run as run_server, RemoteServer},
};

pub mod config;
pub mod context;
pub mod crypto;
pub mod local;
#[cfg(feature = "logging")]
pub mod logging;
pub mod monitor;
pub mod relay;
pub mod server;
pub mod service;
mod utils;

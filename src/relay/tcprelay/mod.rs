//! TCP relay

pub use self::{
    crypto_io::{DecryptedReader, EncryptedWriter},
    local::Socks5TcpHandler,
    server::TcpServerClient,
};

pub mod crypto_io;
pub mod local;
pub mod server;
pub mod utils;

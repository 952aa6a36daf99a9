//! Relay server in local and server side implementations.

pub use self::socks5::Address;

pub mod cache;
pub mod inet;
pub mod socks5;
pub mod tcprelay;
pub mod udprelay;

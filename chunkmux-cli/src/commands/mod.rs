pub mod http_proxy;
pub mod relay;
pub mod socks;
pub mod version;

mod client;

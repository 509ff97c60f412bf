#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for chunkmux
//!
//! Each test runs a relay and a client session on loopback and drives
//! real TCP connections through them.

mod concurrent_test;
mod connect_test;
mod session_test;
mod socks_test;
mod tls_test;

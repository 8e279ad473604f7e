//! zipline: quick file, directory, and text transfer over the local network.
//!
//! One process owns one session: either sharing a payload (`send`) or
//! collecting uploads (`host`). Access is gated by an opaque token embedded in
//! the URL path, and sessions are advertised over mDNS so peers can find them
//! without typing addresses.

pub mod auth;
pub mod cli;
pub mod client;
pub mod network;
pub mod server;
pub mod ui;

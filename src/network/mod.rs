//! Local-network concerns: interface selection and mDNS discovery.

pub mod discovery;
pub mod interface;

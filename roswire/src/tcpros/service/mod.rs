//! Request/response TCPROS variant used by services.

pub mod client;
pub mod server;

/// Status byte prefixing every service response on the wire.
pub(crate) const RPC_SUCCESS: u8 = 1;
pub(crate) const RPC_FAILURE: u8 = 0;

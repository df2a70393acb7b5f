//! The node's slave XML-RPC API: server plumbing and method handlers.

mod handler;
pub mod router;
pub mod server;

use dxr::{TryFromParams, Value};

use crate::xmlrpc::protocol::ApiError;

fn decode_params<R: TryFromParams>(values: &[Value]) -> Result<R, ApiError> {
    R::try_from_params(values).map_err(|e| ApiError::invalid(format!("Invalid parameters: {e}")))
}

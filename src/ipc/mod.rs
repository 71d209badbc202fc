//! Line-delimited JSON request surface of the `flockportd` sidecar.

mod error;
mod handlers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};

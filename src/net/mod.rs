//! Request/response types and the network collaborator.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Destination, Headers, Request, RequestMode, Response, ResponseSource};

//! Backend module.

mod upstream;

pub use upstream::{UpstreamBackend, UpstreamRequest, UpstreamResponse};

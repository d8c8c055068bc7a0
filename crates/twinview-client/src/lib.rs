//! Twinview Client - Model API request/response contract
//!
//! The model API lists translatable models, accepts uploads and reports
//! translation status. [`ModelApi`] is the contract the session layer
//! consumes; [`HttpModelApi`] speaks it over HTTP.

mod api;
mod http;

pub use api::{ApiError, ModelApi};
pub use http::HttpModelApi;

//! HTTP request handlers for the REST API.

pub mod actions;
pub mod runs;

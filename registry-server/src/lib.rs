//! DDO registry server: an HTTP service that authorizes and applies
//! mutations to registered DID Documents.

pub mod auth;
pub mod config;
pub mod error;
pub mod registry;
pub mod routes;
pub mod schema;
pub mod server;
pub mod store;

#[cfg(test)]
mod tests;

#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! HTTP delivery surface for the dialtone device provisioning API.
//!
//! Layout: `http/` (router, handlers, problem responses), `models.rs`
//! (request/response DTOs and body extraction), `store.rs` (the facade the
//! handlers are written against), `state.rs` (shared application state),
//! `error.rs` (bootstrap/serve errors).

pub mod error;
pub mod http;
pub mod models;
mod state;
pub mod store;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
pub use store::{DeviceFacade, SharedStore};

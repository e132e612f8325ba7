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

//! Data access layer for the `ast_config` device table: migrations and the
//! category/variable reconciliation store.

pub mod devices;
pub mod error;

pub use devices::{
    CreateOutcome, DeleteOutcome, DeviceStore, DeviceSummaryRow, DeviceVariableRow, MergeOutcome,
};
pub use error::{DataError, Result as DataResult};

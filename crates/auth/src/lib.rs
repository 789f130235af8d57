//! Access credential lifecycle for the upstream web chat.
//!
//! The [`CredentialCoordinator`] caches access credentials per refresh
//! credential and collapses concurrent refreshes into a single upstream call.
//! The [`kimi`] module holds the HTTP refresher and the browser-like request
//! headers shared by every upstream call.

pub mod coordinator;
pub mod kimi;

pub use coordinator::CredentialCoordinator;
pub use kimi::KimiRefresher;

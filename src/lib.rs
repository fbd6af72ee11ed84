//! citecache library
//!
//! Fetches bibliographic records from a citation-library web API, keeps them in
//! a local cache and decides per request whether the cached copy is still good.
//! [`request::LibraryClient`] is the entry point.

pub mod accounts;
pub mod address;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod freshness;
pub mod normalize;
pub mod remote;
pub mod request;

pub use error::RequestError;
pub use request::{LibraryClient, Payload, RequestMode, RequestOutput, ResourceKind};

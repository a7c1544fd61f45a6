//! An implementation of a validator-based (ETag) HTTP response cache.
//!
//! The cache sits between an application and its HTTP transport and applies
//! the conditional-request protocol transparently:
//!
//! * `GET` responses that carry an `ETag` and a non-empty body are stored in
//!   an externally supplied key-value store.
//! * Later `GET`s for the same resource are sent with `If-None-Match`; a
//!   `304 Not Modified` reply is answered with the stored response, so the
//!   raw 304 never reaches the caller.
//! * A `GET` response with an `ETag` but no content evicts the entry.
//! * `POST`, `PUT`, and `DELETE` evict the entry for the resource before
//!   they are dispatched, regardless of the outcome.
//!
//! Cacheable response bodies are buffered in memory in full; everything else
//! streams through untouched. This crate implements only the validator
//! protocol: there is no `Cache-Control` parsing, no freshness model, and no
//! `Vary` handling.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

mod body;
mod cache;
pub mod store;

pub use body::*;
pub use cache::*;
// Re-export the http crate.
pub use http;
// Re-export the http-body crate.
pub use http_body;

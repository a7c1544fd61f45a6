//! Implementation of the cache store seam.

use bytes::Bytes;
use http::HeaderMap;
use http::Response;
use http::StatusCode;
use http::Version;
use serde::Deserialize;
use serde::Serialize;

use crate::body::Body;
use crate::body::HttpBody;

mod memory;

pub use memory::*;

/// A trait implemented on cache stores.
///
/// Store keys are strings of hexadecimal characters (see
/// [`resource_key`][crate::resource_key]).
///
/// Implementations do not need to be thread-safe: the cache serializes every
/// operation behind a single lock, held per operation and never across
/// transport I/O.
pub trait CacheStore: Send + 'static {
    /// Checks whether an entry exists for the given key.
    fn contains_key(&self, key: &str) -> bool;

    /// Gets the entry for the given key.
    fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Puts an entry into the store for the given key.
    ///
    /// Any previous entry for the key is replaced whole, never merged.
    fn put(&mut self, key: String, entry: CacheEntry);

    /// Removes the entry for the given key.
    ///
    /// Returns `true` if an entry was removed.
    fn remove(&mut self, key: &str) -> bool;
}

/// Represents a cached exchange for a resource.
///
/// An entry exists in a store if and only if the last cacheable exchange for
/// the resource returned a validator and a non-empty body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The `ETag` value exactly as returned by the origin, quoting included.
    pub validator: String,

    /// The response to replay while the validator remains current.
    pub response: StoredResponse,
}

/// Represents a fully materialized cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    /// The response's status.
    #[serde(with = "http_serde::status_code")]
    pub status: StatusCode,

    /// The response's version.
    #[serde(with = "http_serde::version")]
    pub version: Version,

    /// The response's headers.
    #[serde(with = "http_serde::header_map")]
    pub headers: HeaderMap,

    /// The response's body.
    pub body: Bytes,
}

impl StoredResponse {
    /// Builds a response that replays the stored body.
    ///
    /// Every call on a clone of the stored response yields an independently
    /// readable body.
    pub fn into_response<B: HttpBody>(self) -> Response<Body<B>> {
        let mut builder = Response::builder().status(self.status).version(self.version);
        let headers = builder.headers_mut().expect("builder should be valid");
        headers.extend(self.headers);
        builder
            .body(Body::from_bytes(self.body))
            .expect("response should be valid")
    }
}

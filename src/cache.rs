//! Implementation of the conditional caching layer.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use anyhow::Context as _;
use anyhow::Result;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::Response;
use http::StatusCode;
use http::Uri;
use http::header;
use sha2::Digest;
use sha2::Sha256;
use tracing::debug;

use crate::body::Body;
use crate::body::HttpBody;
use crate::store::CacheEntry;
use crate::store::CacheStore;
use crate::store::StoredResponse;

/// The name of the `x-cache` custom header.
///
/// Value will be `HIT` if the response body was served from the store, `MISS`
/// if not.
pub const X_CACHE: &str = "x-cache";

/// Gets the store key for a resource.
///
/// The key is derived from the normalized URI only, never from the method, so
/// a mutating request addresses the same entry that a `GET` for the resource
/// cached.
pub fn resource_key(uri: &Uri) -> String {
    let mut hasher = Sha256::new();

    if let Some(scheme) = uri.scheme_str() {
        hasher.update(scheme);
    }

    hasher.update("://");
    if let Some(authority) = uri.authority() {
        hasher.update(authority.as_str());
    }

    hasher.update(uri.path());

    if let Some(query) = uri.query() {
        hasher.update("?");
        hasher.update(query);
    }

    let bytes = hasher.finalize();
    hex::encode(bytes)
}

/// Represents a cache status.
///
/// Used in the custom header `x-cache`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// The response body was served from the store.
    Hit,
    /// The response body was not served from the store.
    Miss,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Miss => write!(f, "MISS"),
        }
    }
}

/// An extension trait for [`Response`].
trait ResponseExt {
    /// Sets the cache status header of the response.
    fn set_cache_status(&mut self, status: CacheStatus);
}

impl<B> ResponseExt for Response<B> {
    fn set_cache_status(&mut self, status: CacheStatus) {
        self.headers_mut().insert(
            X_CACHE,
            status.to_string().parse().expect("value should parse"),
        );
    }
}

/// The caching policy applied to a request, decided by its method.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum MethodPolicy {
    /// The single cacheable method (`GET`); runs the conditional exchange.
    Read,
    /// Methods that change server state (`POST`, `PUT`, `DELETE`); any stored
    /// entry for the resource is evicted before dispatch.
    Mutate,
    /// Every other method; passes through without touching the store.
    Other,
}

impl MethodPolicy {
    /// Classifies a request method.
    fn of(method: &Method) -> Self {
        match *method {
            Method::GET => Self::Read,
            Method::POST | Method::PUT | Method::DELETE => Self::Mutate,
            _ => Self::Other,
        }
    }
}

/// An abstraction of an HTTP request.
///
/// This trait is used in HTTP middleware integrations to abstract the request
/// type and sending the request upstream.
pub trait Request<B: HttpBody>: Send {
    /// Gets the request's method.
    fn method(&self) -> &Method;

    /// Gets the request's URI.
    fn uri(&self) -> &Uri;

    /// Gets the request's headers.
    fn headers(&self) -> &HeaderMap;

    /// Sends the request to upstream and gets the response.
    ///
    /// If `headers` is `Some`, the supplied headers should override any
    /// matching headers in the original request.
    ///
    /// May be called more than once: every call dispatches a fresh exchange.
    fn send(
        &mut self,
        headers: Option<HeaderMap>,
    ) -> impl Future<Output = Result<Response<B>>> + Send;
}

/// Builds the conditional header set for a cached validator.
///
/// Returns `None` if the validator cannot be carried in a header, in which
/// case the request is sent unconditionally.
fn conditional_headers(validator: &str) -> Option<HeaderMap> {
    let value = HeaderValue::from_str(validator).ok()?;
    let mut headers = HeaderMap::with_capacity(1);
    headers.insert(header::IF_NONE_MATCH, value);
    Some(headers)
}

/// Options controlling cache behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// The largest response body, in bytes, that will be stored.
    ///
    /// Responses with larger bodies are delivered to the caller but not
    /// cached.
    ///
    /// `None` applies no limit.
    pub max_body_bytes: Option<u64>,
}

/// Implements a validator-based HTTP cache.
///
/// The cache wraps an externally supplied store and decorates requests sent
/// through [`send`][Self::send] with the `If-None-Match`/`ETag` conditional
/// protocol.
pub struct Cache<S> {
    /// The shared cache store.
    ///
    /// The lock is held for the duration of an individual store operation,
    /// never across transport I/O.
    store: Arc<Mutex<S>>,
    /// The options to use.
    options: CacheOptions,
}

impl<S> Cache<S>
where
    S: CacheStore,
{
    /// Constructs a new cache owning the given store.
    pub fn new(store: S) -> Self {
        Self::new_with_options(store, CacheOptions::default())
    }

    /// Constructs a new cache with the given store and options.
    pub fn new_with_options(store: S, options: CacheOptions) -> Self {
        Self::with_shared_store(Arc::new(Mutex::new(store)), options)
    }

    /// Constructs a new cache over an externally shared store.
    pub fn with_shared_store(store: Arc<Mutex<S>>, options: CacheOptions) -> Self {
        Self { store, options }
    }

    /// Gets the shared handle to the store used by the cache.
    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }

    /// Locks the store for a single operation.
    fn lock(&self) -> MutexGuard<'_, S> {
        // Poisoning is ignored: entries are replaced whole, never written
        // incrementally, so a panicked holder cannot leave one half-written
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sends an HTTP request through the cache.
    ///
    /// `GET` requests are sent conditionally when a validator is cached for
    /// the resource: a `304 Not Modified` reply is answered with the stored
    /// response, and a fresh response carrying an `ETag` and a non-empty body
    /// replaces the stored entry.
    ///
    /// `POST`, `PUT`, and `DELETE` requests evict any stored entry for the
    /// resource before they are dispatched, regardless of how the exchange
    /// turns out.
    ///
    /// All other requests pass through without touching the store.
    pub async fn send<B: HttpBody>(&self, mut request: impl Request<B>) -> Result<Response<Body<B>>> {
        let method = request.method().clone();
        let uri = request.uri().clone();
        let key = resource_key(&uri);

        match MethodPolicy::of(&method) {
            MethodPolicy::Mutate => {
                // The mutation may change server state no matter how it turns
                // out, so the entry goes before the request is sent
                if self.lock().remove(&key) {
                    debug!(
                        method = method.as_str(),
                        uri = %uri,
                        key,
                        "evicted entry for mutating request"
                    );
                }

                let response = request.send(None).await?;
                Ok(response.map(Body::from_upstream))
            }
            MethodPolicy::Other => {
                let response = request.send(None).await?;
                Ok(response.map(Body::from_upstream))
            }
            MethodPolicy::Read => {
                if request.headers().contains_key(header::IF_NONE_MATCH) {
                    // The caller runs its own conditional exchange; its 304s
                    // must reach it untouched
                    debug!(
                        uri = %uri,
                        key,
                        "request already carries a validator; passing through"
                    );
                    let response = request.send(None).await?;
                    return Ok(response.map(Body::from_upstream));
                }

                self.send_conditional(key, uri, request).await
            }
        }
    }

    /// Performs the conditional exchange for a cacheable request.
    async fn send_conditional<B: HttpBody>(
        &self,
        key: String,
        uri: Uri,
        mut request: impl Request<B>,
    ) -> Result<Response<Body<B>>> {
        let mut conditional = match self.lock().get(&key) {
            Some(entry) => {
                debug!(
                    uri = %uri,
                    key,
                    validator = entry.validator,
                    "attaching cached validator"
                );
                conditional_headers(&entry.validator)
            }
            None => {
                debug!(uri = %uri, key, "no cached validator");
                None
            }
        };

        loop {
            let response = request.send(conditional.clone()).await?;

            if response.status() != StatusCode::NOT_MODIFIED {
                return self.complete(&key, &uri, response).await;
            }

            // The origin confirmed the stored copy is current
            if let Some(entry) = self.lock().get(&key) {
                debug!(uri = %uri, key, "serving stored response for not-modified status");
                let mut response = entry.response.into_response();
                response.set_cache_status(CacheStatus::Hit);
                return Ok(response);
            }

            // The entry vanished between validator attach and response; retry
            // once without the conditional header, which a well-behaved
            // origin cannot answer with another 304
            if conditional.take().is_none() {
                debug!(
                    uri = %uri,
                    key,
                    "not-modified response without a stored entry; returning it as-is"
                );
                let mut response = response.map(Body::from_upstream);
                response.set_cache_status(CacheStatus::Miss);
                return Ok(response);
            }

            debug!(
                uri = %uri,
                key,
                "stored entry disappeared during validation; retrying unconditionally"
            );
        }
    }

    /// Completes a cacheable exchange whose response was not a 304.
    ///
    /// A response carrying a usable validator is drained into memory: a
    /// non-empty body replaces the stored entry, an empty one evicts it.
    /// Responses without a validator stream through untouched.
    async fn complete<B: HttpBody>(
        &self,
        key: &str,
        uri: &Uri,
        response: Response<B>,
    ) -> Result<Response<Body<B>>> {
        let validator = response
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let Some(validator) = validator else {
            debug!(
                uri = %uri,
                key,
                status = response.status().as_u16(),
                "response carries no validator; passing through uncached"
            );
            let mut response = response.map(Body::from_upstream);
            response.set_cache_status(CacheStatus::Miss);
            return Ok(response);
        };

        if let Some(max) = self.options.max_body_bytes {
            use http_body::Body as _;

            if response.body().size_hint().lower() > max {
                debug!(
                    uri = %uri,
                    key,
                    max,
                    "response body exceeds the size limit; passing through uncached"
                );
                let mut response = response.map(Body::from_upstream);
                response.set_cache_status(CacheStatus::Miss);
                return Ok(response);
            }
        }

        let (parts, body) = response.into_parts();
        let body = Body::drain(body)
            .await
            .context("failed to buffer response body")?;

        if body.is_empty() {
            // A validator with no content signals the resource is gone
            if self.lock().remove(key) {
                debug!(
                    uri = %uri,
                    key,
                    "evicted entry: response with validator has no content"
                );
            }
        } else if self
            .options
            .max_body_bytes
            .is_some_and(|max| body.len() as u64 > max)
        {
            debug!(
                uri = %uri,
                key,
                len = body.len(),
                "response body exceeds the size limit; not stored"
            );
        } else {
            self.lock().put(
                key.to_string(),
                CacheEntry {
                    validator,
                    response: StoredResponse {
                        status: parts.status,
                        version: parts.version,
                        headers: parts.headers.clone(),
                        body: body.clone(),
                    },
                },
            );
            debug!(uri = %uri, key, len = body.len(), "response stored");
        }

        let mut response = Response::from_parts(parts, Body::from_bytes(body));
        response.set_cache_status(CacheStatus::Miss);
        Ok(response)
    }
}

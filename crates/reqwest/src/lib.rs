//! An implementation of a [`reqwest`][reqwest] middleware that uses
//! [`http-etag-cache`][http-etag-cache].
//!
//! ```no_run
//! use http_etag_cache_reqwest::Cache;
//! use http_etag_cache_reqwest::store::MemoryStore;
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use reqwest_middleware::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ClientBuilder::new(Client::new())
//!         .with(Cache::new(MemoryStore::new()))
//!         .build();
//!     client.get("https://example.com").send().await?;
//!     Ok(())
//! }
//! ```
//!
//! [reqwest]: https://github.com/seanmonstar/reqwest
//! [http-etag-cache]: https://github.com/etag-cache/http-etag-cache

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::task::Context;
use std::task::Poll;

use anyhow::Context as _;
use anyhow::Result;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
pub use http_etag_cache::CacheOptions;
pub use http_etag_cache::CacheStatus;
pub use http_etag_cache::X_CACHE;
use http_etag_cache::http::Extensions;
use http_etag_cache::http::HeaderMap;
use http_etag_cache::http::Method;
use http_etag_cache::http::Uri;
use http_etag_cache::http_body::Frame;
pub use http_etag_cache::resource_key;
pub use http_etag_cache::store;
pub use http_etag_cache::store::CacheStore;
use reqwest::Body;
use reqwest::Request;
use reqwest::Response;
use reqwest::ResponseBuilderExt;
use reqwest_middleware::Next;

pin_project_lite::pin_project! {
    /// Adapter for [`Body`] to implement `HttpBody`.
    struct MiddlewareBody {
        #[pin]
        body: Body
    }
}

impl http_etag_cache::http_body::Body for MiddlewareBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        // The two body implementations differ on error type, so map it here
        self.project().body.poll_frame(cx).map_err(io::Error::other)
    }
}

impl http_etag_cache::HttpBody for MiddlewareBody {}

/// Represents a request flowing through the cache middleware.
struct MiddlewareRequest<'a, 'b> {
    /// The request URI.
    uri: Uri,
    /// The request sent to the middleware.
    ///
    /// `None` once a request with a non-cloneable body has been dispatched.
    request: Option<Request>,
    /// The next middleware to run.
    next: Next<'a>,
    /// The request extensions.
    extensions: &'b mut Extensions,
}

impl http_etag_cache::Request<MiddlewareBody> for MiddlewareRequest<'_, '_> {
    fn method(&self) -> &Method {
        self.request
            .as_ref()
            .expect("request should not have been dispatched")
            .method()
    }

    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn headers(&self) -> &HeaderMap {
        self.request
            .as_ref()
            .expect("request should not have been dispatched")
            .headers()
    }

    async fn send(
        &mut self,
        headers: Option<HeaderMap>,
    ) -> Result<http_etag_cache::http::Response<MiddlewareBody>> {
        // Clone the request so another dispatch stays possible; a request
        // with a streaming body cannot be cloned and is dispatched only once
        let mut request = match self.request.as_ref().and_then(|request| request.try_clone()) {
            Some(request) => request,
            None => self
                .request
                .take()
                .context("request has already been dispatched")?,
        };

        // Override the specified headers
        if let Some(headers) = headers {
            request.headers_mut().extend(headers);
        }

        // Send the request to the next middleware
        let mut response = self.next.clone().run(request, self.extensions).await?;

        // Build a response
        let mut builder = http_etag_cache::http::Response::builder()
            .version(response.version())
            .status(response.status())
            .url(response.url().clone());

        let headers = std::mem::take(response.headers_mut());
        builder
            .headers_mut()
            .expect("should have headers")
            .extend(headers);
        builder
            .body(MiddlewareBody {
                body: Body::wrap_stream(response.bytes_stream()),
            })
            .context("failed to create response")
    }
}

/// Implements a caching middleware for [`reqwest`].
pub struct Cache<S>(http_etag_cache::Cache<S>);

impl<S: CacheStore> Cache<S> {
    /// Constructs a new caching middleware with the given store.
    pub fn new(store: S) -> Self {
        Self(http_etag_cache::Cache::new(store))
    }

    /// Constructs a new caching middleware with the given store and options.
    pub fn new_with_options(store: S, options: CacheOptions) -> Self {
        Self(http_etag_cache::Cache::new_with_options(store, options))
    }

    /// Gets the shared handle to the store used by the cache.
    pub fn store(&self) -> &Arc<Mutex<S>> {
        self.0.store()
    }
}

impl<S: CacheStore> reqwest_middleware::Middleware for Cache<S> {
    fn handle<'a, 'b, 'c, 'd>(
        &'a self,
        req: Request,
        extensions: &'b mut Extensions,
        next: Next<'c>,
    ) -> BoxFuture<'d, reqwest_middleware::Result<Response>>
    where
        'a: 'd,
        'b: 'd,
        'c: 'd,
        Self: 'd,
    {
        async {
            let request = MiddlewareRequest {
                uri: req.url().as_str().parse().map_err(|e| {
                    anyhow::anyhow!("URL `{url}` is not valid: {e}", url = req.url())
                })?,
                request: Some(req),
                next,
                extensions,
            };

            let response = self
                .0
                .send(request)
                .await
                .map(|r| r.map(Body::wrap_stream).into())?;
            Ok(response)
        }
        .boxed()
    }
}

//! Request metadata: method, path, query and headers for one API call.

use crate::transport::{Body, Request};
use crate::Error;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;

/// Metadata for an individual HTTP request.
///
/// Paths are relative to the client's base URL, including any path prefix it
/// carries: with a base of `https://api.example.com/crm/v3`, the path
/// `/contacts` resolves to `https://api.example.com/crm/v3/contacts`.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// The HTTP method (GET, POST, etc.).
    pub method: Method,

    /// The request path (relative to the base URL).
    pub path: String,

    /// Additional headers for this request.
    pub headers: HeaderMap,

    /// Query parameters for this request, in order.
    pub query_params: Vec<(String, String)>,
}

impl RequestMetadata {
    /// Creates a new `RequestMetadata` with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: Vec::new(),
        }
    }

    /// Shorthand for a GET to `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter to the request.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Adds multiple query parameters to the request.
    pub fn with_query_params(
        mut self,
        params: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.query_params.extend(params);
        self
    }

    /// Resolves the full URL against `base`.
    pub fn url(&self, base: &Url) -> Result<Url, Error> {
        if base.cannot_be_a_base() {
            return Err(Error::ConfigurationError(format!(
                "Base URL cannot carry a path: {}",
                base
            )));
        }

        let mut url = base.clone();
        let prefix = base.path().trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        url.set_path(&format!("{}/{}", prefix, path));

        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Builds the outbound request. Request headers win over `default_headers`.
    pub fn into_request(
        self,
        base: &Url,
        default_headers: &HeaderMap,
        body: Body,
    ) -> Result<Request, Error> {
        let url = self.url(base)?;
        let mut request = Request::new(self.method, url).with_body(body);

        let headers = request.headers_mut();
        for (name, value) in default_headers {
            headers.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        Ok(request)
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

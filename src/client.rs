//! The CRM API client.
//!
//! [`Client`] owns the transport chain (authentication, user agent, retry, then
//! the network) and offers typed JSON calls and cursor pagination on top of
//! it. Use [`ClientBuilder`] to configure it.

use crate::{
    auth::{AuthLayer, AuthProvider, BearerAuth, CompositeAuth, Credential},
    classify,
    metadata::RequestMetadata,
    middleware::{chain, Middleware, UserAgentLayer},
    pager::{Page, Pager},
    retry::{Attempts, RetryLayer, RetryPolicy},
    transport::{Body, HttpTransport, Request, SharedTransport},
    Context, Error, Response, Result,
};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Environment variable holding the API base URL.
pub const ENV_API_URL: &str = "CRM_API_URL";
/// Environment variable holding the API token.
pub const ENV_API_TOKEN: &str = "CRM_API_TOKEN";

/// Query parameter carrying the pagination cursor.
const CURSOR_PARAM: &str = "cursor";

const DEFAULT_USER_AGENT: &str = concat!("crm-client/", env!("CARGO_PKG_VERSION"));

/// The list endpoint envelope.
#[derive(Deserialize)]
struct ListEnvelope<T> {
    #[serde(alias = "results")]
    data: Vec<T>,
    #[serde(default, alias = "next")]
    next_cursor: Option<String>,
}

/// A client for the CRM API.
///
/// Cheap to clone; clones share the transport chain and its connection pool.
///
/// # Examples
///
/// ```no_run
/// use crm_client::{Client, Context, Credential, RetryPolicy};
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct NewContact {
///     email: String,
/// }
///
/// #[derive(Deserialize)]
/// struct Contact {
///     id: String,
///     email: String,
/// }
///
/// # async fn example() -> Result<(), crm_client::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com/crm/v3")?
///     .bearer_token(Credential::new("secret-token"))
///     .retry_policy(RetryPolicy::default().max_attempts(4))
///     .build()?;
///
/// let ctx = Context::new().with_timeout(Duration::from_secs(30));
///
/// let contact = client.get::<Contact>(&ctx, "/contacts/42").await?;
/// println!("Contact: {}", contact.data.email);
///
/// let created = client
///     .post::<_, Contact>(&ctx, "/contacts", &NewContact { email: "ada@example.com".into() })
///     .await?;
/// println!("Created contact {}", created.data.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: SharedTransport,
    base_url: Url,
    default_headers: HeaderMap,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The URL request paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The composed transport chain.
    pub fn transport(&self) -> &SharedTransport {
        &self.inner.transport
    }

    /// Sends a raw request through the transport chain.
    ///
    /// Non-2xx responses are returned as-is, not as errors. The caller reads
    /// and drops the response body.
    pub async fn send(&self, ctx: &Context, request: Request) -> Result<reqwest::Response> {
        self.inner.transport.send(ctx, request).await
    }

    /// Makes a typed JSON request.
    ///
    /// Non-2xx responses become [`Error::Api`] or [`Error::RateLimited`]; a
    /// 2xx body that does not decode as `Res` becomes
    /// [`Error::DeserializationFailed`]. An empty body decodes as JSON `null`.
    pub async fn call<Req, Res>(
        &self,
        ctx: &Context,
        metadata: RequestMetadata,
        body: Option<&Req>,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let start_time = Instant::now();
        let method = metadata.method.clone();
        let path = metadata.path.clone();

        let body = match body {
            Some(body) => Body::json(body)?,
            None => Body::empty(),
        };
        let has_body = !body.is_empty();
        let mut request =
            metadata.into_request(&self.inner.base_url, &self.inner.default_headers, body)?;
        if has_body {
            request
                .headers_mut()
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
        }

        let response = match self.send(ctx, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    method = %method,
                    path = %path,
                    "Request failed"
                );
                return Err(e);
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let attempts = response
            .extensions()
            .get::<Attempts>()
            .map_or(1, |a| a.0);

        tracing::info!(
            status = status.as_u16(),
            method = %method,
            path = %path,
            latency_ms = start_time.elapsed().as_millis() as u64,
            attempts = attempts,
            "Received HTTP response"
        );

        if !status.is_success() {
            let (Ok(err) | Err(err)) = ctx.run(classify::error_from_response(response)).await;
            return Err(err);
        }

        let raw_body = ctx.run(response.text()).await??;
        let latency = start_time.elapsed();
        let source = if raw_body.trim().is_empty() {
            "null"
        } else {
            raw_body.as_str()
        };

        match serde_json::from_str::<Res>(source) {
            Ok(data) => Ok(Response::new(
                data, raw_body, status, headers, latency, attempts,
            )),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %raw_body,
                    "Failed to deserialize response"
                );

                Err(Error::DeserializationFailed {
                    raw_response: raw_body,
                    serde_error: e.to_string(),
                    status,
                })
            }
        }
    }

    /// Makes a GET request to the specified path.
    pub async fn get<Res>(&self, ctx: &Context, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::GET, path);
        self.call::<(), Res>(ctx, metadata, None).await
    }

    /// Makes a POST request to the specified path with a JSON body.
    pub async fn post<Req, Res>(
        &self,
        ctx: &Context,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::POST, path);
        self.call(ctx, metadata, Some(body)).await
    }

    /// Makes a PUT request to the specified path with a JSON body.
    pub async fn put<Req, Res>(
        &self,
        ctx: &Context,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PUT, path);
        self.call(ctx, metadata, Some(body)).await
    }

    /// Makes a PATCH request to the specified path with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        ctx: &Context,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::PATCH, path);
        self.call(ctx, metadata, Some(body)).await
    }

    /// Makes a DELETE request to the specified path.
    pub async fn delete<Res>(
        &self,
        ctx: &Context,
        path: impl Into<String>,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let metadata = RequestMetadata::new(Method::DELETE, path);
        self.call::<(), Res>(ctx, metadata, None).await
    }

    /// Fetches one page of a list endpoint.
    ///
    /// The cursor, when given, is sent as the `cursor` query parameter. The
    /// response is expected to look like
    /// `{"data": [...], "next_cursor": "..."}`; `results` and `next` are
    /// accepted in place of `data` and `next_cursor`.
    pub async fn list_page<T>(
        &self,
        ctx: &Context,
        metadata: RequestMetadata,
        cursor: Option<String>,
    ) -> Result<Page<T>>
    where
        T: DeserializeOwned,
    {
        let metadata = match cursor {
            Some(cursor) => metadata.with_query_param(CURSOR_PARAM, cursor),
            None => metadata,
        };
        let envelope = self
            .call::<(), ListEnvelope<T>>(ctx, metadata, None)
            .await?
            .data;
        Ok(Page::new(envelope.data, envelope.next_cursor))
    }

    /// Returns a [`Pager`] over every page of a list endpoint.
    pub fn pager<T>(&self, metadata: RequestMetadata) -> Pager<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.clone();
        Pager::new(move |ctx: Context, cursor| {
            let client = client.clone();
            let metadata = metadata.clone();
            async move { client.list_page(&ctx, metadata, cursor).await }
        })
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// The transport chain is, from the outside in: authentication, user agent,
/// retry, any extra [`middleware`](ClientBuilder::middleware), then the base
/// transport.
///
/// # Examples
///
/// ```no_run
/// use crm_client::{ClientBuilder, Credential, RetryPolicy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), crm_client::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .bearer_token(Credential::new("secret-token"))
///     .retry_policy(RetryPolicy::default().max_attempts(5))
///     .user_agent("my-app/1.0")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    user_agent: String,
    auth: Vec<Arc<dyn AuthProvider>>,
    retry_policy: RetryPolicy,
    middleware: Vec<Arc<dyn Middleware>>,
    timeout: Option<Duration>,
    http_client: Option<reqwest::Client>,
    transport: Option<SharedTransport>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        Self {
            base_url: None,
            default_headers,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            auth: Vec::new(),
            retry_policy: RetryPolicy::default(),
            middleware: Vec::new(),
            timeout: None,
            http_client: None,
            transport: None,
        }
    }

    /// Configures the builder from `CRM_API_URL` and, if set, `CRM_API_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns an error if `CRM_API_URL` is missing or not a valid URL.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_API_URL).map_err(|_| {
            Error::ConfigurationError(format!("{} is not set", ENV_API_URL))
        })?;
        let mut builder = Self::new().base_url(url)?;
        if let Ok(token) = std::env::var(ENV_API_TOKEN) {
            if !token.is_empty() {
                builder = builder.bearer_token(Credential::new(token));
            }
        }
        Ok(builder)
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the `User-Agent` sent when a request does not carry its own.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds an authentication provider. Providers run in the order added.
    pub fn auth(mut self, provider: impl AuthProvider + 'static) -> Self {
        self.auth.push(Arc::new(provider));
        self
    }

    /// Authenticates with `Authorization: Bearer <credential>`.
    pub fn bearer_token(self, credential: Credential) -> Self {
        self.auth(BearerAuth::new(credential))
    }

    /// Sets the default retry policy. Calls can override it through
    /// [`Context::with_retry_policy`] and [`Context::without_retry`].
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Adds a decorator between the retry layer and the base transport, so it
    /// sees every attempt.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Sets the timeout of each attempt.
    ///
    /// Ignored when a custom [`http_client`](ClientBuilder::http_client) or
    /// [`transport`](ClientBuilder::transport) is supplied. The overall
    /// deadline of a call belongs on its [`Context`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses a preconfigured `reqwest::Client` for network I/O.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Replaces the base network transport.
    pub fn transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided or if the client
    /// configuration is invalid.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::ConfigurationError("Base URL is required".to_string()))?;

        let base = match (self.transport, self.http_client) {
            (Some(transport), _) => transport,
            (None, Some(client)) => Arc::new(HttpTransport::new(client)),
            (None, None) => {
                let mut builder = reqwest::Client::builder();
                if let Some(timeout) = self.timeout {
                    builder = builder.timeout(timeout);
                }
                let client = builder.build().map_err(|e| {
                    Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
                })?;
                Arc::new(HttpTransport::new(client))
            }
        };

        let mut layers: Vec<Arc<dyn Middleware>> = Vec::new();
        match self.auth.len() {
            0 => {}
            1 => layers.push(Arc::new(AuthLayer::new(Arc::clone(&self.auth[0])))),
            _ => layers.push(Arc::new(AuthLayer::new(Arc::new(CompositeAuth::new(
                self.auth,
            ))))),
        }
        layers.push(Arc::new(UserAgentLayer::new(&self.user_agent)?));
        layers.push(Arc::new(RetryLayer::new(self.retry_policy)));
        layers.extend(self.middleware);

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport: chain(base, &layers),
                base_url,
                default_headers: self.default_headers,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

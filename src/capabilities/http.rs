use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

const MAX_URL_LENGTH: usize = 2048;
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;
const MAX_HEADERS: usize = 32;
const MAX_HEADER_NAME_BYTES: usize = 256;
const MAX_HEADER_VALUE_BYTES: usize = 8192;

// Set by the host's HTTP stack, never by the core.
const HOST_MANAGED_HEADERS: [&str; 3] = ["host", "content-length", "transfer-encoding"];

/// Outbound HTTP performed by the shell.
///
/// The core only ever describes a request; the shell executes it and
/// resolves the effect with an [`HttpResult`]. `cancel` is fire-and-forget:
/// the shell aborts the transfer if it is still running and never answers
/// the cancelled `Execute`.
#[derive(Clone)]
pub struct Http<E> {
    context: CapabilityContext<HttpOperation, E>,
}

impl<Ev> Capability<Ev> for Http<Ev> {
    type Operation = HttpOperation;
    type MappedSelf<MappedEv> = Http<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Http::new(self.context.map_event(f))
    }
}

impl<E> Http<E>
where
    E: 'static,
{
    pub fn new(context: CapabilityContext<HttpOperation, E>) -> Self {
        Self { context }
    }

    pub fn send<F>(&self, request: HttpRequest, callback: F)
    where
        F: FnOnce(HttpResult) -> E + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(HttpOperation::Execute(request))
                .await;
            context.update_app(callback(result));
        });
    }

    pub fn cancel(&self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        let context = self.context.clone();
        self.context.spawn(async move {
            context
                .notify_shell(HttpOperation::Cancel { request_id })
                .await;
        });
    }
}

/// An absolute http(s) URL that does not point into a private network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    scheme: String,
    host: String,
}

impl ValidatedUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, HttpError> {
        let raw = url.into();
        let invalid = |reason: &str| HttpError::InvalidUrl {
            url: shorten(&raw),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(invalid("empty"));
        }
        if raw.len() > MAX_URL_LENGTH {
            return Err(invalid("longer than 2048 bytes"));
        }

        let parsed = Url::parse(&raw).map_err(|e| invalid(&e.to_string()))?;
        let scheme = parsed.scheme().to_ascii_lowercase();
        if scheme != "https" && scheme != "http" {
            return Err(invalid("only http and https are supported"));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(invalid("embedded credentials"));
        }

        let host = parsed.host().ok_or_else(|| invalid("missing host"))?;
        if is_private(&host) {
            return Err(HttpError::PrivateNetworkBlocked {
                url: shorten(&raw),
                host: host.to_string(),
            });
        }
        let host = host.to_string().to_ascii_lowercase();

        Ok(Self {
            url: parsed.into(),
            scheme,
            host,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

fn is_private(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
        }
        Host::Ipv4(ip) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Host::Ipv6(ip) => ip.is_loopback() || ip.is_unspecified(),
    }
}

fn shorten(url: &str) -> String {
    match url.char_indices().nth(100) {
        Some((cut, _)) => format!("{}...", &url[..cut]),
        None => url.to_string(),
    }
}

/// Request or response headers. Names compare case-insensitively and a
/// second insert under the same name replaces the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeaders {
    entries: Vec<(String, String)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), HttpError> {
        let (name, value) = (name.into(), value.into());
        if let Some(reason) = header_problem(&name, &value) {
            return Err(HttpError::InvalidHeader { name, reason });
        }

        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        if self.entries.len() == MAX_HEADERS {
            return Err(HttpError::TooManyHeaders { max: MAX_HEADERS });
        }
        self.entries.push((name, value));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find_map(|(n, v)| n.eq_ignore_ascii_case(name).then_some(v.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn header_problem(name: &str, value: &str) -> Option<String> {
    if name.is_empty() || name.len() > MAX_HEADER_NAME_BYTES {
        return Some(format!("name must be 1 to {MAX_HEADER_NAME_BYTES} bytes"));
    }
    if let Some(c) = name.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
        return Some(format!("'{c}' is not allowed in a header name"));
    }
    if HOST_MANAGED_HEADERS
        .iter()
        .any(|managed| name.eq_ignore_ascii_case(managed))
    {
        return Some("set by the host".to_string());
    }
    if value.len() > MAX_HEADER_VALUE_BYTES {
        return Some(format!("value is over {MAX_HEADER_VALUE_BYTES} bytes"));
    }
    if value.contains(['\r', '\n', '\0']) {
        return Some("value contains a line break or NUL".to_string());
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    method: HttpMethod,
    url: ValidatedUrl,
    headers: HttpHeaders,
    body: Option<Vec<u8>>,
    timeout_ms: u64,
    request_id: String,
}

impl HttpRequest {
    /// Every request gets a fresh v4 id so it can be cancelled and so the
    /// response can be matched back to it.
    pub fn new(method: HttpMethod, url: ValidatedUrl) -> Self {
        Self {
            method,
            url,
            headers: HttpHeaders::new(),
            body: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn get(url: impl Into<String>) -> Result<Self, HttpError> {
        ValidatedUrl::new(url).map(|url| Self::new(HttpMethod::Get, url))
    }

    pub fn post(url: impl Into<String>) -> Result<Self, HttpError> {
        ValidatedUrl::new(url).map(|url| Self::new(HttpMethod::Post, url))
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, HttpError> {
        self.headers.insert(name, value)?;
        Ok(self)
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, HttpError> {
        if self.method == HttpMethod::Get {
            return Err(HttpError::InvalidRequest {
                reason: "GET cannot carry a body".to_string(),
            });
        }
        let body = serde_json::to_vec(value).map_err(|e| HttpError::InvalidRequest {
            reason: format!("body does not serialize: {e}"),
        })?;
        if body.len() > MAX_BODY_BYTES {
            return Err(HttpError::BodyTooLarge {
                size: body.len(),
                max: MAX_BODY_BYTES,
            });
        }

        self.headers.insert("Content-Type", "application/json")?;
        self.body = Some(body);
        Ok(self)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Result<Self, HttpError> {
        if !(1..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(HttpError::InvalidRequest {
                reason: format!("timeout must be 1 to {MAX_TIMEOUT_MS}ms, got {timeout_ms}"),
            });
        }
        self.timeout_ms = timeout_ms;
        Ok(self)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &ValidatedUrl {
        &self.url
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Decodes the outbound body, for hosts and tests that inspect it.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(self.body.as_deref().unwrap_or_default()).map_err(|e| {
            HttpError::InvalidRequest {
                reason: format!("body is not JSON: {e}"),
            }
        })
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpOperation {
    Execute(HttpRequest),
    Cancel { request_id: String },
}

impl Operation for HttpOperation {
    type Output = HttpResult;
}

/// The first group is raised by the core while building a request. The
/// rest come back from the shell and name the request they belong to.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpError {
    #[error("bad URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{url} points at private host {host}")]
    PrivateNetworkBlocked { url: String, host: String },

    #[error("bad header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("more than {max} headers")]
    TooManyHeaders { max: usize },

    #[error("body of {size} bytes is over the {max} byte limit")]
    BodyTooLarge { size: usize, max: usize },

    #[error("bad request: {reason}")]
    InvalidRequest { reason: String },

    #[error("could not connect: {message}")]
    Connection { message: String, request_id: String },

    #[error("no response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64, request_id: String },

    #[error("status {status}: {message}")]
    HttpStatus {
        status: u16,
        message: String,
        request_id: String,
    },

    #[error("cancelled")]
    Cancelled { request_id: String },

    #[error("unreadable response: {reason}")]
    InvalidResponse { reason: String, request_id: String },
}

impl HttpError {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Connection { request_id, .. }
            | Self::Timeout { request_id, .. }
            | Self::HttpStatus { request_id, .. }
            | Self::Cancelled { request_id }
            | Self::InvalidResponse { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    headers: HttpHeaders,
    body: Vec<u8>,
    request_id: String,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HttpHeaders, body: Vec<u8>, request_id: String) -> Self {
        Self {
            status,
            headers,
            body,
            request_id,
        }
    }

    /// `200` with a JSON body, for hosts that have already decoded the
    /// transfer and for tests.
    pub fn ok_json(request_id: impl Into<String>, body: &serde_json::Value) -> Self {
        let headers = HttpHeaders {
            entries: vec![("Content-Type".into(), "application/json".into())],
        };
        Self::new(200, headers, body.to_string().into_bytes(), request_id.into())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, 200..=299)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::InvalidResponse {
            reason: e.to_string(),
            request_id: self.request_id.clone(),
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

pub type HttpOutput = HttpResponse;
pub type HttpResult = Result<HttpResponse, HttpError>;

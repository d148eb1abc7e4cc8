//! A [`Facilitator`] implementation that interacts with a _remote_ x402 facilitator over HTTP.
//!
//! The facilitator's callable surface is not uniform across deployments: hosted
//! facilitators sit behind derived per-operation auth headers, self-hosted ones
//! accept a bare bearer token, and older deployments mount `verify`/`settle`
//! at different paths. Instead of binding to one shape, [`select_binding`]
//! probes an ordered, fixed list of [`BindingStrategy`] values against the
//! resolved configuration **once at startup** and adopts the first that yields
//! both a verify and a settle endpoint.
//!
//! Within each call, endpoint fallback is bounded by a static candidate list
//! and strictly sequential. Error bodies are run through
//! [`parse_facilitator_error`], a typed fallible parse that degrades to raw
//! text when the facilitator's structured envelope is absent.

use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::Client;
use sha2::Sha256;
use std::fmt;
use std::fmt::Display;
use std::time::Duration;
use url::Url;

use crate::facilitator::Facilitator;
use crate::timestamp::UnixTimestamp;
use crate::types::{SettleRequest, SettleResponse, VerifyRequest, VerifyResponse};

type HmacSha256 = Hmac<Sha256>;

/// Hosted facilitator endpoint used when only API credentials are configured.
pub const DEFAULT_HOSTED_FACILITATOR_URL: &str = "https://api.cdp.coinbase.com/platform/v2/x402/";

/// Ordered candidate paths for the verify operation, relative to the base URL.
/// The fallback loop is bounded by this list, never unbounded.
const VERIFY_PATHS: &[&str] = &["./verify", "./x402/verify"];

/// Ordered candidate paths for the settle operation, relative to the base URL.
const SETTLE_PATHS: &[&str] = &["./settle", "./x402/settle"];

/// Remaining authorization validity, in seconds, below which settlement is
/// logged as racing against expiry. The call still proceeds.
pub const SETTLEMENT_RISK_WINDOW_SECS: u64 = 30;

/// API credentials for facilitators requiring derived per-operation auth.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub key_id: String,
    pub secret: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The secret never reaches logs
        f.debug_struct("ApiCredentials")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Errors raised while deriving per-operation auth headers.
#[derive(Debug, thiserror::Error)]
pub enum AuthHeaderError {
    /// A derived value contains bytes that cannot appear in an HTTP header.
    #[error("Auth header value encoding failed: {0}")]
    Encoding(#[from] http::header::InvalidHeaderValue),
    /// The signing key was rejected by the MAC.
    #[error("Auth signature derivation failed: {0}")]
    Signature(#[from] hmac::digest::InvalidLength),
}

/// How requests to the facilitator are authenticated.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// No authentication (public or network-internal facilitator).
    None,
    /// A static bearer token attached to every request.
    Bearer(String),
    /// Per-operation headers derived from API credentials: an HMAC-SHA256
    /// signature over `"{timestamp} POST {path}"` keyed by the API secret.
    Derived(ApiCredentials),
}

impl AuthScheme {
    /// Derives the auth headers for one POST to `path`.
    pub fn headers(&self, path: &str) -> Result<HeaderMap, AuthHeaderError> {
        let mut headers = HeaderMap::new();
        match self {
            AuthScheme::None => {}
            AuthScheme::Bearer(token) => {
                headers.insert(
                    http::header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {token}"))?,
                );
            }
            AuthScheme::Derived(credentials) => {
                let timestamp = UnixTimestamp::now();
                let message = format!("{timestamp} POST {path}");
                let mut mac = HmacSha256::new_from_slice(credentials.secret.as_bytes())?;
                mac.update(message.as_bytes());
                let signature = hex::encode(mac.finalize().into_bytes());
                headers.insert("X-Api-Key", HeaderValue::from_str(&credentials.key_id)?);
                headers.insert(
                    "X-Api-Timestamp",
                    HeaderValue::from_str(&timestamp.to_string())?,
                );
                headers.insert("X-Api-Signature", HeaderValue::from_str(&signature)?);
            }
        }
        Ok(headers)
    }
}

/// Structured error envelope some facilitators return on failures.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorErrorEnvelope {
    pub error_message: String,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub error_link: Option<String>,
}

/// A facilitator-reported failure: either the structured envelope, or the raw
/// body text when the envelope did not parse.
#[derive(Debug, Clone)]
pub enum FacilitatorError {
    Structured(FacilitatorErrorEnvelope),
    Raw(String),
}

impl FacilitatorError {
    /// Whether this failure is attributable to the facilitator's own execution
    /// environment rather than to the payer. Gas-estimation failures are the
    /// known case: they occur on the facilitator's RPC path, with a perfectly
    /// valid authorization in hand.
    pub fn is_facilitator_side(&self) -> bool {
        let message = match self {
            FacilitatorError::Structured(envelope) => envelope.error_message.as_str(),
            FacilitatorError::Raw(text) => text.as_str(),
        };
        message.to_ascii_lowercase().contains("unable to estimate gas")
    }

    fn from_settle(response: &SettleResponse) -> Self {
        match (&response.error_message, &response.error_reason) {
            (Some(message), _) => FacilitatorError::Structured(FacilitatorErrorEnvelope {
                error_message: message.clone(),
                error_type: response.error_type.clone(),
                correlation_id: None,
                error_link: None,
            }),
            (None, Some(reason)) => FacilitatorError::Raw(reason.clone()),
            (None, None) => FacilitatorError::Raw("settlement reported success=false".to_string()),
        }
    }
}

impl Display for FacilitatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacilitatorError::Structured(envelope) => {
                write!(f, "{}", envelope.error_message)?;
                if let Some(error_type) = &envelope.error_type {
                    write!(f, " ({error_type})")?;
                }
                if let Some(correlation_id) = &envelope.correlation_id {
                    write!(f, " [correlation_id={correlation_id}]")?;
                }
                Ok(())
            }
            FacilitatorError::Raw(text) => write!(f, "{text}"),
        }
    }
}

/// Parses a facilitator error body into its structured envelope, falling back
/// to the raw text when the body is not the envelope shape.
pub fn parse_facilitator_error(body: &str) -> FacilitatorError {
    match serde_json::from_str::<FacilitatorErrorEnvelope>(body) {
        Ok(envelope) => FacilitatorError::Structured(envelope),
        Err(_) => FacilitatorError::Raw(body.to_string()),
    }
}

/// Errors that can occur while interacting with a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to derive facilitator auth headers: {0}")]
    AuthHeader(#[from] AuthHeaderError),
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Facilitator rejected {context} with status {status}: {error}")]
    Rejected {
        context: &'static str,
        status: StatusCode,
        error: FacilitatorError,
    },
    #[error("Settlement declined by facilitator: {error}")]
    SettlementDeclined { error: FacilitatorError },
}

impl FacilitatorClientError {
    /// The facilitator-reported failure carried by this error, if any.
    pub fn facilitator_error(&self) -> Option<&FacilitatorError> {
        match self {
            FacilitatorClientError::Rejected { error, .. } => Some(error),
            FacilitatorClientError::SettlementDeclined { error } => Some(error),
            _ => None,
        }
    }
}

/// A client for communicating with a remote x402 facilitator.
///
/// Handles the `verify` and `settle` operations via JSON HTTP, with a bounded,
/// sequential endpoint-fallback loop per operation.
#[derive(Clone, Debug)]
pub struct RemoteFacilitator {
    /// Base URL of the facilitator (e.g. `https://facilitator.example/`)
    base_url: Url,
    /// Ordered candidate URLs for `POST verify`
    verify_urls: Vec<Url>,
    /// Ordered candidate URLs for `POST settle`
    settle_urls: Vec<Url>,
    /// Shared Reqwest HTTP client
    client: Client,
    /// Auth scheme applied per operation
    auth: AuthScheme,
    /// Optional per-request timeout
    timeout: Option<Duration>,
}

impl RemoteFacilitator {
    /// Constructs a client from a base URL, deriving the candidate endpoint
    /// URLs for both operations.
    pub fn try_new(base_url: Url, auth: AuthScheme) -> Result<Self, FacilitatorClientError> {
        let verify_urls = join_candidates(&base_url, VERIFY_PATHS, "verify endpoint candidates")?;
        let settle_urls = join_candidates(&base_url, SETTLE_PATHS, "settle endpoint candidates")?;
        Ok(Self {
            base_url,
            verify_urls,
            settle_urls,
            client: Client::new(),
            auth,
            timeout: None,
        })
    }

    /// Constructs a client from explicit, absolute verify/settle endpoint URLs.
    ///
    /// Used by the legacy binding where the two operations are mounted at the
    /// root of the facilitator host. No fallback candidates apply.
    pub fn with_endpoints(verify_url: Url, settle_url: Url, auth: AuthScheme) -> Self {
        Self {
            base_url: verify_url.clone(),
            verify_urls: vec![verify_url],
            settle_urls: vec![settle_url],
            client: Client::new(),
            auth,
            timeout: None,
        }
    }

    /// Returns the base URL used by this client.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Ordered verify endpoint candidates.
    pub fn verify_urls(&self) -> &[Url] {
        &self.verify_urls
    }

    /// Ordered settle endpoint candidates.
    pub fn settle_urls(&self) -> &[Url] {
        &self.settle_urls
    }

    /// The auth scheme applied per operation.
    pub fn auth(&self) -> &AuthScheme {
        &self.auth
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    /// Sends a `POST verify` request to the facilitator.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.post_with_fallback(&self.verify_urls, "POST /verify", request)
            .await
    }

    /// Sends a `POST settle` request to the facilitator.
    ///
    /// Must only be called after `verify` returned a valid response, with the
    /// identical request value. A 200 body with `success: false` is treated
    /// the same as an HTTP failure: facilitators may encode failure inside a
    /// 200 response.
    pub async fn settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        let authorization = &request.payment_payload.payload.authorization;
        let remaining = authorization
            .valid_before
            .seconds_from(UnixTimestamp::now());
        if remaining < SETTLEMENT_RISK_WINDOW_SECS {
            tracing::warn!(
                remaining_secs = remaining,
                valid_before = %authorization.valid_before,
                payer = %authorization.from,
                "Settlement may lose the race against authorization expiry"
            );
        }

        let response: SettleResponse = self
            .post_with_fallback(&self.settle_urls, "POST /settle", request)
            .await?;
        if !response.success {
            let error = FacilitatorError::from_settle(&response);
            if error.is_facilitator_side() {
                tracing::warn!(error = %error, "Settlement failed on the facilitator side");
            }
            return Err(FacilitatorClientError::SettlementDeclined { error });
        }
        Ok(response)
    }

    /// POSTs `payload` to each candidate URL in order until one answers 200.
    ///
    /// A non-200 response captures the body as diagnostic text and falls
    /// through to the next candidate only while one remains; the last captured
    /// error is returned otherwise. The loop is bounded by the candidate list.
    async fn post_with_fallback<T, R>(
        &self,
        urls: &[Url],
        context: &'static str,
        payload: &T,
    ) -> Result<R, FacilitatorClientError>
    where
        T: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut last_error = None;
        for url in urls {
            let headers = self.auth.headers(url.path())?;
            let mut req = self.client.post(url.clone()).json(payload);
            for (key, value) in headers.iter() {
                req = req.header(key, value);
            }
            if let Some(timeout) = self.timeout {
                req = req.timeout(timeout);
            }
            let http_response = match req.send().await {
                Ok(response) => response,
                Err(source) => {
                    tracing::warn!(url = %url, error = %source, "Facilitator candidate unreachable");
                    last_error = Some(FacilitatorClientError::Http { context, source });
                    continue;
                }
            };

            if http_response.status() == StatusCode::OK {
                return http_response
                    .json::<R>()
                    .await
                    .map_err(|e| FacilitatorClientError::JsonDeserialization { context, source: e });
            }

            let status = http_response.status();
            match http_response.text().await {
                Ok(body) => {
                    tracing::warn!(url = %url, %status, body = %body, "Facilitator candidate rejected request");
                    last_error = Some(FacilitatorClientError::Rejected {
                        context,
                        status,
                        error: parse_facilitator_error(&body),
                    });
                }
                Err(source) => {
                    last_error =
                        Some(FacilitatorClientError::ResponseBodyRead { context, source });
                }
            }
        }
        Err(last_error.unwrap_or(FacilitatorClientError::Rejected {
            context,
            status: StatusCode::NOT_FOUND,
            error: FacilitatorError::Raw("no endpoint candidates configured".to_string()),
        }))
    }
}

impl Facilitator for RemoteFacilitator {
    type Error = FacilitatorClientError;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        RemoteFacilitator::verify(self, request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        RemoteFacilitator::settle(self, request)
    }
}

fn join_candidates(
    base_url: &Url,
    paths: &[&str],
    context: &'static str,
) -> Result<Vec<Url>, FacilitatorClientError> {
    paths
        .iter()
        .map(|path| {
            base_url
                .join(path)
                .map_err(|e| FacilitatorClientError::UrlParse { context, source: e })
        })
        .collect()
}

/// Normalizes a string URL into a base with exactly one trailing slash, so
/// relative joins preserve the full path.
fn normalize_base_url(value: &str) -> Result<Url, FacilitatorClientError> {
    let mut normalized = value.trim_end_matches('/').to_string();
    normalized.push('/');
    Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
        context: "Failed to parse base url",
        source: e,
    })
}

impl TryFrom<&str> for RemoteFacilitator {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let url = normalize_base_url(value)?;
        RemoteFacilitator::try_new(url, AuthScheme::None)
    }
}

// ============================================================================
// Binding selection
// ============================================================================

/// Resolved facilitator connection settings, extracted from configuration.
#[derive(Debug, Clone, Default)]
pub struct FacilitatorSettings {
    /// Facilitator base URL, when one is configured explicitly.
    pub url: Option<Url>,
    /// API key id for derived auth.
    pub api_key_id: Option<String>,
    /// API key secret for derived auth.
    pub api_key_secret: Option<String>,
    /// Static bearer token, for facilitators with plain auth.
    pub bearer_token: Option<String>,
    /// Explicit absolute verify endpoint (legacy deployments).
    pub verify_url: Option<Url>,
    /// Explicit absolute settle endpoint (legacy deployments).
    pub settle_url: Option<Url>,
}

impl FacilitatorSettings {
    fn credentials(&self) -> Option<ApiCredentials> {
        match (&self.api_key_id, &self.api_key_secret) {
            (Some(key_id), Some(secret)) => Some(ApiCredentials {
                key_id: key_id.clone(),
                secret: secret.clone(),
            }),
            _ => None,
        }
    }

    fn bearer_auth(&self) -> AuthScheme {
        match &self.bearer_token {
            Some(token) => AuthScheme::Bearer(token.clone()),
            None => AuthScheme::None,
        }
    }
}

/// One way of acquiring a verify/settle capability from the configuration.
///
/// The probe order is fixed; each strategy either declines (its inputs are
/// absent) or produces a bound client. Selection happens once at startup and
/// is never repeated per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrategy {
    /// Explicit base URL plus API credentials: a hosted facilitator with
    /// derived per-operation auth.
    Hosted,
    /// API credentials only: the well-known hosted facilitator URL is assumed.
    Credentials,
    /// Explicit base URL without credentials: a raw endpoint descriptor, with
    /// optional static bearer auth.
    Endpoint,
    /// Explicit absolute verify/settle URLs: legacy deployments exposing the
    /// two operations directly.
    LegacyFlat,
}

impl BindingStrategy {
    /// The fixed probe order.
    pub const PROBE_ORDER: [BindingStrategy; 4] = [
        BindingStrategy::Hosted,
        BindingStrategy::Credentials,
        BindingStrategy::Endpoint,
        BindingStrategy::LegacyFlat,
    ];

    /// Attempts to bind against the settings. `None` means the strategy's
    /// inputs are not configured; `Some(Err)` means they are but are unusable.
    fn bind(
        &self,
        settings: &FacilitatorSettings,
    ) -> Option<Result<RemoteFacilitator, FacilitatorClientError>> {
        match self {
            BindingStrategy::Hosted => match (&settings.url, settings.credentials()) {
                (Some(url), Some(credentials)) => Some(RemoteFacilitator::try_new(
                    url.clone(),
                    AuthScheme::Derived(credentials),
                )),
                _ => None,
            },
            BindingStrategy::Credentials => settings.credentials().map(|credentials| {
                let url = normalize_base_url(DEFAULT_HOSTED_FACILITATOR_URL)?;
                RemoteFacilitator::try_new(url, AuthScheme::Derived(credentials))
            }),
            BindingStrategy::Endpoint => settings
                .url
                .as_ref()
                .map(|url| RemoteFacilitator::try_new(url.clone(), settings.bearer_auth())),
            BindingStrategy::LegacyFlat => match (&settings.verify_url, &settings.settle_url) {
                (Some(verify_url), Some(settle_url)) => Some(Ok(RemoteFacilitator::with_endpoints(
                    verify_url.clone(),
                    settle_url.clone(),
                    settings.bearer_auth(),
                ))),
                _ => None,
            },
        }
    }
}

/// Errors raised while selecting a facilitator binding at startup.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    /// Exactly one of API key id / secret was configured.
    #[error("Facilitator API credentials are incomplete: both key id and secret are required")]
    MissingApiCredentials,
    /// No strategy produced usable verify and settle endpoints.
    #[error("No facilitator binding strategy yields usable verify/settle endpoints")]
    NoVerifySettleCapability,
    #[error(transparent)]
    Client(#[from] FacilitatorClientError),
}

/// Probes [`BindingStrategy::PROBE_ORDER`] against the settings and adopts the
/// first strategy that binds. Called once during service startup.
pub fn select_binding(
    settings: &FacilitatorSettings,
) -> Result<RemoteFacilitator, BindingError> {
    if settings.api_key_id.is_some() != settings.api_key_secret.is_some() {
        return Err(BindingError::MissingApiCredentials);
    }
    for strategy in BindingStrategy::PROBE_ORDER {
        if let Some(result) = strategy.bind(settings) {
            let facilitator = result?;
            tracing::info!(
                ?strategy,
                base_url = %facilitator.base_url(),
                "Facilitator binding selected"
            );
            return Ok(facilitator);
        }
    }
    Err(BindingError::NoVerifySettleCapability)
}

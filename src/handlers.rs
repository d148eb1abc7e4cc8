//! HTTP surface of the paygate.
//!
//! A single protected route drives the payment attempt and renders one of the
//! three protocol outcomes:
//!
//! - **402 challenge** when no payment is presented,
//! - **402 rejection** with a reason-specific message when the payment is not accepted,
//! - **200 acceptance** carrying `X-Payment-Status` (and, when settlement
//!   succeeded, `X-Payment-Response`) plus the resource grant as the body.
//!
//! Unclassified faults (resource provider failures, serialization faults)
//! surface as 500 and never escape the request.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::facilitator::Facilitator;
use crate::policy::{AttemptOutcome, FacilitatorFailure, PaymentGate};
use crate::resource::{ResourceGrant, ResourceProvider};
use crate::types::{
    Base64Bytes, EvmAddress, PaymentRequiredResponse, PaymentRequirements, SettleResponse,
    X402Version, invalid_reason,
};

/// Request header carrying the base64-encoded payment payload.
pub const PAYMENT_HEADER: &str = "X-Payment";
/// Response header confirming the payment passed verification.
pub const PAYMENT_STATUS_HEADER: &str = "X-Payment-Status";
/// Response header carrying the base64-encoded settlement result.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-Payment-Response";

/// Shared per-process state: the payment gate and the resource provider.
pub struct PaygateState<F, R> {
    pub gate: PaymentGate<F>,
    pub provider: R,
}

/// Builds the router: the protected resource route plus a health endpoint.
pub fn routes<F, R>(resource_path: &str, state: Arc<PaygateState<F, R>>) -> Router
where
    F: Facilitator + Send + Sync + 'static,
    F::Error: FacilitatorFailure + Send,
    R: ResourceProvider + Send + Sync + 'static,
{
    Router::new()
        .route("/healthz", get(healthz))
        .route(resource_path, get(serve_resource::<F, R>))
        .with_state(state)
}

/// `GET /healthz`: liveness probe.
async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// `GET <resource>`: the payment-gated resource.
#[instrument(skip_all)]
async fn serve_resource<F, R>(
    State(state): State<Arc<PaygateState<F, R>>>,
    headers: HeaderMap,
) -> Response
where
    F: Facilitator,
    F::Error: FacilitatorFailure,
    R: ResourceProvider,
{
    // Non-ASCII header bytes cannot be base64; let the codec reject them.
    let payment_header = headers
        .get(PAYMENT_HEADER)
        .map(|value| value.to_str().unwrap_or("\u{fffd}"));

    let outcome = state.gate.run(payment_header).await;
    let challenge = || state.gate.challenge_requirements();
    match outcome {
        AttemptOutcome::Challenge => {
            challenge_response(challenge(), "X-Payment header is required")
        }
        AttemptOutcome::Rejected {
            reason,
            detail,
            payer,
        } => rejection_response(challenge(), &reason, detail.as_deref(), payer),
        AttemptOutcome::Accepted { settlement, payer } => {
            match state.provider.grant().await {
                Ok(grant) => {
                    tracing::info!(payer = ?payer, "Payment accepted; issuing resource grant");
                    accepted_response(grant, settlement)
                }
                Err(err) => {
                    tracing::error!(error = %err, "Resource provider failed after accepted payment");
                    internal_error_response(err.to_string())
                }
            }
        }
    }
}

/// Renders the 402 challenge for a request without a payment.
pub fn challenge_response(requirements: PaymentRequirements, message: &str) -> Response {
    payment_required(message.to_string(), requirements, None)
}

/// Renders the 402 rejection for a payment that was not accepted.
pub fn rejection_response(
    requirements: PaymentRequirements,
    reason: &str,
    detail: Option<&str>,
    payer: Option<EvmAddress>,
) -> Response {
    payment_required(rejection_message(reason, detail), requirements, payer)
}

fn payment_required(
    error: String,
    requirements: PaymentRequirements,
    payer: Option<EvmAddress>,
) -> Response {
    let body = PaymentRequiredResponse {
        error,
        accepts: vec![requirements],
        payer,
        x402_version: X402Version::V1,
    };
    (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
}

/// Maps a rejection reason to the client-facing error message.
///
/// Signature/address mismatches get instructional guidance; other reasons
/// render generically with the reason tag embedded.
fn rejection_message(reason: &str, detail: Option<&str>) -> String {
    if reason == invalid_reason::SIGNATURE_ADDRESS_MISMATCH {
        return format!(
            "Payment signature does not match the paying address. \
             Sign the authorization with the wallet that funds the transfer, \
             using the token's exact EIP-712 domain ({reason})"
        );
    }
    match detail {
        Some(detail) => format!("Payment rejected ({reason}): {detail}"),
        None => format!("Payment rejected: {reason}"),
    }
}

/// Renders the 200 acceptance: grant body, `X-Payment-Status: verified`, and
/// `X-Payment-Response` only when settlement succeeded.
pub fn accepted_response(grant: ResourceGrant, settlement: Option<SettleResponse>) -> Response {
    let mut response = (StatusCode::OK, Json(grant)).into_response();
    response.headers_mut().insert(
        PAYMENT_STATUS_HEADER,
        HeaderValue::from_static("verified"),
    );
    if let Some(settlement) = settlement {
        match settlement_header(&settlement) {
            Ok(value) => {
                response.headers_mut().insert(PAYMENT_RESPONSE_HEADER, value);
            }
            Err(err) => {
                // The payment went through; a missing header is the lesser harm
                tracing::warn!(error = %err, "Failed to encode settlement response header");
            }
        }
    }
    response
}

fn settlement_header(
    settlement: &SettleResponse,
) -> Result<HeaderValue, Box<dyn std::error::Error>> {
    let encoded: Base64Bytes = settlement.try_into()?;
    Ok(HeaderValue::from_bytes(encoded.as_ref())?)
}

/// Renders the 500 shape for unclassified faults.
pub fn internal_error_response(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "internal_server_error",
            "message": message,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::policy::SettlementPolicy;
    use crate::requirements::{RequirementsTemplate, ResourceInfo};
    use crate::resource::SignedUrlProvider;
    use crate::timestamp::UnixTimestamp;
    use crate::types::{MoneyAmount, VerifyRequest, VerifyResponse};
    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as b64;
    use serde_json::json;
    use std::fmt::Display;
    use tower::ServiceExt;

    #[derive(Debug)]
    struct StubError(String);

    impl Display for StubError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl FacilitatorFailure for StubError {}

    struct StubFacilitator {
        verify: VerifyResponse,
        settle: Result<SettleResponse, String>,
    }

    impl Facilitator for StubFacilitator {
        type Error = StubError;

        fn verify(
            &self,
            _request: &VerifyRequest,
        ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
            let response = self.verify.clone();
            async move { Ok(response) }
        }

        fn settle(
            &self,
            _request: &VerifyRequest,
        ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
            let result = self.settle.clone().map_err(StubError);
            async move { result }
        }
    }

    struct FailingProvider;

    impl ResourceProvider for FailingProvider {
        type Error = String;

        fn grant(
            &self,
        ) -> impl Future<Output = Result<ResourceGrant, Self::Error>> + Send {
            async { Err("storage unreachable".to_string()) }
        }
    }

    fn payer() -> EvmAddress {
        "0xdAcD51A54883eb67D95FAEb2BBfdC4a9a6BD2a3B"
            .parse()
            .unwrap()
    }

    fn pay_to() -> EvmAddress {
        "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            .parse()
            .unwrap()
    }

    fn template() -> RequirementsTemplate {
        RequirementsTemplate::try_new(
            Network::Base,
            &MoneyAmount::parse("0.01").unwrap(),
            pay_to(),
            ResourceInfo {
                url: "https://api.example.com/premium".parse().unwrap(),
                description: "Premium content".to_string(),
                mime_type: "application/json".to_string(),
                metadata: None,
            },
        )
        .unwrap()
    }

    fn provider() -> SignedUrlProvider {
        SignedUrlProvider::new(
            "https://storage.example.com/premium.json".parse().unwrap(),
            300,
            None,
        )
    }

    fn app(verify: VerifyResponse, settle: Result<SettleResponse, String>) -> Router {
        let gate = PaymentGate::new(
            StubFacilitator { verify, settle },
            template(),
            SettlementPolicy::Lenient,
        );
        routes(
            "/premium",
            Arc::new(PaygateState {
                gate,
                provider: provider(),
            }),
        )
    }

    fn settled() -> SettleResponse {
        SettleResponse {
            success: true,
            transaction: Some("0xdead".to_string()),
            network: Network::Base,
            payer: Some(payer()),
            error_reason: None,
            error_message: None,
            error_type: None,
        }
    }

    fn payment_header_value() -> String {
        let valid_before = UnixTimestamp::now().as_secs() + 120;
        let body = json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": "base",
            "payload": {
                "signature": format!("0x{}", "ab".repeat(65)),
                "authorization": {
                    "from": payer().to_string(),
                    "to": pay_to().to_string(),
                    "value": "10000",
                    "validAfter": "0",
                    "validBefore": valid_before.to_string(),
                    "nonce": format!("0x{}", "11".repeat(32)),
                }
            }
        });
        b64.encode(body.to_string())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_header_answers_challenge() {
        let app = app(VerifyResponse::valid(payer()), Ok(settled()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/premium")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let body = body_json(response).await;
        assert_eq!(body["x402Version"], 1);
        let accepts = &body["accepts"][0];
        assert_eq!(accepts["maxAmountRequired"], "10000");
        assert_eq!(accepts["extra"]["name"], "USD Coin");
        assert_eq!(
            accepts["asset"],
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
        );
        assert_eq!(accepts["maxTimeoutSeconds"], 60);
    }

    #[tokio::test]
    async fn settled_payment_answers_with_both_headers() {
        let app = app(VerifyResponse::valid(payer()), Ok(settled()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/premium")
                    .header(PAYMENT_HEADER, payment_header_value())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(PAYMENT_STATUS_HEADER).unwrap(),
            "verified"
        );

        let encoded = response
            .headers()
            .get(PAYMENT_RESPONSE_HEADER)
            .expect("settlement header present")
            .to_str()
            .unwrap()
            .to_string();
        let decoded: serde_json::Value = serde_json::from_slice(
            &Base64Bytes::from(encoded.as_bytes()).decode().unwrap(),
        )
        .unwrap();
        assert_eq!(decoded["success"], true);
        assert_eq!(decoded["transaction"], "0xdead");
        assert_eq!(decoded["network"], "base");
        assert_eq!(decoded["payer"], payer().to_string());

        let body = body_json(response).await;
        assert!(body["url"].as_str().unwrap().starts_with("https://storage.example.com/"));
        assert!(body["expiresAt"].is_string());
    }

    #[tokio::test]
    async fn failed_settlement_still_grants_access_without_header() {
        let app = app(
            VerifyResponse::valid(payer()),
            Err("settlement reverted".to_string()),
        );
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/premium")
                    .header(PAYMENT_HEADER, payment_header_value())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(PAYMENT_STATUS_HEADER).unwrap(),
            "verified"
        );
        assert!(response.headers().get(PAYMENT_RESPONSE_HEADER).is_none());
    }

    #[tokio::test]
    async fn signature_mismatch_gets_instructional_message() {
        let app = app(
            VerifyResponse::invalid(invalid_reason::SIGNATURE_ADDRESS_MISMATCH, Some(payer())),
            Ok(settled()),
        );
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/premium")
                    .header(PAYMENT_HEADER, payment_header_value())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("Sign the authorization"));
        assert!(message.contains(invalid_reason::SIGNATURE_ADDRESS_MISMATCH));
    }

    #[tokio::test]
    async fn malformed_header_is_rejected_with_challenge_body() {
        let app = app(VerifyResponse::valid(payer()), Ok(settled()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/premium")
                    .header(PAYMENT_HEADER, "###")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = body_json(response).await;
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .contains("INVALID_BASE64_ENCODING")
        );
        assert_eq!(body["accepts"][0]["maxAmountRequired"], "10000");
    }

    #[tokio::test]
    async fn provider_failure_is_internal_error() {
        let gate = PaymentGate::new(
            StubFacilitator {
                verify: VerifyResponse::valid(payer()),
                settle: Ok(settled()),
            },
            template(),
            SettlementPolicy::Lenient,
        );
        let app = routes(
            "/premium",
            Arc::new(PaygateState {
                gate,
                provider: FailingProvider,
            }),
        );
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/premium")
                    .header(PAYMENT_HEADER, payment_header_value())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "internal_server_error");
        assert_eq!(body["message"], "storage unreachable");
    }

    #[tokio::test]
    async fn healthz_is_open() {
        let app = app(VerifyResponse::valid(payer()), Ok(settled()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

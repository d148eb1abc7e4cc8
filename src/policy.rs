//! The per-attempt payment decision: decode, verify, check expiry, settle, decide.
//!
//! [`PaymentGate::run`] drives one attempt from the raw `X-Payment` header to an
//! [`AttemptOutcome`]. Verification and settlement are strictly sequential; the
//! whole sequence runs under one deadline of
//! [`MAX_TIMEOUT_SECONDS`](crate::requirements::MAX_TIMEOUT_SECONDS).
//!
//! Settlement failures are judged by a named, configurable [`SettlementPolicy`]
//! rather than inline conditionals. The default [`SettlementPolicy::Lenient`]
//! grants access even when settlement fails: verification has already proven a
//! validly signed, in-window authorization, and settlement failures reflect
//! facilitator-side execution risk rather than payer fault.
//! [`SettlementPolicy::Strict`] rejects instead.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

use crate::facilitator::Facilitator;
use crate::facilitator_client::FacilitatorClientError;
use crate::payload::{PaymentHeaderError, decode_payment_header};
use crate::requirements::{MAX_TIMEOUT_SECONDS, RequirementsTemplate};
use crate::timestamp::UnixTimestamp;
use crate::types::{
    EvmAddress, PaymentRequirements, SettleResponse, VerifyRequest, VerifyResponse, X402Version,
};

/// Rejection reason tags produced locally by the gate.
///
/// Decode-stage rejections carry [`PaymentHeaderError::code`] values instead;
/// verify-stage rejections carry the facilitator's `invalidReason` verbatim.
pub mod reject_reason {
    /// The authorization's `validBefore` is in the past.
    pub const AUTHORIZATION_EXPIRED: &str = "AUTHORIZATION_EXPIRED";
    /// The verify call failed outside the protocol (transport, deadline).
    pub const VERIFICATION_FAILED: &str = "VERIFICATION_FAILED";
    /// Per-operation auth headers could not be derived.
    pub const AUTH_HEADER_CREATION_FAILED: &str = "AUTH_HEADER_CREATION_FAILED";
    /// The settle call failed outside the protocol (transport, deadline).
    pub const SETTLEMENT_ERROR: &str = "SETTLEMENT_ERROR";
    /// The facilitator declined the settlement.
    pub const SETTLEMENT_FAILED: &str = "SETTLEMENT_FAILED";
}

/// Classification of facilitator errors into attempt-level rejection reasons.
///
/// Implemented by facilitator error types so the gate can tag rejections
/// without knowing the concrete error shape.
pub trait FacilitatorFailure: Display {
    /// Reason tag when this failure occurs during verification.
    fn verify_reason(&self) -> &'static str {
        reject_reason::VERIFICATION_FAILED
    }

    /// Reason tag when this failure occurs during settlement.
    fn settle_reason(&self) -> &'static str {
        reject_reason::SETTLEMENT_ERROR
    }
}

impl FacilitatorFailure for FacilitatorClientError {
    fn verify_reason(&self) -> &'static str {
        match self {
            FacilitatorClientError::AuthHeader(_) => reject_reason::AUTH_HEADER_CREATION_FAILED,
            _ => reject_reason::VERIFICATION_FAILED,
        }
    }

    fn settle_reason(&self) -> &'static str {
        match self {
            FacilitatorClientError::AuthHeader(_) => reject_reason::AUTH_HEADER_CREATION_FAILED,
            FacilitatorClientError::SettlementDeclined { .. } => reject_reason::SETTLEMENT_FAILED,
            _ => reject_reason::SETTLEMENT_ERROR,
        }
    }
}

/// A settlement failure as seen by the policy: a reason tag plus detail text.
#[derive(Debug, Clone)]
pub struct SettlementFailure {
    pub reason: &'static str,
    pub detail: String,
}

/// The result of one payment attempt, consumed by the response composer.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// No payment was presented: answer with the payment challenge.
    Challenge,
    /// The payment was presented but not accepted.
    Rejected {
        reason: String,
        detail: Option<String>,
        payer: Option<EvmAddress>,
    },
    /// The payment was verified; access is granted. `settlement` is present
    /// only when settlement succeeded.
    Accepted {
        settlement: Option<SettleResponse>,
        payer: Option<EvmAddress>,
    },
}

/// Named policy deciding the outcome once verification has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SettlementPolicy {
    /// Grant access regardless of settlement success. Verification already
    /// proved a validly signed, in-window authorization; settlement failure is
    /// facilitator-side execution risk, not payer fault.
    #[default]
    Lenient,
    /// Reject when settlement fails.
    Strict,
}

impl SettlementPolicy {
    /// Decides the attempt outcome from the settlement result.
    pub fn decide(
        &self,
        settlement: Result<SettleResponse, SettlementFailure>,
        payer: Option<EvmAddress>,
    ) -> AttemptOutcome {
        match settlement {
            Ok(response) => {
                let payer = response.payer.or(payer);
                AttemptOutcome::Accepted {
                    settlement: Some(response),
                    payer,
                }
            }
            Err(failure) => match self {
                SettlementPolicy::Lenient => {
                    tracing::warn!(
                        reason = failure.reason,
                        detail = %failure.detail,
                        "Settlement failed; granting access under lenient policy"
                    );
                    AttemptOutcome::Accepted {
                        settlement: None,
                        payer,
                    }
                }
                SettlementPolicy::Strict => AttemptOutcome::Rejected {
                    reason: failure.reason.to_string(),
                    detail: Some(failure.detail),
                    payer,
                },
            },
        }
    }
}

/// Drives one payment attempt end to end.
///
/// All state is attempt-scoped: the gate itself holds only startup-time
/// configuration and is freely shared across requests.
#[derive(Debug, Clone)]
pub struct PaymentGate<F> {
    facilitator: F,
    template: RequirementsTemplate,
    policy: SettlementPolicy,
}

impl<F> PaymentGate<F> {
    pub fn new(facilitator: F, template: RequirementsTemplate, policy: SettlementPolicy) -> Self {
        Self {
            facilitator,
            template,
            policy,
        }
    }

    pub fn policy(&self) -> SettlementPolicy {
        self.policy
    }

    /// The requirements advertised in challenges, before any payload is known.
    pub fn challenge_requirements(&self) -> PaymentRequirements {
        self.template.build(None)
    }
}

impl<F> PaymentGate<F>
where
    F: Facilitator,
    F::Error: FacilitatorFailure,
{
    /// Runs one attempt against the raw `X-Payment` header value.
    pub async fn run(&self, header: Option<&str>) -> AttemptOutcome {
        let Some(raw) = header else {
            return AttemptOutcome::Challenge;
        };

        let payload = match decode_payment_header(raw) {
            Ok(payload) => payload,
            // A present-but-empty header carries no payment either
            Err(PaymentHeaderError::EmptyPayload) => return AttemptOutcome::Challenge,
            Err(err) => {
                tracing::debug!(code = err.code(), error = %err, "Payment header rejected");
                return AttemptOutcome::Rejected {
                    reason: err.code().to_string(),
                    detail: Some(err.to_string()),
                    payer: None,
                };
            }
        };

        let authorization = payload.payload.authorization;

        // Built once; the same value flows into verify and settle so both
        // calls serialize identical requirements.
        let request = VerifyRequest {
            x402_version: X402Version::V1,
            payment_payload: payload,
            payment_requirements: self.template.build(Some(authorization.to)),
        };

        // One deadline spans the whole verify → settle sequence.
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(MAX_TIMEOUT_SECONDS);

        let verify_response =
            match tokio::time::timeout_at(deadline, self.facilitator.verify(&request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "Verification call failed");
                    return AttemptOutcome::Rejected {
                        reason: err.verify_reason().to_string(),
                        detail: Some(err.to_string()),
                        payer: None,
                    };
                }
                Err(_elapsed) => {
                    return AttemptOutcome::Rejected {
                        reason: reject_reason::VERIFICATION_FAILED.to_string(),
                        detail: Some("attempt deadline exceeded during verification".to_string()),
                        payer: None,
                    };
                }
            };

        let payer = verify_response.payer().or(Some(authorization.from));
        if let VerifyResponse::Invalid { reason, .. } = verify_response {
            tracing::info!(reason = %reason, payer = ?payer, "Payment failed verification");
            return AttemptOutcome::Rejected {
                reason,
                detail: None,
                payer,
            };
        }

        let now = UnixTimestamp::now();
        if now > authorization.valid_before {
            return AttemptOutcome::Rejected {
                reason: reject_reason::AUTHORIZATION_EXPIRED.to_string(),
                detail: Some(format!(
                    "authorization expired at {}",
                    authorization.valid_before
                )),
                payer,
            };
        }
        if now < authorization.valid_after {
            // The facilitator re-checks activation; local policy lets it through
            tracing::warn!(
                valid_after = %authorization.valid_after,
                payer = ?payer,
                "Authorization not yet active"
            );
        }

        let settlement =
            match tokio::time::timeout_at(deadline, self.facilitator.settle(&request)).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(SettlementFailure {
                    reason: err.settle_reason(),
                    detail: err.to_string(),
                }),
                Err(_elapsed) => Err(SettlementFailure {
                    reason: reject_reason::SETTLEMENT_ERROR,
                    detail: "attempt deadline exceeded during settlement".to_string(),
                }),
            };

        self.policy.decide(settlement, payer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::requirements::ResourceInfo;
    use crate::types::{MoneyAmount, SettleResponse};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as b64;
    use serde_json::json;

    #[derive(Debug)]
    struct StubError(String);

    impl Display for StubError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl FacilitatorFailure for StubError {}

    /// Facilitator double returning canned answers.
    struct StubFacilitator {
        verify: Result<VerifyResponse, String>,
        settle: Result<SettleResponse, String>,
    }

    impl Facilitator for StubFacilitator {
        type Error = StubError;

        fn verify(
            &self,
            _request: &VerifyRequest,
        ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
            let result = self.verify.clone().map_err(StubError);
            async move { result }
        }

        fn settle(
            &self,
            _request: &VerifyRequest,
        ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
            let result = self.settle.clone().map_err(StubError);
            async move { result }
        }
    }

    fn pay_to() -> EvmAddress {
        "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            .parse()
            .unwrap()
    }

    fn payer() -> EvmAddress {
        "0xdAcD51A54883eb67D95FAEb2BBfdC4a9a6BD2a3B"
            .parse()
            .unwrap()
    }

    fn gate(
        verify: Result<VerifyResponse, String>,
        settle: Result<SettleResponse, String>,
        policy: SettlementPolicy,
    ) -> PaymentGate<StubFacilitator> {
        let template = RequirementsTemplate::try_new(
            Network::BaseSepolia,
            &MoneyAmount::parse("0.01").unwrap(),
            pay_to(),
            ResourceInfo {
                url: "https://api.example.com/premium".parse().unwrap(),
                description: "Premium content".to_string(),
                mime_type: "application/json".to_string(),
                metadata: None,
            },
        )
        .unwrap();
        PaymentGate::new(StubFacilitator { verify, settle }, template, policy)
    }

    fn settled() -> SettleResponse {
        SettleResponse {
            success: true,
            transaction: Some("0xdead".to_string()),
            network: Network::BaseSepolia,
            payer: Some(payer()),
            error_reason: None,
            error_message: None,
            error_type: None,
        }
    }

    fn header(valid_before: u64) -> String {
        let body = json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": "base-sepolia",
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

    #[tokio::test]
    async fn missing_header_yields_challenge() {
        let gate = gate(
            Ok(VerifyResponse::valid(payer())),
            Ok(settled()),
            SettlementPolicy::Lenient,
        );
        assert!(matches!(gate.run(None).await, AttemptOutcome::Challenge));
        assert!(matches!(
            gate.run(Some("   ")).await,
            AttemptOutcome::Challenge
        ));
    }

    #[tokio::test]
    async fn malformed_header_is_rejected_with_code() {
        let gate = gate(
            Ok(VerifyResponse::valid(payer())),
            Ok(settled()),
            SettlementPolicy::Lenient,
        );
        match gate.run(Some("!!!")).await {
            AttemptOutcome::Rejected { reason, .. } => {
                assert_eq!(reason, "INVALID_BASE64_ENCODING");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_verification_propagates_reason() {
        let gate = gate(
            Ok(VerifyResponse::invalid(
                crate::types::invalid_reason::SIGNATURE_ADDRESS_MISMATCH,
                Some(payer()),
            )),
            Ok(settled()),
            SettlementPolicy::Lenient,
        );
        let far_future = UnixTimestamp::now().as_secs() + 120;
        match gate.run(Some(&header(far_future))).await {
            AttemptOutcome::Rejected { reason, payer: p, .. } => {
                assert_eq!(
                    reason,
                    crate::types::invalid_reason::SIGNATURE_ADDRESS_MISMATCH
                );
                assert_eq!(p, Some(payer()));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_authorization_is_rejected_locally() {
        let gate = gate(
            Ok(VerifyResponse::valid(payer())),
            Ok(settled()),
            SettlementPolicy::Lenient,
        );
        let just_expired = UnixTimestamp::now().as_secs() - 1;
        match gate.run(Some(&header(just_expired))).await {
            AttemptOutcome::Rejected { reason, .. } => {
                assert_eq!(reason, reject_reason::AUTHORIZATION_EXPIRED);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn in_window_authorization_settles() {
        let gate = gate(
            Ok(VerifyResponse::valid(payer())),
            Ok(settled()),
            SettlementPolicy::Lenient,
        );
        let just_valid = UnixTimestamp::now().as_secs() + 1;
        match gate.run(Some(&header(just_valid))).await {
            AttemptOutcome::Accepted { settlement, .. } => {
                assert_eq!(settlement.unwrap().transaction.as_deref(), Some("0xdead"));
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lenient_policy_accepts_despite_settlement_failure() {
        let gate = gate(
            Ok(VerifyResponse::valid(payer())),
            Err("settlement reverted".to_string()),
            SettlementPolicy::Lenient,
        );
        let far_future = UnixTimestamp::now().as_secs() + 120;
        match gate.run(Some(&header(far_future))).await {
            AttemptOutcome::Accepted { settlement, payer: p } => {
                assert!(settlement.is_none());
                assert_eq!(p, Some(payer()));
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn strict_policy_rejects_on_settlement_failure() {
        let gate = gate(
            Ok(VerifyResponse::valid(payer())),
            Err("settlement reverted".to_string()),
            SettlementPolicy::Strict,
        );
        let far_future = UnixTimestamp::now().as_secs() + 120;
        match gate.run(Some(&header(far_future))).await {
            AttemptOutcome::Rejected { reason, detail, .. } => {
                assert_eq!(reason, reject_reason::SETTLEMENT_ERROR);
                assert_eq!(detail.as_deref(), Some("settlement reverted"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_transport_failure_is_rejected() {
        let gate = gate(
            Err("connection refused".to_string()),
            Ok(settled()),
            SettlementPolicy::Lenient,
        );
        let far_future = UnixTimestamp::now().as_secs() + 120;
        match gate.run(Some(&header(far_future))).await {
            AttemptOutcome::Rejected { reason, .. } => {
                assert_eq!(reason, reject_reason::VERIFICATION_FAILED);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}

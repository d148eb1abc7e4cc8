//! Core trait defining the verification and settlement interface consumed by the paygate.
//!
//! Implementors of this trait are responsible for validating incoming payment payloads
//! against specified requirements [`Facilitator::verify`] and executing on-chain transfers
//! [`Facilitator::settle`]. The paygate itself never touches a chain: the production
//! implementation is a remote HTTP client ([`crate::facilitator_client::RemoteFacilitator`]),
//! and tests substitute stubs.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::types::{SettleRequest, SettleResponse, VerifyRequest, VerifyResponse};

/// Trait defining the asynchronous interface for x402 payment facilitators.
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Verifies a proposed x402 payment payload against a [`VerifyRequest`].
    ///
    /// This includes checking payload integrity, signature validity, balance sufficiency,
    /// network compatibility, and compliance with the declared payment requirements.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the facilitator could not be reached or answered
    /// outside the protocol. A well-formed negative answer is `Ok` with
    /// [`VerifyResponse::Invalid`].
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Executes an on-chain x402 settlement for a valid [`SettleRequest`].
    ///
    /// Must only be invoked after [`Facilitator::verify`] confirmed the payload,
    /// and with the identical requirements object used for that verification.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if settlement failed, including facilitators that
    /// report failure inside an HTTP 200 body.
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }
}

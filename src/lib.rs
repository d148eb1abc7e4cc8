//! Payment-gated resource serving over the [x402 protocol](https://www.x402.org).
//!
//! This crate implements the seller side of an x402 flow: an HTTP server that
//! advertises payment requirements for a protected resource, accepts a
//! client-supplied signed payment authorization, verifies and settles it
//! through a **remote facilitator**, and only then grants access.
//!
//! # Flow
//!
//! A request without an `X-Payment` header receives a `402 Payment Required`
//! challenge listing acceptable [`types::PaymentRequirements`]. A request with
//! a payment header is decoded ([`payload`]), matched against requirements
//! built once per attempt ([`requirements`]), verified and settled against the
//! facilitator ([`facilitator_client`]), and judged by the configured
//! settlement policy ([`policy`]). Accepted attempts receive a time-bounded
//! resource grant ([`resource`]).
//!
//! # Modules
//!
//! - [`config`] — Configuration loading with env-var indirection for secrets.
//! - [`facilitator`] — The [`Facilitator`](facilitator::Facilitator) trait for payment verification and settlement.
//! - [`facilitator_client`] — Remote facilitator HTTP client, binding-strategy selection, endpoint fallback.
//! - [`handlers`] — HTTP endpoint handlers and the three protocol response shapes.
//! - [`network`] — Supported networks and their USDC deployments.
//! - [`payload`] — Decoding of the `X-Payment` header.
//! - [`policy`] — The per-attempt state machine and the lenient/strict settlement policy.
//! - [`requirements`] — Canonical payment-requirements construction.
//! - [`resource`] — Resource access grants issued after accepted payments.
//! - [`timestamp`] — Unix timestamp type for payment authorization windows.
//! - [`types`] — Wire types shared with facilitators and clients.

pub mod config;
pub mod facilitator;
pub mod facilitator_client;
pub mod handlers;
pub mod network;
pub mod payload;
pub mod policy;
pub mod requirements;
pub mod resource;
pub mod sig_down;
pub mod telemetry;
pub mod timestamp;
pub mod types;

//! Client-side contract for the verification gateway.
//!
//! The gateway is the dashboard backend that actually talks to Telegram.
//! This crate only models the logical request/response contract: DTOs, the
//! four-way outcome taxonomy, an HTTP implementation over `reqwest`, and the
//! cached "does this user have a linked account" read model.

pub mod client;
pub mod config;
pub mod error;
pub mod status;
pub mod types;

pub use {
    client::{HttpVerificationGateway, VerificationGateway},
    config::GatewayConfig,
    error::{Context, Error, Result},
    status::{CredentialStatus, CredentialStatusQuery},
    types::{
        CallOutcome, CredentialsStatusResponse, OkResponse, SendCodeRequest, SendCodeResponse,
        ValidateCredentialsResponse, VerifyCodeRequest, VerifyCodeResponse, VerifyPasswordRequest,
        VerifyPasswordResponse,
    },
};

//! HTTP client for the verification gateway.
//!
//! Each operation is a single attempt: the caller decides whether and when
//! to retry (the linking flow only ever retries through an explicit user
//! action such as "resend code").

use {async_trait::async_trait, reqwest::StatusCode, serde::de::DeserializeOwned};

use crate::{
    config::GatewayConfig,
    error::Result,
    types::{
        ApiErrorBody, CallOutcome, CredentialsStatusResponse, OkResponse, SendCodeRequest,
        SendCodeResponse, ValidateCredentialsResponse, VerifyCodeRequest, VerifyCodeResponse,
        VerifyPasswordRequest, VerifyPasswordResponse,
    },
};

/// Backoff assumed when the gateway answers 429 without a `retry_after`.
const FALLBACK_RETRY_AFTER_SECS: u64 = 60;

/// The verification gateway as consumed by the linking flow.
///
/// Implementations answer with a [`CallOutcome`] instead of a `Result` so
/// the state machine can switch on the failure category directly.
#[async_trait]
pub trait VerificationGateway: Send + Sync {
    /// Ask the gateway to deliver a one-time code to `phone_number`.
    async fn request_code(&self, request: SendCodeRequest) -> CallOutcome<SendCodeResponse>;

    /// Verify a received one-time code against the issued token pair.
    async fn verify_code(&self, request: VerifyCodeRequest) -> CallOutcome<VerifyCodeResponse>;

    /// Verify the second-factor password for a code-verified session.
    async fn verify_password(
        &self,
        request: VerifyPasswordRequest,
    ) -> CallOutcome<VerifyPasswordResponse>;

    /// Delete the stored credentials of the current user.
    async fn delete_credentials(&self) -> CallOutcome<OkResponse>;

    /// Check whether the stored credentials still authenticate.
    async fn validate_credentials(&self) -> CallOutcome<ValidateCredentialsResponse>;

    /// Fetch whether the current user already has a linked account.
    async fn credentials_status(&self) -> CallOutcome<CredentialsStatusResponse>;
}

/// [`VerificationGateway`] over HTTP, speaking to the dashboard backend's
/// `/user/telegram-credentials` endpoint family.
pub struct HttpVerificationGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpVerificationGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    /// Send a prepared request and fold the HTTP answer into a [`CallOutcome`].
    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> CallOutcome<T> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "gateway call failed in transport");
                return CallOutcome::Transport(err.to_string());
            },
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return CallOutcome::Transport(err.to_string()),
        };

        if status.is_success() {
            return match serde_json::from_str::<T>(&body) {
                Ok(parsed) => CallOutcome::Success(parsed),
                Err(err) => CallOutcome::Transport(format!("malformed gateway response: {err}")),
            };
        }

        let error: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
        let message = error
            .error
            .unwrap_or_else(|| format!("gateway returned {status}"));

        if let Some(retry_after) = error.retry_after {
            tracing::debug!(retry_after, "gateway rate limited the call");
            return CallOutcome::RateLimited {
                retry_after,
                message,
            };
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return CallOutcome::RateLimited {
                retry_after: FALLBACK_RETRY_AFTER_SECS,
                message,
            };
        }
        CallOutcome::Domain(message)
    }
}

#[async_trait]
impl VerificationGateway for HttpVerificationGateway {
    async fn request_code(&self, request: SendCodeRequest) -> CallOutcome<SendCodeResponse> {
        tracing::debug!(phone = %request.phone_number, "requesting verification code");
        self.execute(
            self.client
                .post(self.url("/user/telegram-credentials/send-code"))
                .json(&request),
        )
        .await
    }

    async fn verify_code(&self, request: VerifyCodeRequest) -> CallOutcome<VerifyCodeResponse> {
        self.execute(
            self.client
                .post(self.url("/user/telegram-credentials/verify-code"))
                .json(&request),
        )
        .await
    }

    async fn verify_password(
        &self,
        request: VerifyPasswordRequest,
    ) -> CallOutcome<VerifyPasswordResponse> {
        self.execute(
            self.client
                .post(self.url("/user/telegram-credentials/verify-password"))
                .json(&request),
        )
        .await
    }

    async fn delete_credentials(&self) -> CallOutcome<OkResponse> {
        self.execute(
            self.client
                .delete(self.url("/user/telegram-credentials")),
        )
        .await
    }

    async fn validate_credentials(&self) -> CallOutcome<ValidateCredentialsResponse> {
        self.execute(
            self.client
                .post(self.url("/user/telegram-credentials/validate")),
        )
        .await
    }

    async fn credentials_status(&self) -> CallOutcome<CredentialsStatusResponse> {
        self.execute(self.client.get(self.url("/user/telegram-credentials")))
            .await
    }
}

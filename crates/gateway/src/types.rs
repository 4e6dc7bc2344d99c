//! Wire DTOs for the verification gateway and the per-call outcome taxonomy.

use serde::{Deserialize, Serialize};

/// Code lifetime the gateway assumes when it omits `expires_in`.
pub const DEFAULT_CODE_TTL_SECS: u64 = 300;

/// Outcome of a single gateway call.
///
/// Every call resolves to exactly one of these; callers switch on the
/// variant instead of inspecting ad hoc error shapes. There is no automatic
/// retry — a failed call is retried only by an explicit user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    /// The gateway accepted the call and answered with a payload.
    Success(T),
    /// The gateway answered, but rejected the call (wrong code, wrong
    /// password, unknown session, ...).
    Domain(String),
    /// The gateway asked the client to back off before calling again.
    RateLimited { retry_after: u64, message: String },
    /// No gateway answer at all (connection refused, timeout, bad body).
    Transport(String),
}

// ── Requests ────────────────────────────────────────────────────────────────

/// Body of a send-code call: the user's own API key pair plus the phone
/// number the one-time code should be delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendCodeRequest {
    pub telegram_api_id: i64,
    pub telegram_api_hash: String,
    pub phone_number: String,
}

/// Body of a verify-code call. `phone_code_hash` and `session_key` are the
/// opaque tokens issued by the matching send-code call and must be passed
/// back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyCodeRequest {
    pub telegram_api_id: i64,
    pub telegram_api_hash: String,
    pub phone_number: String,
    pub code: String,
    pub phone_code_hash: String,
    pub session_key: String,
}

/// Body of a verify-password (second factor) call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyPasswordRequest {
    pub password: String,
    pub session_key: String,
}

// ── Responses ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendCodeResponse {
    pub ok: bool,
    #[serde(default)]
    pub code_sent: bool,
    #[serde(default)]
    pub session_key: String,
    #[serde(default)]
    pub phone_code_hash: String,
    /// Seconds the freshly sent code stays valid.
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    DEFAULT_CODE_TTL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyCodeResponse {
    pub ok: bool,
    #[serde(default)]
    pub authorized: bool,
    /// Set when the account has two-factor protection enabled and a
    /// password round trip is still required.
    #[serde(default)]
    pub needs_password: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPasswordResponse {
    pub ok: bool,
    #[serde(default)]
    pub authorized: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateCredentialsResponse {
    pub ok: bool,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsStatusResponse {
    pub ok: bool,
    #[serde(default)]
    pub has_credentials: bool,
    #[serde(default)]
    pub telegram_api_id: Option<i64>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Error body the gateway attaches to non-2xx answers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_after: Option<u64>,
}

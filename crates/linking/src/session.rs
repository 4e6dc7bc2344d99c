//! Mutable state carried across the steps of one linking attempt.
//!
//! A `LinkingSession` is owned exclusively by one controller instance; the
//! `epoch` counter lets asynchronous completions detect that the session
//! they were started for has since been reset.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, Secret};

use crate::validate::sanitize_code;

/// How long the success screen stays up before the flow resets to the view
/// step.
pub const SUCCESS_DISPLAY_DELAY: Duration = Duration::from_secs(2);

/// Fixed cooldown armed after every successful code send, independent of any
/// server-driven `retry_after`.
pub const RESEND_COOLDOWN_SECS: u64 = 60;

/// Ceiling on server-supplied durations (`expires_in`, `retry_after`).
/// Deadlines are armed from untrusted values; clamping keeps the instant
/// arithmetic from overflowing.
pub const MAX_COUNTDOWN_SECS: u64 = 24 * 60 * 60;

/// Steps of the linking wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStep {
    /// Show existing credentials (or the invitation to add some).
    View,
    /// Enter API ID, API hash, and phone number.
    Input,
    /// Enter the one-time code delivered to the phone.
    Code,
    /// Enter the second-factor password.
    Password,
    /// Terminal success screen; auto-resets after [`SUCCESS_DISPLAY_DELAY`].
    Success,
}

#[derive(Debug, Clone)]
pub struct LinkingSession {
    pub step: LinkStep,

    // Entered in the input step.
    pub api_id: Option<i64>,
    pub api_hash: String,
    pub phone_number: String,

    // Issued by a successful code request; cleared on any reset to view.
    pub session_key: Option<String>,
    pub phone_code_hash: Option<String>,

    /// One-time code, digit-only, at most 6 characters.
    pub code: String,
    /// Second factor, entered only in the password step.
    pub password: Secret<String>,

    pub code_expires_at: Option<Instant>,
    pub resend_cooldown_until: Option<Instant>,

    /// True while a gateway call for this session is in flight. At most one
    /// call may be outstanding at a time.
    pub pending_request: bool,

    /// Reset generation. Bumped on every full reset so completions of calls
    /// started against an earlier generation are dropped.
    pub epoch: u64,
}

impl Default for LinkingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkingSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            step: LinkStep::View,
            api_id: None,
            api_hash: String::new(),
            phone_number: String::new(),
            session_key: None,
            phone_code_hash: None,
            code: String::new(),
            password: Secret::new(String::new()),
            code_expires_at: None,
            resend_cooldown_until: None,
            pending_request: false,
            epoch: 0,
        }
    }

    /// Full reset back to the view step. Bumps the epoch so in-flight
    /// completions become no-ops.
    pub fn reset(&mut self) {
        let epoch = self.epoch + 1;
        *self = Self::new();
        self.epoch = epoch;
    }

    /// Enter the input step with cleared fields, keeping the epoch.
    pub fn begin_input(&mut self) {
        let epoch = self.epoch;
        *self = Self::new();
        self.epoch = epoch;
        self.step = LinkStep::Input;
    }

    /// Clear everything the user entered and every issued token. Used when
    /// entering the terminal success step.
    pub fn clear_credentials(&mut self) {
        self.api_id = None;
        self.api_hash.clear();
        self.phone_number.clear();
        self.session_key = None;
        self.phone_code_hash = None;
        self.code.clear();
        self.password = Secret::new(String::new());
        self.code_expires_at = None;
        self.resend_cooldown_until = None;
    }

    /// Store typed code input, keeping only the digit subsequence.
    pub fn set_code(&mut self, input: &str) {
        self.code = sanitize_code(input);
    }

    pub fn password_is_empty(&self) -> bool {
        self.password.expose_secret().is_empty()
    }

    /// Whether the current code is unusable because its deadline passed.
    /// A session without a deadline has no usable code either.
    #[must_use]
    pub fn code_expired(&self, now: Instant) -> bool {
        self.code_expires_at.is_none_or(|deadline| now >= deadline)
    }

    /// Whether a resend may be issued at `now`.
    #[must_use]
    pub fn resend_allowed(&self, now: Instant) -> bool {
        self.resend_cooldown_until
            .is_none_or(|deadline| now >= deadline)
    }

    #[must_use]
    pub fn code_secs_remaining(&self, now: Instant) -> u64 {
        remaining_secs(self.code_expires_at, now)
    }

    #[must_use]
    pub fn resend_secs_remaining(&self, now: Instant) -> u64 {
        remaining_secs(self.resend_cooldown_until, now)
    }
}

fn remaining_secs(deadline: Option<Instant>, now: Instant) -> u64 {
    deadline
        .map(|deadline| deadline.saturating_duration_since(now).as_secs())
        .unwrap_or(0)
}

/// Serializable view of the session for the hosting UI. Never carries the
/// password or the issued tokens.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub step: LinkStep,
    pub phone_number: String,
    pub pending_request: bool,
    pub code_secs_remaining: u64,
    pub resend_secs_remaining: u64,
}

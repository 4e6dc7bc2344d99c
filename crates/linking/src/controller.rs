//! Pure state machine driving the linking flow.
//!
//! [`LinkingController::apply`] is a transition function
//! `(state, event, now) → effects`: it mutates the owned session and returns
//! the side effects to execute, but performs no I/O itself. Gateway calls,
//! countdown timers, and notifications are carried out by the effect runner,
//! which feeds results back in as further events.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, Secret};

use tglink_gateway::types::{
    CallOutcome, OkResponse, SendCodeRequest, SendCodeResponse, ValidateCredentialsResponse,
    VerifyCodeRequest, VerifyCodeResponse, VerifyPasswordRequest, VerifyPasswordResponse,
};

use crate::{
    notify::Notice,
    session::{
        LinkStep, LinkingSession, MAX_COUNTDOWN_SECS, RESEND_COOLDOWN_SECS, SUCCESS_DISPLAY_DELAY,
    },
    validate::{CODE_MAX_LEN, CODE_MIN_LEN, ValidationError, is_valid_api_hash, is_valid_phone},
};

/// Everything that can happen to a linking session.
#[derive(Debug, Clone)]
pub enum LinkingEvent {
    /// Open the wizard when no account is linked yet.
    StartAuth,
    /// Re-authenticate over an existing linked account.
    StartReauth,

    // Typed form input.
    SetApiId(String),
    SetApiHash(String),
    SetPhoneNumber(String),
    SetCode(String),
    SetPassword(Secret<String>),

    // User-initiated transitions.
    RequestCode,
    VerifyCode,
    ResendCode,
    VerifyPassword,
    Cancel,
    DeleteCredentials,
    ValidateCredentials,

    /// A gateway call started earlier resolved.
    GatewayCompleted(GatewayCompletion),
    /// The success screen's display delay ran out.
    SuccessDelayElapsed,
}

/// Resolution of an in-flight gateway call, fed back as an event.
#[derive(Debug, Clone)]
pub enum GatewayCompletion {
    CodeRequest(CallOutcome<SendCodeResponse>),
    CodeVerify(CallOutcome<VerifyCodeResponse>),
    PasswordVerify(CallOutcome<VerifyPasswordResponse>),
    Delete(CallOutcome<OkResponse>),
    Validate(CallOutcome<ValidateCredentialsResponse>),
}

/// A gateway call the runner should dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    RequestCode(SendCodeRequest),
    VerifyCode(VerifyCodeRequest),
    VerifyPassword(VerifyPasswordRequest),
    Delete,
    Validate,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CallGateway(GatewayCall),
    /// (Re)start the code-expiry countdown; replaces any previous one.
    StartCodeCountdown { seconds: u64 },
    /// (Re)start the resend-cooldown countdown; replaces any previous one.
    StartResendCountdown { seconds: u64 },
    CancelCountdowns,
    /// Fire [`LinkingEvent::SuccessDelayElapsed`] after `delay`.
    ScheduleReset { delay: Duration },
    InvalidateCredentialStatus,
    Notify(Notice),
}

pub struct LinkingController {
    session: LinkingSession,
}

impl Default for LinkingController {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkingController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: LinkingSession::new(),
        }
    }

    pub fn session(&self) -> &LinkingSession {
        &self.session
    }

    /// Apply one event at wall-clock `now` and return the effects to run.
    pub fn apply(&mut self, event: LinkingEvent, now: Instant) -> Vec<Effect> {
        match event {
            LinkingEvent::GatewayCompleted(completion) => self.on_completion(completion, now),
            LinkingEvent::SuccessDelayElapsed => self.on_success_delay_elapsed(),
            LinkingEvent::Cancel => self.on_cancel(),
            // Everything else is direct user input; ignored wholesale while
            // a gateway call is in flight, so a second concurrent call can
            // never be triggered even if the UI forgets to disable controls.
            event if self.session.pending_request => {
                tracing::debug!(?event, "ignored while a gateway call is in flight");
                Vec::new()
            },
            LinkingEvent::StartAuth | LinkingEvent::StartReauth => self.on_start(),
            LinkingEvent::SetApiId(raw) => {
                self.session.api_id = raw.trim().parse().ok();
                Vec::new()
            },
            LinkingEvent::SetApiHash(raw) => {
                self.session.api_hash = raw.trim().to_string();
                Vec::new()
            },
            LinkingEvent::SetPhoneNumber(raw) => {
                self.session.phone_number = raw.trim().to_string();
                Vec::new()
            },
            LinkingEvent::SetCode(raw) => {
                self.session.set_code(&raw);
                Vec::new()
            },
            LinkingEvent::SetPassword(password) => {
                self.session.password = password;
                Vec::new()
            },
            LinkingEvent::RequestCode => self.on_request_code(),
            LinkingEvent::VerifyCode => self.on_verify_code(now),
            LinkingEvent::ResendCode => self.on_resend_code(now),
            LinkingEvent::VerifyPassword => self.on_verify_password(),
            LinkingEvent::DeleteCredentials => self.on_delete(),
            LinkingEvent::ValidateCredentials => self.on_validate(),
        }
    }

    // ── User transitions ────────────────────────────────────────────────────

    fn on_start(&mut self) -> Vec<Effect> {
        if self.session.step != LinkStep::View {
            return Vec::new();
        }
        self.session.begin_input();
        tracing::debug!("linking flow entered input step");
        Vec::new()
    }

    fn on_request_code(&mut self) -> Vec<Effect> {
        if self.session.step != LinkStep::Input {
            return Vec::new();
        }
        let request = match self.build_send_code_request() {
            Ok(request) => request,
            Err(err) => return vec![validation_notice(&err)],
        };
        self.session.pending_request = true;
        vec![Effect::CallGateway(GatewayCall::RequestCode(request))]
    }

    fn on_verify_code(&mut self, now: Instant) -> Vec<Effect> {
        if self.session.step != LinkStep::Code {
            return Vec::new();
        }
        let code_len = self.session.code.len();
        if !(CODE_MIN_LEN..=CODE_MAX_LEN).contains(&code_len) {
            return vec![validation_notice(&ValidationError::BadCode)];
        }
        if self.session.code_expired(now) {
            return vec![validation_notice(&ValidationError::CodeExpired)];
        }
        let request = match self.build_verify_code_request() {
            Ok(request) => request,
            Err(err) => return vec![validation_notice(&err)],
        };
        self.session.pending_request = true;
        vec![Effect::CallGateway(GatewayCall::VerifyCode(request))]
    }

    fn on_resend_code(&mut self, now: Instant) -> Vec<Effect> {
        if self.session.step != LinkStep::Code {
            return Vec::new();
        }
        if !self.session.resend_allowed(now) {
            // Deliberately a silent no-op: the UI shows the live cooldown.
            tracing::debug!(
                remaining = self.session.resend_secs_remaining(now),
                "resend requested before cooldown elapsed"
            );
            return Vec::new();
        }
        let request = match self.build_send_code_request() {
            Ok(request) => request,
            Err(err) => return vec![validation_notice(&err)],
        };
        self.session.code.clear();
        self.session.pending_request = true;
        vec![Effect::CallGateway(GatewayCall::RequestCode(request))]
    }

    fn on_verify_password(&mut self) -> Vec<Effect> {
        if self.session.step != LinkStep::Password {
            return Vec::new();
        }
        if self.session.password_is_empty() {
            return vec![validation_notice(&ValidationError::EmptyPassword)];
        }
        let Some(session_key) = self.session.session_key.clone() else {
            return vec![validation_notice(&ValidationError::MissingFields)];
        };
        self.session.pending_request = true;
        vec![Effect::CallGateway(GatewayCall::VerifyPassword(
            VerifyPasswordRequest {
                password: self.session.password.expose_secret().clone(),
                session_key,
            },
        ))]
    }

    fn on_delete(&mut self) -> Vec<Effect> {
        if self.session.step != LinkStep::View {
            return Vec::new();
        }
        self.session.pending_request = true;
        vec![Effect::CallGateway(GatewayCall::Delete)]
    }

    fn on_validate(&mut self) -> Vec<Effect> {
        if self.session.step != LinkStep::View {
            return Vec::new();
        }
        self.session.pending_request = true;
        vec![Effect::CallGateway(GatewayCall::Validate)]
    }

    fn on_cancel(&mut self) -> Vec<Effect> {
        if self.session.step == LinkStep::Success {
            // Terminal; the scheduled reset takes care of it.
            return Vec::new();
        }
        tracing::debug!(step = ?self.session.step, "linking flow cancelled");
        self.session.reset();
        vec![Effect::CancelCountdowns]
    }

    fn on_success_delay_elapsed(&mut self) -> Vec<Effect> {
        if self.session.step != LinkStep::Success {
            return Vec::new();
        }
        self.session.reset();
        Vec::new()
    }

    // ── Gateway completions ─────────────────────────────────────────────────

    fn on_completion(&mut self, completion: GatewayCompletion, now: Instant) -> Vec<Effect> {
        if !self.session.pending_request {
            tracing::warn!("gateway completion without an in-flight call, ignored");
            return Vec::new();
        }
        self.session.pending_request = false;

        match completion {
            GatewayCompletion::CodeRequest(outcome) => self.on_code_requested(outcome, now),
            GatewayCompletion::CodeVerify(outcome) => self.on_code_verified(outcome, now),
            GatewayCompletion::PasswordVerify(outcome) => self.on_password_verified(outcome, now),
            GatewayCompletion::Delete(outcome) => self.on_deleted(outcome, now),
            GatewayCompletion::Validate(outcome) => self.on_validated(outcome, now),
        }
    }

    fn on_code_requested(
        &mut self,
        outcome: CallOutcome<SendCodeResponse>,
        now: Instant,
    ) -> Vec<Effect> {
        match outcome {
            CallOutcome::Success(resp) if resp.ok && resp.code_sent => {
                // A resend lands here too: the fresh token pair fully
                // supersedes the previous one.
                let expires_in = resp.expires_in.min(MAX_COUNTDOWN_SECS);
                self.session.session_key = Some(resp.session_key);
                self.session.phone_code_hash = Some(resp.phone_code_hash);
                self.session.code_expires_at = Some(now + Duration::from_secs(expires_in));
                self.session.resend_cooldown_until =
                    Some(now + Duration::from_secs(RESEND_COOLDOWN_SECS));
                self.session.step = LinkStep::Code;
                tracing::info!(expires_in, "verification code sent");
                vec![
                    Effect::StartCodeCountdown {
                        seconds: expires_in,
                    },
                    Effect::StartResendCountdown {
                        seconds: RESEND_COOLDOWN_SECS,
                    },
                    Effect::Notify(Notice::success("Code sent").with_description(format!(
                        "Check Telegram on {}",
                        self.session.phone_number
                    ))),
                ]
            },
            CallOutcome::Success(_) => {
                vec![Effect::Notify(Notice::error("Failed to send code"))]
            },
            CallOutcome::Domain(message) => {
                vec![Effect::Notify(
                    Notice::error("Failed to send code").with_description(message),
                )]
            },
            CallOutcome::RateLimited {
                retry_after,
                message,
            } => self.arm_rate_limit(retry_after, message, now),
            CallOutcome::Transport(message) => vec![transport_notice(message)],
        }
    }

    fn on_code_verified(
        &mut self,
        outcome: CallOutcome<VerifyCodeResponse>,
        now: Instant,
    ) -> Vec<Effect> {
        if self.session.step != LinkStep::Code {
            return Vec::new();
        }
        match outcome {
            CallOutcome::Success(resp) if resp.ok && resp.authorized => {
                self.enter_success("Telegram account linked")
            },
            CallOutcome::Success(resp) if resp.ok && resp.needs_password => {
                self.session.step = LinkStep::Password;
                tracing::info!("second factor required");
                vec![Effect::Notify(Notice::info("Password required").with_description(
                    "Your account is protected by two-factor authentication",
                ))]
            },
            CallOutcome::Success(_) => vec![Effect::Notify(Notice::error("Authorization failed"))],
            // The entered code is kept so the user can correct it in place.
            CallOutcome::Domain(message) => {
                vec![Effect::Notify(
                    Notice::error("Code verification failed").with_description(message),
                )]
            },
            CallOutcome::RateLimited {
                retry_after,
                message,
            } => self.arm_rate_limit(retry_after, message, now),
            CallOutcome::Transport(message) => vec![transport_notice(message)],
        }
    }

    fn on_password_verified(
        &mut self,
        outcome: CallOutcome<VerifyPasswordResponse>,
        now: Instant,
    ) -> Vec<Effect> {
        if self.session.step != LinkStep::Password {
            return Vec::new();
        }
        match outcome {
            CallOutcome::Success(resp) if resp.ok && resp.authorized => {
                self.enter_success("Two-factor sign-in complete")
            },
            CallOutcome::Success(_) => self.on_password_rejected("Wrong two-factor password".into()),
            CallOutcome::Domain(message) => self.on_password_rejected(message),
            CallOutcome::RateLimited {
                retry_after,
                message,
            } => self.arm_rate_limit(retry_after, message, now),
            CallOutcome::Transport(message) => vec![transport_notice(message)],
        }
    }

    fn on_password_rejected(&mut self, description: String) -> Vec<Effect> {
        // Unlike the code, a rejected password is not retained.
        self.session.password = Secret::new(String::new());
        vec![Effect::Notify(
            Notice::error("Password verification failed").with_description(description),
        )]
    }

    fn on_deleted(&mut self, outcome: CallOutcome<OkResponse>, now: Instant) -> Vec<Effect> {
        match outcome {
            CallOutcome::Success(resp) if resp.ok => vec![
                Effect::Notify(Notice::success("Credentials deleted")),
                Effect::InvalidateCredentialStatus,
            ],
            CallOutcome::Success(_) => vec![Effect::Notify(Notice::error("Delete failed"))],
            CallOutcome::Domain(message) => {
                vec![Effect::Notify(
                    Notice::error("Delete failed").with_description(message),
                )]
            },
            CallOutcome::RateLimited {
                retry_after,
                message,
            } => self.arm_rate_limit(retry_after, message, now),
            CallOutcome::Transport(message) => vec![transport_notice(message)],
        }
    }

    fn on_validated(
        &mut self,
        outcome: CallOutcome<ValidateCredentialsResponse>,
        now: Instant,
    ) -> Vec<Effect> {
        match outcome {
            CallOutcome::Success(resp) if resp.ok && resp.valid => {
                vec![Effect::Notify(
                    Notice::success("Credentials are valid").with_description(resp.message),
                )]
            },
            CallOutcome::Success(resp) => {
                vec![Effect::Notify(
                    Notice::error("Credentials are invalid").with_description(resp.message),
                )]
            },
            CallOutcome::Domain(message) => {
                vec![Effect::Notify(
                    Notice::error("Validation failed").with_description(message),
                )]
            },
            CallOutcome::RateLimited {
                retry_after,
                message,
            } => self.arm_rate_limit(retry_after, message, now),
            CallOutcome::Transport(message) => vec![transport_notice(message)],
        }
    }

    // ── Shared pieces ───────────────────────────────────────────────────────

    /// Terminal success: wipe everything the user entered, show the success
    /// screen, and schedule the automatic reset back to the view step. The
    /// cached credential status is invalidated exactly once, here.
    fn enter_success(&mut self, title: &str) -> Vec<Effect> {
        self.session.clear_credentials();
        self.session.step = LinkStep::Success;
        tracing::info!("account linking succeeded");
        vec![
            Effect::CancelCountdowns,
            Effect::InvalidateCredentialStatus,
            Effect::ScheduleReset {
                delay: SUCCESS_DISPLAY_DELAY,
            },
            Effect::Notify(Notice::success(title)),
        ]
    }

    /// A `retry_after` from any call arms the resend cooldown without
    /// changing the step. The duration is untrusted and clamped.
    fn arm_rate_limit(&mut self, retry_after: u64, message: String, now: Instant) -> Vec<Effect> {
        let retry_after = retry_after.min(MAX_COUNTDOWN_SECS);
        self.session.resend_cooldown_until = Some(now + Duration::from_secs(retry_after));
        tracing::warn!(retry_after, "gateway rate limited the linking flow");
        vec![
            Effect::StartResendCountdown {
                seconds: retry_after,
            },
            Effect::Notify(
                Notice::error("Too many attempts")
                    .with_description(format!("{message}, wait {retry_after} seconds")),
            ),
        ]
    }

    fn build_send_code_request(&self) -> Result<SendCodeRequest, ValidationError> {
        let api_id = self.session.api_id.ok_or(ValidationError::MissingFields)?;
        if self.session.api_hash.is_empty() || self.session.phone_number.is_empty() {
            return Err(ValidationError::MissingFields);
        }
        if !is_valid_api_hash(&self.session.api_hash) {
            return Err(ValidationError::BadApiHash);
        }
        if !is_valid_phone(&self.session.phone_number) {
            return Err(ValidationError::BadPhone);
        }
        Ok(SendCodeRequest {
            telegram_api_id: api_id,
            telegram_api_hash: self.session.api_hash.clone(),
            phone_number: self.session.phone_number.clone(),
        })
    }

    fn build_verify_code_request(&self) -> Result<VerifyCodeRequest, ValidationError> {
        let base = self.build_send_code_request()?;
        let (Some(phone_code_hash), Some(session_key)) = (
            self.session.phone_code_hash.clone(),
            self.session.session_key.clone(),
        ) else {
            return Err(ValidationError::MissingFields);
        };
        Ok(VerifyCodeRequest {
            telegram_api_id: base.telegram_api_id,
            telegram_api_hash: base.telegram_api_hash,
            phone_number: base.phone_number,
            code: self.session.code.clone(),
            phone_code_hash,
            session_key,
        })
    }
}

fn validation_notice(err: &ValidationError) -> Effect {
    Effect::Notify(Notice::error(err.to_string()))
}

fn transport_notice(message: String) -> Effect {
    Effect::Notify(Notice::error("Network error").with_description(message))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use {super::*, crate::notify::NoticeLevel};

    const API_HASH: &str = "abcdef1234567890abcdef1234567890";
    const PHONE: &str = "+79001234567";

    fn now() -> Instant {
        Instant::now()
    }

    /// Controller advanced to the input step with valid fields entered.
    fn at_input(now: Instant) -> LinkingController {
        let mut c = LinkingController::new();
        c.apply(LinkingEvent::StartAuth, now);
        c.apply(LinkingEvent::SetApiId("12345678".into()), now);
        c.apply(LinkingEvent::SetApiHash(API_HASH.into()), now);
        c.apply(LinkingEvent::SetPhoneNumber(PHONE.into()), now);
        c
    }

    fn sent_response(expires_in: u64) -> SendCodeResponse {
        SendCodeResponse {
            ok: true,
            code_sent: true,
            session_key: "sk_1".into(),
            phone_code_hash: "pch_1".into(),
            expires_in,
        }
    }

    /// Controller advanced to the code step via a successful send.
    fn at_code(now: Instant) -> LinkingController {
        let mut c = at_input(now);
        let effects = c.apply(LinkingEvent::RequestCode, now);
        assert!(matches!(effects[0], Effect::CallGateway(_)));
        c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeRequest(CallOutcome::Success(
                sent_response(300),
            ))),
            now,
        );
        assert_eq!(c.session().step, LinkStep::Code);
        c
    }

    fn calls_gateway(effects: &[Effect]) -> bool {
        effects
            .iter()
            .any(|e| matches!(e, Effect::CallGateway(_)))
    }

    // ── Guards ──────────────────────────────────────────────────────────────

    #[rstest]
    #[case("79001234567")] // missing plus
    #[case("+123456789")] // too short
    #[case("+1234567890123456")] // too long
    #[case("+7900x234567")]
    fn bad_phone_never_reaches_the_gateway(#[case] phone: &str) {
        let t = now();
        let mut c = at_input(t);
        c.apply(LinkingEvent::SetPhoneNumber(phone.into()), t);

        let effects = c.apply(LinkingEvent::RequestCode, t);
        assert!(!calls_gateway(&effects), "{phone} produced a gateway call");
        assert!(matches!(effects[0], Effect::Notify(ref n) if n.level == NoticeLevel::Error));
        assert_eq!(c.session().step, LinkStep::Input);
        assert!(!c.session().pending_request);
    }

    #[test]
    fn short_api_hash_is_rejected_client_side() {
        let t = now();
        let mut c = at_input(t);
        c.apply(LinkingEvent::SetApiHash("too-short".into()), t);
        let effects = c.apply(LinkingEvent::RequestCode, t);
        assert!(!calls_gateway(&effects));
    }

    #[test]
    fn missing_api_id_is_rejected_client_side() {
        let t = now();
        let mut c = at_input(t);
        c.apply(LinkingEvent::SetApiId("not a number".into()), t);
        let effects = c.apply(LinkingEvent::RequestCode, t);
        assert!(!calls_gateway(&effects));
    }

    #[test]
    fn code_input_is_sanitized_to_digits() {
        let t = now();
        let mut c = at_code(t);
        c.apply(LinkingEvent::SetCode("a1b2c3d4e5f6g7".into()), t);
        assert_eq!(c.session().code, "123456");
    }

    #[test]
    fn short_code_is_rejected_client_side() {
        let t = now();
        let mut c = at_code(t);
        c.apply(LinkingEvent::SetCode("1234".into()), t);
        let effects = c.apply(LinkingEvent::VerifyCode, t);
        assert!(!calls_gateway(&effects));
    }

    #[test]
    fn verify_is_disallowed_after_expiry_even_with_a_valid_code() {
        let t = now();
        let mut c = at_code(t);
        c.apply(LinkingEvent::SetCode("12345".into()), t);

        let late = t + Duration::from_secs(301);
        let effects = c.apply(LinkingEvent::VerifyCode, late);
        assert!(!calls_gateway(&effects));
        assert!(matches!(effects[0], Effect::Notify(_)));
        assert_eq!(c.session().step, LinkStep::Code);
    }

    #[test]
    fn events_are_ignored_while_a_call_is_in_flight() {
        let t = now();
        let mut c = at_input(t);
        let effects = c.apply(LinkingEvent::RequestCode, t);
        assert!(calls_gateway(&effects));
        assert!(c.session().pending_request);

        // A second trigger while pending is a no-op.
        assert!(c.apply(LinkingEvent::RequestCode, t).is_empty());
        assert!(c.apply(LinkingEvent::VerifyCode, t).is_empty());
        assert!(
            c.apply(LinkingEvent::SetPhoneNumber("+10000000000".into()), t)
                .is_empty()
        );
        assert_eq!(c.session().phone_number, PHONE);
    }

    // ── Scenario A: send → countdown → expiry ───────────────────────────────

    #[test]
    fn scenario_a_code_countdown_runs_out_after_expires_in() {
        let t = now();
        let mut c = at_input(t);
        c.apply(LinkingEvent::RequestCode, t);
        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeRequest(CallOutcome::Success(
                sent_response(300),
            ))),
            t,
        );

        assert_eq!(c.session().step, LinkStep::Code);
        assert!(effects.contains(&Effect::StartCodeCountdown { seconds: 300 }));
        assert!(effects.contains(&Effect::StartResendCountdown {
            seconds: RESEND_COOLDOWN_SECS
        }));
        assert_eq!(c.session().code_secs_remaining(t), 300);
        assert_eq!(
            c.session()
                .code_secs_remaining(t + Duration::from_secs(300)),
            0
        );

        // Verify is disabled once the countdown reached zero.
        c.apply(LinkingEvent::SetCode("12345".into()), t);
        let late = t + Duration::from_secs(300);
        assert!(!calls_gateway(&c.apply(LinkingEvent::VerifyCode, late)));
    }

    // ── Scenario B: straight authorization ──────────────────────────────────

    #[test]
    fn scenario_b_authorized_code_reaches_success_then_view() {
        let t = now();
        let mut c = at_code(t);
        c.apply(LinkingEvent::SetCode("12345".into()), t);
        let effects = c.apply(LinkingEvent::VerifyCode, t);
        assert!(calls_gateway(&effects));

        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeVerify(CallOutcome::Success(
                VerifyCodeResponse {
                    ok: true,
                    authorized: true,
                    needs_password: false,
                },
            ))),
            t,
        );
        assert_eq!(c.session().step, LinkStep::Success);
        assert!(effects.contains(&Effect::InvalidateCredentialStatus));
        assert!(effects.contains(&Effect::CancelCountdowns));
        assert!(effects.contains(&Effect::ScheduleReset {
            delay: SUCCESS_DISPLAY_DELAY
        }));

        c.apply(LinkingEvent::SuccessDelayElapsed, t + SUCCESS_DISPLAY_DELAY);
        let session = c.session();
        assert_eq!(session.step, LinkStep::View);
        assert!(session.api_id.is_none());
        assert!(session.api_hash.is_empty());
        assert!(session.phone_number.is_empty());
        assert!(session.code.is_empty());
        assert!(session.password_is_empty());
        assert!(session.session_key.is_none());
        assert!(session.phone_code_hash.is_none());
    }

    // ── Scenario C: second factor ───────────────────────────────────────────

    #[test]
    fn scenario_c_needs_password_then_password_success() {
        let t = now();
        let mut c = at_code(t);
        c.apply(LinkingEvent::SetCode("12345".into()), t);
        c.apply(LinkingEvent::VerifyCode, t);
        c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeVerify(CallOutcome::Success(
                VerifyCodeResponse {
                    ok: true,
                    authorized: false,
                    needs_password: true,
                },
            ))),
            t,
        );
        assert_eq!(c.session().step, LinkStep::Password);
        // Tokens survive into the password step.
        assert_eq!(c.session().session_key.as_deref(), Some("sk_1"));

        c.apply(
            LinkingEvent::SetPassword(Secret::new("hunter2".into())),
            t,
        );
        let effects = c.apply(LinkingEvent::VerifyPassword, t);
        match &effects[0] {
            Effect::CallGateway(GatewayCall::VerifyPassword(request)) => {
                assert_eq!(request.password, "hunter2");
                assert_eq!(request.session_key, "sk_1");
            },
            other => panic!("expected VerifyPassword call, got {other:?}"),
        }

        c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::PasswordVerify(
                CallOutcome::Success(VerifyPasswordResponse {
                    ok: true,
                    authorized: true,
                }),
            )),
            t,
        );
        assert_eq!(c.session().step, LinkStep::Success);
    }

    #[test]
    fn password_step_is_never_entered_speculatively() {
        let t = now();
        let mut c = at_code(t);
        c.apply(LinkingEvent::SetCode("12345".into()), t);
        c.apply(LinkingEvent::VerifyCode, t);
        // A wrong code keeps the step and retains the entered code.
        c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeVerify(CallOutcome::Domain(
                "wrong code".into(),
            ))),
            t,
        );
        assert_eq!(c.session().step, LinkStep::Code);
        assert_eq!(c.session().code, "12345");
    }

    #[test]
    fn rejected_password_is_cleared_for_the_retry() {
        let t = now();
        let mut c = at_code(t);
        c.apply(LinkingEvent::SetCode("12345".into()), t);
        c.apply(LinkingEvent::VerifyCode, t);
        c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeVerify(CallOutcome::Success(
                VerifyCodeResponse {
                    ok: true,
                    authorized: false,
                    needs_password: true,
                },
            ))),
            t,
        );
        c.apply(LinkingEvent::SetPassword(Secret::new("wrong".into())), t);
        c.apply(LinkingEvent::VerifyPassword, t);
        c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::PasswordVerify(
                CallOutcome::Domain("invalid password".into()),
            )),
            t,
        );
        assert_eq!(c.session().step, LinkStep::Password);
        assert!(c.session().password_is_empty());
    }

    // ── Scenario D: rate limit and resend ───────────────────────────────────

    #[test]
    fn scenario_d_retry_after_arms_cooldown_and_gates_resend() {
        let t = now();
        let mut c = at_input(t);
        c.apply(LinkingEvent::RequestCode, t);
        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeRequest(
                CallOutcome::RateLimited {
                    retry_after: 45,
                    message: "flood wait".into(),
                },
            )),
            t,
        );
        assert!(effects.contains(&Effect::StartResendCountdown { seconds: 45 }));
        // Rate limit does not change the step.
        assert_eq!(c.session().step, LinkStep::Input);
        assert_eq!(c.session().resend_secs_remaining(t), 45);

        // Move to the code step, then exercise the resend gate against the
        // same kind of cooldown (this time reported by a verify call).
        let mut c = at_code(t);
        c.apply(LinkingEvent::SetCode("12345".into()), t);
        c.apply(LinkingEvent::VerifyCode, t);
        c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeVerify(
                CallOutcome::RateLimited {
                    retry_after: 45,
                    message: "flood wait".into(),
                },
            )),
            t,
        );
        assert_eq!(c.session().resend_secs_remaining(t), 45);

        // Too early: silent no-op.
        let early = t + Duration::from_secs(10);
        assert!(c.apply(LinkingEvent::ResendCode, early).is_empty());

        // After the cooldown: a brand-new send superseding the old tokens.
        let later = t + Duration::from_secs(46);
        let effects = c.apply(LinkingEvent::ResendCode, later);
        assert!(calls_gateway(&effects));
        assert!(c.session().code.is_empty());

        c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeRequest(CallOutcome::Success(
                SendCodeResponse {
                    ok: true,
                    code_sent: true,
                    session_key: "sk_2".into(),
                    phone_code_hash: "pch_2".into(),
                    expires_in: 300,
                },
            ))),
            later,
        );
        assert_eq!(c.session().session_key.as_deref(), Some("sk_2"));
        assert_eq!(c.session().phone_code_hash.as_deref(), Some("pch_2"));
    }

    // ── Scenario E: cancel ──────────────────────────────────────────────────

    #[test]
    fn scenario_e_cancel_from_password_resets_everything() {
        let t = now();
        let mut c = at_code(t);
        c.apply(LinkingEvent::SetCode("12345".into()), t);
        c.apply(LinkingEvent::VerifyCode, t);
        c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeVerify(CallOutcome::Success(
                VerifyCodeResponse {
                    ok: true,
                    authorized: false,
                    needs_password: true,
                },
            ))),
            t,
        );
        assert_eq!(c.session().step, LinkStep::Password);

        let effects = c.apply(LinkingEvent::Cancel, t);
        assert!(effects.contains(&Effect::CancelCountdowns));
        let session = c.session();
        assert_eq!(session.step, LinkStep::View);
        assert!(!session.pending_request);
        assert!(session.session_key.is_none());
        assert!(session.phone_code_hash.is_none());
        assert_eq!(session.epoch, 1);
    }

    #[test]
    fn cancel_while_in_flight_bumps_the_epoch() {
        let t = now();
        let mut c = at_input(t);
        c.apply(LinkingEvent::RequestCode, t);
        assert!(c.session().pending_request);

        c.apply(LinkingEvent::Cancel, t);
        assert!(!c.session().pending_request);
        assert_eq!(c.session().epoch, 1);

        // A straggling completion after the reset is ignored outright.
        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeRequest(CallOutcome::Success(
                sent_response(300),
            ))),
            t,
        );
        assert!(effects.is_empty());
        assert_eq!(c.session().step, LinkStep::View);
        assert!(c.session().session_key.is_none());
    }

    // ── View-step operations ────────────────────────────────────────────────

    #[test]
    fn delete_invalidates_the_status_cache_on_success() {
        let t = now();
        let mut c = LinkingController::new();
        let effects = c.apply(LinkingEvent::DeleteCredentials, t);
        assert_eq!(
            effects,
            vec![Effect::CallGateway(GatewayCall::Delete)]
        );

        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::Delete(CallOutcome::Success(
                OkResponse { ok: true },
            ))),
            t,
        );
        assert!(effects.contains(&Effect::InvalidateCredentialStatus));
    }

    #[test]
    fn validate_reports_both_verdicts() {
        let t = now();
        let mut c = LinkingController::new();
        c.apply(LinkingEvent::ValidateCredentials, t);
        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::Validate(CallOutcome::Success(
                ValidateCredentialsResponse {
                    ok: true,
                    valid: true,
                    message: "session alive".into(),
                    username: None,
                    phone: None,
                },
            ))),
            t,
        );
        assert!(matches!(
            &effects[0],
            Effect::Notify(n) if n.level == NoticeLevel::Success
        ));

        c.apply(LinkingEvent::ValidateCredentials, t);
        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::Validate(CallOutcome::Success(
                ValidateCredentialsResponse {
                    ok: true,
                    valid: false,
                    message: "session revoked".into(),
                    username: None,
                    phone: None,
                },
            ))),
            t,
        );
        assert!(matches!(
            &effects[0],
            Effect::Notify(n) if n.level == NoticeLevel::Error
        ));
    }

    #[test]
    fn rate_limited_delete_arms_the_resend_cooldown() {
        let t = now();
        let mut c = LinkingController::new();
        c.apply(LinkingEvent::DeleteCredentials, t);
        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::Delete(CallOutcome::RateLimited {
                retry_after: 30,
                message: "flood wait".into(),
            })),
            t,
        );
        assert!(effects.contains(&Effect::StartResendCountdown { seconds: 30 }));
        assert_eq!(c.session().step, LinkStep::View);
        assert_eq!(c.session().resend_secs_remaining(t), 30);
    }

    // ── Hostile gateway durations ───────────────────────────────────────────

    #[test]
    fn oversized_expires_in_is_clamped() {
        let t = now();
        let mut c = at_input(t);
        c.apply(LinkingEvent::RequestCode, t);
        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeRequest(CallOutcome::Success(
                sent_response(u64::MAX),
            ))),
            t,
        );
        assert_eq!(c.session().step, LinkStep::Code);
        assert!(effects.contains(&Effect::StartCodeCountdown {
            seconds: MAX_COUNTDOWN_SECS
        }));
        assert_eq!(c.session().code_secs_remaining(t), MAX_COUNTDOWN_SECS);
    }

    #[test]
    fn oversized_retry_after_is_clamped() {
        let t = now();
        let mut c = at_input(t);
        c.apply(LinkingEvent::RequestCode, t);
        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeRequest(
                CallOutcome::RateLimited {
                    retry_after: u64::MAX,
                    message: "flood wait".into(),
                },
            )),
            t,
        );
        assert!(effects.contains(&Effect::StartResendCountdown {
            seconds: MAX_COUNTDOWN_SECS
        }));
        assert_eq!(c.session().resend_secs_remaining(t), MAX_COUNTDOWN_SECS);
    }

    #[test]
    fn transport_failure_keeps_the_step() {
        let t = now();
        let mut c = at_input(t);
        c.apply(LinkingEvent::RequestCode, t);
        let effects = c.apply(
            LinkingEvent::GatewayCompleted(GatewayCompletion::CodeRequest(
                CallOutcome::Transport("timeout".into()),
            )),
            t,
        );
        assert_eq!(c.session().step, LinkStep::Input);
        assert!(!c.session().pending_request);
        assert!(matches!(
            &effects[0],
            Effect::Notify(n) if n.title == "Network error"
        ));
    }
}

//! Executes the effects requested by the pure controller.
//!
//! The runner owns the controller, the session timers, and the consumed
//! interfaces (gateway, notification sink, credential status cache). Gateway
//! calls run as spawned tasks and feed their outcome back in as events; a
//! completion that resolves after the session was reset or the runner shut
//! down is dropped as a safe no-op instead of mutating a dead session.
//!
//! Must be used inside a tokio runtime.

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use {tokio::sync::watch, tokio_util::sync::CancellationToken};

use tglink_gateway::{
    client::VerificationGateway,
    status::{CredentialStatus, CredentialStatusQuery},
};

use crate::{
    controller::{Effect, GatewayCall, GatewayCompletion, LinkingController, LinkingEvent},
    error::Result,
    notify::NotificationSink,
    session::{LinkingSession, SessionSnapshot},
    timer::{Countdown, SessionTimers},
};

pub struct LinkingRunner {
    inner: Arc<Inner>,
}

struct Inner {
    // std::sync::Mutex: transitions are synchronous and the locks are never
    // held across an `.await` point.
    controller: Mutex<LinkingController>,
    timers: Mutex<SessionTimers>,
    gateway: Arc<dyn VerificationGateway>,
    notifications: Arc<dyn NotificationSink>,
    status: Arc<CredentialStatusQuery>,
    shutdown: CancellationToken,
}

impl LinkingRunner {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn VerificationGateway>,
        notifications: Arc<dyn NotificationSink>,
        status: Arc<CredentialStatusQuery>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                controller: Mutex::new(LinkingController::new()),
                timers: Mutex::new(SessionTimers::new()),
                gateway,
                notifications,
                status,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Feed one event into the state machine and run the resulting effects.
    pub fn handle(&self, event: LinkingEvent) {
        Inner::process(&self.inner, event, None);
    }

    /// Serializable view of the session for the hosting UI. Countdown
    /// remainders are recomputed from the deadlines at call time.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let now = Instant::now();
        let Ok(controller) = self.inner.controller.lock() else {
            // Poisoned lock: report an inert view rather than panicking.
            return SessionSnapshot {
                step: crate::session::LinkStep::View,
                phone_number: String::new(),
                pending_request: false,
                code_secs_remaining: 0,
                resend_secs_remaining: 0,
            };
        };
        let session = controller.session();
        SessionSnapshot {
            step: session.step,
            phone_number: session.phone_number.clone(),
            pending_request: session.pending_request,
            code_secs_remaining: session.code_secs_remaining(now),
            resend_secs_remaining: session.resend_secs_remaining(now),
        }
    }

    /// Inspect the session under the lock, e.g. for richer UI state.
    pub fn with_session<R>(&self, f: impl FnOnce(&LinkingSession) -> R) -> Option<R> {
        self.inner
            .controller
            .lock()
            .ok()
            .map(|controller| f(controller.session()))
    }

    /// Per-second ticks of the code-expiry countdown, if one is running.
    #[must_use]
    pub fn code_ticks(&self) -> Option<watch::Receiver<u64>> {
        self.inner
            .timers
            .lock()
            .ok()
            .and_then(|timers| timers.code_countdown().map(Countdown::subscribe))
    }

    /// Per-second ticks of the resend cooldown, if one is running.
    #[must_use]
    pub fn resend_ticks(&self) -> Option<watch::Receiver<u64>> {
        self.inner
            .timers
            .lock()
            .ok()
            .and_then(|timers| timers.resend_countdown().map(Countdown::subscribe))
    }

    /// Current linked-account status, served from the shared cache.
    pub async fn credential_status(&self) -> Result<CredentialStatus> {
        Ok(self.inner.status.get().await?)
    }

    /// Stop processing: cancel both countdowns and inhibit any further
    /// state mutation. In-flight gateway calls resolve into nothing.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Ok(mut timers) = self.inner.timers.lock() {
            timers.cancel_all();
        }
    }
}

impl Drop for LinkingRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    /// Apply an event and execute its effects. `required_epoch` is set for
    /// asynchronous continuations (gateway completions, scheduled resets) so
    /// they are dropped if the session was reset in the meantime.
    fn process(inner: &Arc<Self>, event: LinkingEvent, required_epoch: Option<u64>) {
        if inner.shutdown.is_cancelled() {
            return;
        }
        let (epoch, effects) = {
            let Ok(mut controller) = inner.controller.lock() else {
                return;
            };
            if let Some(required) = required_epoch
                && controller.session().epoch != required
            {
                tracing::debug!(required, "stale continuation dropped after session reset");
                return;
            }
            let effects = controller.apply(event, Instant::now());
            (controller.session().epoch, effects)
        };
        Self::execute(inner, epoch, effects);
    }

    fn execute(inner: &Arc<Self>, epoch: u64, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::CallGateway(call) => Self::spawn_call(inner, epoch, call),
                Effect::StartCodeCountdown { seconds } => {
                    if let Ok(mut timers) = inner.timers.lock() {
                        timers.arm_code(seconds);
                    }
                },
                Effect::StartResendCountdown { seconds } => {
                    if let Ok(mut timers) = inner.timers.lock() {
                        timers.arm_resend(seconds);
                    }
                },
                Effect::CancelCountdowns => {
                    if let Ok(mut timers) = inner.timers.lock() {
                        timers.cancel_all();
                    }
                },
                Effect::ScheduleReset { delay } => {
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            () = inner.shutdown.cancelled() => {},
                            () = tokio::time::sleep(delay) => {
                                Self::process(
                                    &inner,
                                    LinkingEvent::SuccessDelayElapsed,
                                    Some(epoch),
                                );
                            },
                        }
                    });
                },
                Effect::InvalidateCredentialStatus => inner.status.invalidate(),
                Effect::Notify(notice) => {
                    let inner = inner.clone();
                    tokio::spawn(async move {
                        inner.notifications.notify(notice).await;
                    });
                },
            }
        }
    }

    fn spawn_call(inner: &Arc<Self>, epoch: u64, call: GatewayCall) {
        let inner = inner.clone();
        tokio::spawn(async move {
            let completion = match call {
                GatewayCall::RequestCode(request) => {
                    GatewayCompletion::CodeRequest(inner.gateway.request_code(request).await)
                },
                GatewayCall::VerifyCode(request) => {
                    GatewayCompletion::CodeVerify(inner.gateway.verify_code(request).await)
                },
                GatewayCall::VerifyPassword(request) => {
                    GatewayCompletion::PasswordVerify(inner.gateway.verify_password(request).await)
                },
                GatewayCall::Delete => {
                    GatewayCompletion::Delete(inner.gateway.delete_credentials().await)
                },
                GatewayCall::Validate => {
                    GatewayCompletion::Validate(inner.gateway.validate_credentials().await)
                },
            };
            Self::process(
                &inner,
                LinkingEvent::GatewayCompleted(completion),
                Some(epoch),
            );
        });
    }
}

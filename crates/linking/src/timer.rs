//! Deadline-based countdowns for code expiry and resend cooldown.
//!
//! Each countdown is an absolute deadline plus a tick task that publishes
//! the remaining whole seconds once per second. The remainder is always
//! recomputed from the deadline, never decremented blindly, so a host that
//! was suspended (backgrounded tab, laptop lid) reads accurate values on
//! resume.

use {
    tokio::{
        sync::watch,
        time::{Duration, Instant, sleep},
    },
    tokio_util::sync::CancellationToken,
};

use crate::session::MAX_COUNTDOWN_SECS;

/// A single countdown. Ticks once per second while above zero and stops on
/// its own at zero; dropping it cancels the tick task.
pub struct Countdown {
    deadline: Instant,
    remaining_rx: watch::Receiver<u64>,
    cancel: CancellationToken,
}

impl Countdown {
    /// Start a countdown of `seconds` from now, clamped to
    /// [`MAX_COUNTDOWN_SECS`].
    #[must_use]
    pub fn start(seconds: u64) -> Self {
        let seconds = seconds.min(MAX_COUNTDOWN_SECS);
        let deadline = Instant::now() + Duration::from_secs(seconds);
        let (tx, remaining_rx) = watch::channel(seconds);
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                let remaining = remaining_at(deadline, Instant::now());
                // Only notify on an actual change so subscribers see clean
                // per-second ticks.
                tx.send_if_modified(|value| {
                    if *value == remaining {
                        false
                    } else {
                        *value = remaining;
                        true
                    }
                });
                if remaining == 0 {
                    break;
                }
                tokio::select! {
                    () = token.cancelled() => break,
                    () = sleep(Duration::from_secs(1)) => {},
                }
            }
        });

        Self {
            deadline,
            remaining_rx,
            cancel,
        }
    }

    /// Remaining whole seconds, recomputed from the deadline.
    #[must_use]
    pub fn remaining_secs(&self) -> u64 {
        remaining_at(self.deadline, Instant::now())
    }

    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        self.remaining_secs() == 0
    }

    /// Subscribe to per-second ticks of the remaining seconds.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.remaining_rx.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn remaining_at(deadline: Instant, now: Instant) -> u64 {
    deadline.saturating_duration_since(now).as_secs()
}

/// The two countdowns of one linking session. Arming a slot replaces (and
/// thereby cancels) whatever ran there before, e.g. on a code resend.
#[derive(Default)]
pub struct SessionTimers {
    code: Option<Countdown>,
    resend: Option<Countdown>,
}

impl SessionTimers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm_code(&mut self, seconds: u64) {
        self.code = Some(Countdown::start(seconds));
    }

    pub fn arm_resend(&mut self, seconds: u64) {
        self.resend = Some(Countdown::start(seconds));
    }

    /// Cancel both countdowns. Required when the session is destroyed or
    /// reset.
    pub fn cancel_all(&mut self) {
        self.code = None;
        self.resend = None;
    }

    #[must_use]
    pub fn code_remaining(&self) -> u64 {
        self.code.as_ref().map_or(0, Countdown::remaining_secs)
    }

    #[must_use]
    pub fn resend_remaining(&self) -> u64 {
        self.resend.as_ref().map_or(0, Countdown::remaining_secs)
    }

    pub fn code_countdown(&self) -> Option<&Countdown> {
        self.code.as_ref()
    }

    pub fn resend_countdown(&self) -> Option<&Countdown> {
        self.resend.as_ref()
    }
}

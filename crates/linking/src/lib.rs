//! Account-linking flow: a client-driven state machine that authenticates a
//! user against Telegram through the verification gateway.
//!
//! Flow: view → input (API key pair + phone) → code (one-time code with
//! expiry and resend cooldown) → optional 2FA password → success → view.
//!
//! The transition logic itself is pure — `(state, event, now) → effects` —
//! and all I/O (gateway calls, countdown timers, notifications) is executed
//! by [`runner::LinkingRunner`].

pub mod controller;
pub mod error;
pub mod notify;
pub mod runner;
pub mod session;
pub mod timer;
pub mod validate;

pub use {
    controller::{Effect, GatewayCall, GatewayCompletion, LinkingController, LinkingEvent},
    error::{Context, Error, Result},
    notify::{Notice, NoticeLevel, NotificationSink},
    runner::LinkingRunner,
    session::{LinkStep, LinkingSession, SessionSnapshot},
    timer::{Countdown, SessionTimers},
};

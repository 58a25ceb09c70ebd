use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use skybook_shared::{ResetReason, SessionEvent};
use std::sync::atomic::Ordering;
use uuid::Uuid;

use crate::context::BookingContext;
use crate::error::{BookingError, BookingResult};
use crate::models::Qualifier;
use crate::snapshot;

/// Session lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionPolicy {
    /// Lifetime of an unconfirmed booking session
    pub booking_ttl_seconds: i64,

    /// Lifetime once the backend has confirmed a booking
    pub confirmed_ttl_seconds: i64,

    /// How long after `start` the session counts as fresh
    pub fresh_window_millis: i64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            booking_ttl_seconds: 15 * 60,
            confirmed_ttl_seconds: 30 * 60,
            fresh_window_millis: 1000,
        }
    }
}

impl SessionPolicy {
    pub fn booking_ttl(&self) -> Duration {
        Duration::seconds(self.booking_ttl_seconds)
    }

    pub fn confirmed_ttl(&self) -> Duration {
        Duration::seconds(self.confirmed_ttl_seconds)
    }

    pub fn fresh_window(&self) -> Duration {
        Duration::milliseconds(self.fresh_window_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    NoSession,
    Active {
        expires_at: DateTime<Utc>,
        remaining_seconds: i64,
    },
    Expired {
        expired_at: DateTime<Utc>,
    },
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }
}

impl BookingContext {
    /// Open (or refresh) the session window.
    pub fn start(&mut self) -> BookingResult<DateTime<Utc>> {
        self.start_with(None)
    }

    fn start_with(&mut self, qualifier: Option<Qualifier>) -> BookingResult<DateTime<Utc>> {
        let now = self.now();
        let ttl = if self.session.booking.is_some() {
            self.session_policy.confirmed_ttl()
        } else {
            self.session_policy.booking_ttl()
        };
        let expires_at = now + ttl;

        let announce = qualifier.clone();
        self.commit("start", |session| {
            if let Some(qualifier) = qualifier {
                session.qualifier = Some(qualifier);
            }
            session.session_expiry = Some(expires_at);
            Ok(())
        })?;

        if self.fresh_until.is_none() {
            self.session_id = Uuid::new_v4();
        }
        self.fresh_until = Some(now + self.session_policy.fresh_window());

        tracing::info!(session_id = %self.session_id, %expires_at, "Booking session started");
        self.emit(SessionEvent::SessionStarted {
            session_id: self.session_id,
            expires_at: expires_at.timestamp(),
        });
        if let Some(qualifier) = announce {
            self.emit(SessionEvent::QualifierSet {
                session_id: self.session_id,
                activity_code: qualifier.activity_code().map(str::to_string),
                is_practice: qualifier.is_practice(),
            });
        }
        Ok(expires_at)
    }

    /// State of the session without any side effects.
    pub fn peek_state(&self) -> SessionState {
        match self.session.session_expiry {
            None => SessionState::NoSession,
            Some(expires_at) => {
                let now = self.now();
                if now > expires_at {
                    SessionState::Expired { expired_at: expires_at }
                } else {
                    SessionState::Active {
                        expires_at,
                        remaining_seconds: (expires_at - now).num_seconds(),
                    }
                }
            }
        }
    }

    /// Check the session, resetting it when absent or expired.
    ///
    /// Never fails: whatever the stored state, the context is left either
    /// active or fully reset.
    pub fn check(&mut self) -> SessionState {
        let state = self.peek_state();
        match &state {
            SessionState::NoSession => self.reset(ResetReason::NoSession),
            SessionState::Expired { expired_at } => {
                tracing::info!(session_id = %self.session_id, %expired_at, "Booking session expired");
                self.emit(SessionEvent::SessionExpired {
                    session_id: self.session_id,
                    expired_at: expired_at.timestamp(),
                });
                self.session.qualifier = None;
                self.reset(ResetReason::Expired);
            }
            SessionState::Active { .. } => {}
        }
        state
    }

    /// Return to the initial empty session and purge every persisted
    /// booking key.
    pub fn reset(&mut self, reason: ResetReason) {
        self.session = Default::default();
        self.fresh_until = None;
        snapshot::purge(&self.storage);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(session_id = %self.session_id, epoch, ?reason, "Booking session reset");
        self.emit(SessionEvent::SessionReset {
            session_id: self.session_id,
            epoch,
            reason,
        });
    }

    /// Start a session unless one is already running.
    pub fn init_session(&mut self) -> BookingResult<SessionState> {
        match self.peek_state() {
            SessionState::Active { .. } => {}
            SessionState::Expired { .. } => {
                self.check();
                self.start()?;
            }
            SessionState::NoSession => {
                self.start()?;
            }
        }
        Ok(self.peek_state())
    }

    pub fn set_activity_code(&mut self, code: &str) -> BookingResult<DateTime<Utc>> {
        let code = code.trim();
        if code.is_empty() {
            return Err(BookingError::Validation("activity code is required".to_string()));
        }
        self.start_with(Some(Qualifier::Activity { code: code.to_string() }))
    }

    pub fn set_practice_mode(&mut self) -> BookingResult<DateTime<Utc>> {
        self.start_with(Some(Qualifier::Practice))
    }

    /// Drop the qualifier and keep everything else.
    pub fn clear_qualifier(&mut self) -> BookingResult<()> {
        self.commit("clear_qualifier", |session| {
            session.qualifier = None;
            Ok(())
        })
    }

    /// Within the debounce window right after `start`.
    pub fn is_fresh(&self) -> bool {
        self.fresh_until.is_some_and(|until| self.now() < until)
    }

    /// Saved passenger details may be restored into forms: the session is
    /// running and was not just created.
    pub fn should_load_saved_passenger_data(&self) -> bool {
        self.peek_state().is_active() && !self.is_fresh()
    }

    pub fn has_booking_data(&self) -> bool {
        self.session.has_booking_data()
    }

    /// Leaving for the home screen discards any half-built booking.
    pub fn clear_for_home(&mut self) -> bool {
        if self.has_booking_data() {
            self.reset(ResetReason::NavigationGuard);
            true
        } else {
            false
        }
    }

    /// Payment went through; nothing of this booking is kept client-side.
    pub fn complete_payment(&mut self) {
        if let Some(booking) = self.session.booking() {
            tracing::info!(booking_id = booking.id, reference = %booking.reference, "Payment completed");
        }
        self.reset(ResetReason::Completed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PassengerDraft, PassengerType};
    use skybook_core::{Clock, ManualClock, SessionStorage};
    use std::sync::Arc;

    fn context() -> (BookingContext, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let ctx = BookingContext::new(SessionStorage::in_memory(), clock.clone());
        (ctx, clock)
    }

    #[test]
    fn test_start_sets_fifteen_minute_expiry() {
        let (mut ctx, clock) = context();
        let expires_at = ctx.start().unwrap();
        assert_eq!(expires_at - clock.now(), Duration::minutes(15));
        assert!(ctx.is_fresh());
        assert!(!ctx.should_load_saved_passenger_data());

        clock.advance(Duration::seconds(2));
        assert!(!ctx.is_fresh());
        assert!(ctx.should_load_saved_passenger_data());
    }

    #[test]
    fn test_check_without_session_resets() {
        let (mut ctx, _) = context();
        let epoch = ctx.epoch();
        assert_eq!(ctx.check(), SessionState::NoSession);
        assert_eq!(ctx.epoch(), epoch + 1);
    }

    #[test]
    fn test_expiry_is_monotonic() {
        let (mut ctx, clock) = context();
        ctx.set_activity_code("ACT-1").unwrap();

        clock.advance(Duration::minutes(15));
        assert!(ctx.check().is_active());

        clock.advance(Duration::seconds(1));
        assert!(matches!(ctx.check(), SessionState::Expired { .. }));
        assert!(ctx.session().qualifier().is_none());
        assert_eq!(ctx.check(), SessionState::NoSession);
    }

    #[test]
    fn test_qualifiers_are_exclusive() {
        let (mut ctx, _) = context();
        ctx.set_activity_code(" LAB-7 ").unwrap();
        assert_eq!(ctx.session().qualifier().unwrap().activity_code(), Some("LAB-7"));

        ctx.set_practice_mode().unwrap();
        let qualifier = ctx.session().qualifier().unwrap();
        assert!(qualifier.is_practice());
        assert!(qualifier.activity_code().is_none());

        assert!(ctx.set_activity_code("   ").is_err());
        assert!(ctx.session().qualifier().unwrap().is_practice());
    }

    #[test]
    fn test_clear_qualifier_keeps_booking() {
        let (mut ctx, _) = context();
        ctx.set_practice_mode().unwrap();
        ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Adult, "Ana", "Cruz")])
            .unwrap();
        ctx.clear_qualifier().unwrap();

        assert!(ctx.session().qualifier().is_none());
        assert_eq!(ctx.session().roster().len(), 1);
        assert!(ctx.peek_state().is_active());
    }

    #[test]
    fn test_init_session_only_when_needed() {
        let (mut ctx, clock) = context();
        ctx.init_session().unwrap();
        let first = ctx.session().session_expiry();

        clock.advance(Duration::minutes(5));
        ctx.init_session().unwrap();
        assert_eq!(ctx.session().session_expiry(), first);

        clock.advance(Duration::minutes(11));
        assert!(ctx.init_session().unwrap().is_active());
        assert!(ctx.session().session_expiry() > first);
    }

    #[test]
    fn test_clear_for_home() {
        let (mut ctx, _) = context();
        assert!(!ctx.clear_for_home());
        ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Adult, "Ana", "Cruz")])
            .unwrap();
        assert!(ctx.clear_for_home());
        assert!(!ctx.has_booking_data());
    }

    #[tokio::test]
    async fn test_reset_emits_event() {
        let (mut ctx, _) = context();
        let mut events = ctx.subscribe();
        ctx.reset(ResetReason::UserRequested);

        match events.recv().await.unwrap() {
            SessionEvent::SessionReset { epoch, reason, .. } => {
                assert_eq!(epoch, 1);
                assert_eq!(reason, ResetReason::UserRequested);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

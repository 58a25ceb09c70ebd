use uuid::Uuid;

/// Why a booking session was torn down.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResetReason {
    Expired,
    NoSession,
    UserRequested,
    Completed,
    NavigationGuard,
}

/// Lifecycle notifications emitted by a booking context.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    SessionStarted {
        session_id: Uuid,
        expires_at: i64,
    },
    QualifierSet {
        session_id: Uuid,
        activity_code: Option<String>,
        is_practice: bool,
    },
    SessionExpired {
        session_id: Uuid,
        expired_at: i64,
    },
    SessionReset {
        session_id: Uuid,
        epoch: u64,
        reason: ResetReason,
    },
    BookingConfirmed {
        session_id: Uuid,
        booking_id: i64,
        booking_reference: String,
        total: String,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::SessionStarted { session_id, .. }
            | SessionEvent::QualifierSet { session_id, .. }
            | SessionEvent::SessionExpired { session_id, .. }
            | SessionEvent::SessionReset { session_id, .. }
            | SessionEvent::BookingConfirmed { session_id, .. } => *session_id,
        }
    }
}

use chrono::{DateTime, Duration, Utc};
use skybook_booking::{BookingContext, BookingSession, FarePolicy, SessionPolicy};
use skybook_core::{BookingBackend, Clock};
use skybook_gate::NavigationGate;
use skybook_store::SessionStores;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::AppError;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

pub type SharedContext = Arc<Mutex<BookingContext>>;

struct Entry {
    context: SharedContext,
    last_used: DateTime<Utc>,
}

impl Entry {
    /// Nobody but the registry holds the context and it carries nothing
    /// worth keeping in memory.
    fn releasable(&self, now: DateTime<Utc>, idle_after: Duration) -> bool {
        if Arc::strong_count(&self.context) > 1 {
            return false;
        }
        let Ok(booking) = self.context.try_lock() else {
            return false;
        };
        let state = booking.peek_state();
        let untouched = !state.is_active() && booking.session() == &BookingSession::default();
        let stale = !state.is_active() && now - self.last_used >= idle_after;
        untouched || stale
    }
}

/// One booking context per authenticated subject, created on first use.
///
/// Contexts left with no session and no draft are dropped after each
/// request; contexts without a running session are swept once idle.
#[derive(Clone)]
pub struct SessionRegistry {
    stores: SessionStores,
    session_policy: SessionPolicy,
    fare_policy: FarePolicy,
    clock: Arc<dyn Clock>,
    idle_after: Duration,
    contexts: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SessionRegistry {
    pub fn new(stores: SessionStores, session_policy: SessionPolicy, fare_policy: FarePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            stores,
            session_policy,
            fare_policy,
            clock,
            idle_after: Duration::minutes(30),
            contexts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_idle_after(mut self, idle_after: Duration) -> Self {
        self.idle_after = idle_after;
        self
    }

    /// The subject's context, rehydrated from storage the first time.
    pub async fn context(&self, subject: &str) -> Result<SharedContext, AppError> {
        let now = self.clock.now();
        let mut contexts = self.contexts.lock().await;
        contexts.retain(|key, entry| key == subject || !entry.releasable(now, self.idle_after));

        if let Some(existing) = contexts.get_mut(subject) {
            existing.last_used = now;
            return Ok(existing.context.clone());
        }

        let storage = self.stores.for_subject(subject);
        let clock = self.clock.clone();
        let session_policy = self.session_policy.clone();
        let fare_policy = self.fare_policy.clone();
        let context = blocking(move || {
            Ok(BookingContext::load(storage, clock, session_policy, fare_policy)?)
        })
        .await?;
        tracing::debug!(subject, session_id = %context.session_id(), "Booking context opened");

        let shared = Arc::new(Mutex::new(context));
        contexts.insert(
            subject.to_string(),
            Entry {
                context: shared.clone(),
                last_used: now,
            },
        );
        Ok(shared)
    }

    /// Run `op` against the subject's context on the blocking pool, since
    /// storage calls block.
    pub async fn run<T, F>(&self, subject: &str, op: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut BookingContext) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let context = self.context(subject).await?;
        let mut booking = context.lock_owned().await;
        let result = blocking(move || op(&mut booking)).await;
        self.release_if_untouched(subject).await;
        result
    }

    /// Forget the subject's context when no request holds it and it has no
    /// session or draft.
    pub async fn release_if_untouched(&self, subject: &str) {
        let mut contexts = self.contexts.lock().await;
        let untouched = contexts
            .get(subject)
            .is_some_and(|entry| entry.releasable(entry.last_used, self.idle_after));
        if untouched {
            contexts.remove(subject);
            tracing::debug!(subject, "Booking context released");
        }
    }

    pub async fn open_contexts(&self) -> usize {
        self.contexts.lock().await.len()
    }
}

/// Run synchronous context work off the async workers.
pub async fn blocking<T, F>(op: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| AppError::InternalServerError(format!("booking task failed: {}", e)))?
}

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthConfig,
    pub backend: Arc<dyn BookingBackend>,
    pub gate: Arc<NavigationGate>,
    pub sessions: SessionRegistry,
}

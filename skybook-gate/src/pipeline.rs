use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use skybook_booking::{BookingContext, SessionState};
use skybook_core::identity::{IdentityProvider, ROLE_INSTRUCTOR};

use crate::route::{GatePaths, RouteMeta, RouteTable};

/// Message shown alongside a redirect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    PermissionDenied,
    QualifierRequired,
    SessionActive,
    SessionExpired,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::PermissionDenied => "You do not have permission to access this page.",
            Notice::QualifierRequired => "Enter an activity code or start practice mode to book a flight.",
            Notice::SessionActive => "Finish or cancel your current booking session before returning to the dashboard.",
            Notice::SessionExpired => {
                "Your booking session has expired or hasn't started. Please start a new search."
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    Proceed {
        title: String,
    },
    Redirect {
        path: String,
        notice: Option<Notice>,
        /// The booking session is reset before redirecting.
        reset_booking: bool,
    },
}

impl Decision {
    fn redirect(path: &str, notice: Option<Notice>) -> Self {
        Decision::Redirect {
            path: path.to_string(),
            notice,
            reset_booking: false,
        }
    }

    pub fn is_proceed(&self) -> bool {
        matches!(self, Decision::Proceed { .. })
    }

    pub fn redirect_path(&self) -> Option<&str> {
        match self {
            Decision::Redirect { path, .. } => Some(path),
            Decision::Proceed { .. } => None,
        }
    }
}

/// Everything a navigation decision depends on, captured up front.
#[derive(Debug, Clone)]
pub struct GateInput<'a> {
    pub target: &'a str,
    pub route: &'a RouteMeta,
    pub has_token: bool,
    pub role: Option<String>,
    pub has_qualifier: bool,
    pub session: SessionState,
}

impl<'a> GateInput<'a> {
    pub fn capture(
        target: &'a str,
        route: &'a RouteMeta,
        identity: &dyn IdentityProvider,
        booking: &BookingContext,
    ) -> Self {
        Self {
            target,
            route,
            has_token: identity.is_authenticated(),
            role: identity.role(),
            has_qualifier: booking.session().qualifier().is_some(),
            session: booking.peek_state(),
        }
    }
}

/// One check of the pipeline. Returns a decision to stop, `None` to pass.
pub trait GateStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, input: &GateInput<'_>, paths: &GatePaths) -> Option<Decision>;
}

pub struct GuestOnly;

impl GateStep for GuestOnly {
    fn name(&self) -> &'static str {
        "guest_only"
    }

    fn evaluate(&self, input: &GateInput<'_>, paths: &GatePaths) -> Option<Decision> {
        (input.route.guest_only && input.has_token)
            .then(|| Decision::redirect(paths.role_home(input.role.as_deref()), None))
    }
}

pub struct RequiresAuth;

impl GateStep for RequiresAuth {
    fn name(&self) -> &'static str {
        "requires_auth"
    }

    fn evaluate(&self, input: &GateInput<'_>, paths: &GatePaths) -> Option<Decision> {
        (input.route.requires_auth && !input.has_token).then(|| Decision::redirect(&paths.login, None))
    }
}

pub struct RoleMatch;

impl GateStep for RoleMatch {
    fn name(&self) -> &'static str {
        "role"
    }

    fn evaluate(&self, input: &GateInput<'_>, paths: &GatePaths) -> Option<Decision> {
        let required = input.route.role.as_deref()?;
        if !input.has_token {
            return Some(Decision::redirect(&paths.login, None));
        }
        (input.role.as_deref() != Some(required)).then(|| {
            Decision::redirect(paths.role_home(input.role.as_deref()), Some(Notice::PermissionDenied))
        })
    }
}

pub struct InstructorBookingBlock;

impl GateStep for InstructorBookingBlock {
    fn name(&self) -> &'static str {
        "instructor_booking_block"
    }

    fn evaluate(&self, input: &GateInput<'_>, paths: &GatePaths) -> Option<Decision> {
        (input.route.booking_protected && input.role.as_deref() == Some(ROLE_INSTRUCTOR))
            .then(|| Decision::redirect(&paths.instructor_home, None))
    }
}

pub struct QualifierRequired;

impl GateStep for QualifierRequired {
    fn name(&self) -> &'static str {
        "qualifier_required"
    }

    fn evaluate(&self, input: &GateInput<'_>, paths: &GatePaths) -> Option<Decision> {
        (input.route.booking_protected && !input.has_qualifier)
            .then(|| Decision::redirect(&paths.student_home, Some(Notice::QualifierRequired)))
    }
}

pub struct DashboardLock;

impl GateStep for DashboardLock {
    fn name(&self) -> &'static str {
        "dashboard_lock"
    }

    fn evaluate(&self, input: &GateInput<'_>, paths: &GatePaths) -> Option<Decision> {
        let into_dashboard = paths.is_student_area(input.target) || paths.is_student_area(&input.route.path);
        (into_dashboard && input.has_qualifier && !paths.is_allow_listed(input.route, input.target))
            .then(|| Decision::redirect(&paths.booking_home, Some(Notice::SessionActive)))
    }
}

pub struct ActiveSessionRequired;

impl GateStep for ActiveSessionRequired {
    fn name(&self) -> &'static str {
        "active_session_required"
    }

    fn evaluate(&self, input: &GateInput<'_>, paths: &GatePaths) -> Option<Decision> {
        (input.route.require_active_booking_session && !input.session.is_active()).then(|| Decision::Redirect {
            path: paths.booking_home.clone(),
            notice: Some(Notice::SessionExpired),
            reset_booking: true,
        })
    }
}

/// Receives the document title when navigation proceeds.
pub trait TitleSink: Send + Sync {
    fn set_title(&self, title: &str);
}

/// Remembers the last title it was given.
#[derive(Debug, Default)]
pub struct DocumentTitle {
    current: RwLock<Option<String>>,
}

impl DocumentTitle {
    pub fn current(&self) -> Option<String> {
        self.current.read().clone()
    }
}

impl TitleSink for DocumentTitle {
    fn set_title(&self, title: &str) {
        *self.current.write() = Some(title.to_string());
    }
}

/// Ordered navigation checks; the first step that objects decides.
pub struct NavigationGate {
    paths: GatePaths,
    routes: RouteTable,
    steps: Vec<Box<dyn GateStep>>,
}

impl NavigationGate {
    pub fn new(paths: GatePaths, routes: RouteTable) -> Self {
        Self {
            paths,
            routes,
            steps: vec![
                Box::new(GuestOnly),
                Box::new(RequiresAuth),
                Box::new(RoleMatch),
                Box::new(InstructorBookingBlock),
                Box::new(QualifierRequired),
                Box::new(DashboardLock),
                Box::new(ActiveSessionRequired),
            ],
        }
    }

    pub fn paths(&self) -> &GatePaths {
        &self.paths
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Decide without touching anything.
    pub fn evaluate(&self, input: &GateInput<'_>) -> Decision {
        for step in &self.steps {
            if let Some(decision) = step.evaluate(input, &self.paths) {
                tracing::debug!(
                    step = step.name(),
                    target = input.target,
                    redirect = ?decision.redirect_path(),
                    "Navigation redirected"
                );
                return decision;
            }
        }
        let title = input
            .route
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.paths.default_title.clone());
        Decision::Proceed { title }
    }

    /// Decide for `target` (a route name or path) and apply the decision's
    /// effects: reset the booking, or set the title.
    pub fn navigate(
        &self,
        target: &str,
        identity: &dyn IdentityProvider,
        booking: &mut BookingContext,
        titles: &dyn TitleSink,
    ) -> Decision {
        let unknown = RouteMeta::new("", target);
        let route = self.routes.resolve(target).unwrap_or(&unknown);
        let target_path = if route.name == target { route.path.as_str() } else { target };

        let decision = {
            let input = GateInput::capture(target_path, route, identity, booking);
            self.evaluate(&input)
        };

        match &decision {
            Decision::Proceed { title } => titles.set_title(title),
            Decision::Redirect {
                path,
                reset_booking: true,
                ..
            } => {
                // check() resets an absent or expired session.
                let state = booking.check();
                tracing::info!(target = target_path, redirect = %path, ?state, "Booking session required");
            }
            Decision::Redirect { path, notice, .. } => {
                tracing::info!(target = target_path, redirect = %path, ?notice, "Navigation redirected");
            }
        }
        decision
    }
}

impl Default for NavigationGate {
    fn default() -> Self {
        Self::new(GatePaths::default(), RouteTable::standard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use skybook_booking::PassengerDraft;
    use skybook_booking::PassengerType;
    use skybook_core::identity::{ROLE_ADMIN, ROLE_STUDENT};
    use skybook_core::{ManualClock, SessionStorage, StaticIdentity};
    use std::sync::Arc;

    fn booking() -> (BookingContext, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (BookingContext::new(SessionStorage::in_memory(), clock.clone()), clock)
    }

    fn student() -> StaticIdentity {
        StaticIdentity::with_role("tok", ROLE_STUDENT)
    }

    fn go(target: &str, identity: &StaticIdentity, ctx: &mut BookingContext) -> Decision {
        NavigationGate::default().navigate(target, identity, ctx, &DocumentTitle::default())
    }

    #[test]
    fn test_guest_only_redirects_logged_in_users_home() {
        let (mut ctx, _) = booking();
        let decision = go("/login", &StaticIdentity::with_role("tok", ROLE_INSTRUCTOR), &mut ctx);
        assert_eq!(decision.redirect_path(), Some("/instructor/dashboard"));

        let decision = go("/admin/login", &StaticIdentity::with_role("tok", ROLE_ADMIN), &mut ctx);
        assert_eq!(decision.redirect_path(), Some("/admin/dashboard"));

        let decision = go("/login", &student(), &mut ctx);
        assert_eq!(decision.redirect_path(), Some("/student/dashboard"));
    }

    #[test]
    fn test_requires_auth_goes_to_login() {
        let (mut ctx, _) = booking();
        let decision = go("/student/dashboard", &StaticIdentity::anonymous(), &mut ctx);
        assert_eq!(decision.redirect_path(), Some("/login"));
    }

    #[test]
    fn test_wrong_role_gets_permission_notice() {
        let (mut ctx, _) = booking();
        let decision = go("/admin/dashboard", &student(), &mut ctx);
        assert_eq!(
            decision,
            Decision::Redirect {
                path: "/student/dashboard".to_string(),
                notice: Some(Notice::PermissionDenied),
                reset_booking: false,
            }
        );
    }

    #[test]
    fn test_instructor_kept_out_of_booking_flow() {
        let (mut ctx, _) = booking();
        ctx.set_practice_mode().unwrap();
        let decision = go("/flights/search", &StaticIdentity::with_role("tok", ROLE_INSTRUCTOR), &mut ctx);
        assert_eq!(decision.redirect_path(), Some("/instructor/dashboard"));
    }

    #[test]
    fn test_booking_without_qualifier_leaves_booking_alone() {
        let (mut ctx, _) = booking();
        ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Adult, "Ana", "Cruz")])
            .unwrap();
        let before = ctx.session().clone();
        let epoch = ctx.epoch();

        let decision = go("/booking/passengers", &student(), &mut ctx);
        assert_eq!(decision.redirect_path(), Some("/student/dashboard"));
        assert_eq!(ctx.session(), &before);
        assert_eq!(ctx.epoch(), epoch);
    }

    #[test]
    fn test_dashboard_locked_while_qualified() {
        let (mut ctx, _) = booking();
        ctx.set_activity_code("ACT-3").unwrap();

        let decision = go("StudentDashboard", &student(), &mut ctx);
        assert_eq!(decision.redirect_path(), Some("/"));
        let decision = go("/student/dashboard/history", &student(), &mut ctx);
        assert_eq!(decision.redirect_path(), Some("/"));

        let decision = go("/student/dashboard/activity/12", &student(), &mut ctx);
        assert!(decision.is_proceed());
    }

    #[test]
    fn test_expired_session_is_reset_on_booking_step() {
        let (mut ctx, clock) = booking();
        ctx.set_activity_code("ACT-3").unwrap();
        ctx.set_passengers(vec![PassengerDraft::new(PassengerType::Adult, "Ana", "Cruz")])
            .unwrap();

        let decision = go("/addons", &student(), &mut ctx);
        assert!(decision.is_proceed());

        clock.advance(Duration::minutes(16));
        let decision = go("/addons", &student(), &mut ctx);
        assert_eq!(decision.redirect_path(), Some("/"));
        assert!(ctx.session().roster().is_empty());
        assert!(ctx.session().qualifier().is_none());
    }

    #[test]
    fn test_proceed_sets_title() {
        let (mut ctx, _) = booking();
        let titles = DocumentTitle::default();
        let gate = NavigationGate::default();

        gate.navigate("/booking/CSUCC00000001", &student(), &mut ctx, &titles);
        assert_eq!(titles.current().as_deref(), Some("Booking Details"));

        gate.navigate("/payment-callback", &StaticIdentity::anonymous(), &mut ctx, &titles);
        assert_eq!(titles.current().as_deref(), Some("SkyBook"));

        gate.navigate("/somewhere/else", &StaticIdentity::anonymous(), &mut ctx, &titles);
        assert_eq!(titles.current().as_deref(), Some("SkyBook"));
    }

    #[test]
    fn test_steps_run_in_order() {
        assert_eq!(
            NavigationGate::default().step_names(),
            vec![
                "guest_only",
                "requires_auth",
                "role",
                "instructor_booking_block",
                "qualifier_required",
                "dashboard_lock",
                "active_session_required",
            ]
        );
    }
}

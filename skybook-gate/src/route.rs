use serde::{Deserialize, Serialize};
use skybook_core::identity::{ROLE_ADMIN, ROLE_INSTRUCTOR, ROLE_STUDENT};

/// Navigation metadata attached to a route.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteMeta {
    pub name: String,
    /// Path pattern; `:param` segments match any single segment.
    pub path: String,
    #[serde(default)]
    pub guest_only: bool,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub booking_protected: bool,
    #[serde(default)]
    pub require_active_booking_session: bool,
    #[serde(default)]
    pub title: Option<String>,
}

impl RouteMeta {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn guest_only(mut self) -> Self {
        self.guest_only = true;
        self
    }

    pub fn for_role(mut self, role: &str) -> Self {
        self.requires_auth = true;
        self.role = Some(role.to_string());
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    /// Part of the booking flow: needs a qualifier.
    pub fn booking(mut self) -> Self {
        self.requires_auth = true;
        self.booking_protected = true;
        self
    }

    /// Part of the booking flow after search: also needs a live session.
    pub fn booking_step(mut self) -> Self {
        self = self.booking();
        self.require_active_booking_session = true;
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        let pattern: Vec<&str> = self.path.trim_matches('/').split('/').collect();
        let target: Vec<&str> = path.split(['?', '#']).next().unwrap_or("").trim_matches('/').split('/').collect();
        pattern.len() == target.len()
            && pattern
                .iter()
                .zip(&target)
                .all(|(p, t)| (p.starts_with(':') && !t.is_empty()) || p == t)
    }
}

/// Well-known destinations the gate redirects to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatePaths {
    pub login: String,
    /// Landing page of the booking flow (flight search).
    pub booking_home: String,
    pub student_home: String,
    pub instructor_home: String,
    pub admin_home: String,
    /// Pages under the student dashboard that stay reachable while a
    /// qualifier is active.
    pub allow_listed: Vec<String>,
    pub default_title: String,
}

impl Default for GatePaths {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            booking_home: "/".to_string(),
            student_home: "/student/dashboard".to_string(),
            instructor_home: "/instructor/dashboard".to_string(),
            admin_home: "/admin/dashboard".to_string(),
            allow_listed: vec!["StudentActivityDetails".to_string()],
            default_title: "SkyBook".to_string(),
        }
    }
}

impl GatePaths {
    pub fn role_home(&self, role: Option<&str>) -> &str {
        match role {
            Some(ROLE_INSTRUCTOR) => &self.instructor_home,
            Some(ROLE_ADMIN) => &self.admin_home,
            _ => &self.student_home,
        }
    }

    pub fn is_student_area(&self, path: &str) -> bool {
        let base = self.student_home.trim_end_matches('/');
        let path = path.split(['?', '#']).next().unwrap_or("").trim_end_matches('/');
        path == base || path.strip_prefix(base).is_some_and(|rest| rest.starts_with('/'))
    }

    pub fn is_allow_listed(&self, route: &RouteMeta, path: &str) -> bool {
        self.allow_listed
            .iter()
            .any(|allowed| *allowed == route.name || allowed.as_str() == path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteTable {
    routes: Vec<RouteMeta>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteMeta>) -> Self {
        Self { routes }
    }

    /// The booking front end's routes.
    pub fn standard() -> Self {
        Self::new(vec![
            RouteMeta::new("Home", "/").titled("Book a Flight"),
            RouteMeta::new("Login", "/login").guest_only().titled("Login"),
            RouteMeta::new("AdminLogin", "/admin/login").guest_only().titled("Admin Login"),
            RouteMeta::new("StudentDashboard", "/student/dashboard")
                .for_role(ROLE_STUDENT)
                .titled("Student Dashboard"),
            RouteMeta::new("StudentActivityDetails", "/student/dashboard/activity/:id")
                .for_role(ROLE_STUDENT)
                .titled("Activity Details"),
            RouteMeta::new("StudentHistory", "/student/dashboard/history")
                .for_role(ROLE_STUDENT)
                .titled("Booking History"),
            RouteMeta::new("InstructorDashboard", "/instructor/dashboard")
                .for_role(ROLE_INSTRUCTOR)
                .titled("Instructor Dashboard"),
            RouteMeta::new("AdminDashboard", "/admin/dashboard")
                .for_role(ROLE_ADMIN)
                .titled("Dashboard"),
            RouteMeta::new("SearchResults", "/flights/search").booking().titled("Select Flights"),
            RouteMeta::new("PassengerDetails", "/booking/passengers")
                .booking_step()
                .titled("Passenger Details"),
            RouteMeta::new("Addons", "/addons").booking_step().titled("Add-ons"),
            RouteMeta::new("SeatSelection", "/addons/seats").booking_step().titled("Seat Selection"),
            RouteMeta::new("ReviewBooking", "/review/booking").booking_step().titled("Review Booking"),
            RouteMeta::new("Payment", "/payment").booking_step().titled("Payment"),
            RouteMeta::new("BookingDetails", "/booking/:reference")
                .authenticated()
                .titled("Booking Details"),
            RouteMeta::new("PaymentCallback", "/payment-callback"),
        ])
    }

    pub fn routes(&self) -> &[RouteMeta] {
        &self.routes
    }

    /// Find a route by name, then by path. Literal paths win over patterns.
    pub fn resolve(&self, target: &str) -> Option<&RouteMeta> {
        if let Some(route) = self.routes.iter().find(|r| r.name == target) {
            return Some(route);
        }
        self.routes
            .iter()
            .filter(|r| r.matches(target))
            .min_by_key(|r| r.path.matches(':').count())
    }
}

//! Navigation authorization for the booking front end.
//!
//! Every route change is run through [`NavigationGate`], an ordered list of
//! [`GateStep`]s over an immutable [`GateInput`]. The first step that
//! objects produces a redirect; otherwise navigation proceeds and the
//! route's title is applied.

pub mod pipeline;
pub mod route;

pub use pipeline::{Decision, DocumentTitle, GateInput, GateStep, NavigationGate, Notice, TitleSink};
pub use route::{GatePaths, RouteMeta, RouteTable};

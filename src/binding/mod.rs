//! Post-creation wiring of compute units to shared infrastructure

pub mod events;
pub mod permissions;
pub mod routes;

pub use events::{EventBinder, EventBindings};
pub use permissions::{Grant, PermissionBinder};
pub use routes::{RouteBinder, RouteOutcome};

//! Permission grammar, local matching and component wiring.

pub mod components;
pub mod matcher;
pub mod permissions;

pub use components::AuthorizationComponents;
pub use matcher::{MatchResult, PermissionFilter, match_permission};
pub use permissions::{Action, CrudMask, PermissionRecord};

//! HTTP route handlers.

pub mod admin;
pub mod orders;
pub mod payments;
pub mod shipping;
pub mod system;

//! Service implementations behind the HTTP routes.

pub mod health_service;
pub mod sync_service;

//! Gatehouse: workspace invitations, collaborator access, and external auth
//! provider management for a workspace deployment.

pub mod api;
pub mod auth;
pub mod crypto;
pub mod db;
pub mod email;
pub mod github;
pub mod notify;
pub mod rate_limit;
pub mod sweep;

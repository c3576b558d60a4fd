use axum::Router;

use crate::api::State;

pub mod collaborators;
pub mod external_auth;
pub mod invitations;
pub mod me;

pub fn router() -> Router<State> {
    let workspaces = Router::new()
        .merge(invitations::workspace_router())
        .merge(collaborators::router());

    Router::new()
        .nest("/workspaces", workspaces)
        .nest("/invitations", invitations::router())
        .nest("/users/me", me::router())
        .nest("/deployment/external-auth-providers", external_auth::router())
}

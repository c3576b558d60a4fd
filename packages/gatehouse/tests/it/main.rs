//! Integration tests: the service is spawned on a local port and driven
//! through the typed client.

mod api {
    mod v2 {
        mod collaborators;
        mod external_auth;
        mod invitations;
    }
}
mod crypto;
mod db {
    mod identity;
    mod invitations;
}
mod helpers;
mod notify;

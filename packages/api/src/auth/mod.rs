//! Session authentication: password hashing, the session cookie, and the
//! request gates that sit in front of protected routes.

pub mod guard;
mod password;
pub mod session;

pub use guard::{authorize_admin, require_admin, require_authenticated, resolve_session_user, CurrentUser};
pub use password::{hash_password, verify_password};
pub use session::SESSION_USER_ID_KEY;

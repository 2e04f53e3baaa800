//! Authentication and authorization

pub mod middleware;
pub mod password;
pub mod permissions;
pub mod sessions;

pub use middleware::{authenticate, require_auth, AuthContext, FamilyScope, AUTH_TOKEN_HEADER};
pub use password::{hash_password, validate_password_strength, verify_password};
pub use permissions::{Action, Grant, Module};

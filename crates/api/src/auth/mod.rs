//! Authentication module for ThreadForge

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{ensure_admin, require_auth, AuthState, AuthUser};

mod middleware;
mod token;

pub use middleware::{
    resolve_auth, AuthContext, AuthError, RequireAdmin, RequireUser, SESSION_COOKIE,
};
pub use token::{constant_time_eq, generate_token, hash_token, key_prefix, TokenKind};

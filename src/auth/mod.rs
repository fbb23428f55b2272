//! Credential handling: signed session tokens and password hashes.

pub mod jwt;
pub mod password;

pub use jwt::{Claims, JwtKeys, TokenPair, TokenType};
pub use password::{check_password_policy, PasswordHasher};

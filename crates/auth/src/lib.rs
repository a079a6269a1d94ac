pub mod email;
pub mod error;
pub mod password;
pub mod policy;
pub mod service;
pub mod session;
pub mod token;

pub use email::{DnsEmailVerifier, EmailError, EmailVerifier};
pub use error::{AuthError, ErrorKind, Result};
pub use password::{Argon2Hasher, BcryptHasher, PasswordHasher};
pub use policy::{AuthConfig, PasswordPolicy};
pub use service::{AuthService, RegisterRequest};
pub use session::{ReusePolicy, SessionConfig, SessionManager, SessionService};
pub use token::{hash_token, Claims, SigningKeys, Token, TokenConfig, TokenKind, TokenPair};

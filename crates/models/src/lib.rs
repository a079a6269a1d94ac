// Core modules
pub mod session;
pub mod user;

// Re-export commonly used types
pub use session::{NewSession, NewSessionRecord, RefreshSession, Session};
pub use user::{Credentials, NewUser, Role, User, UserId};

pub mod connection;
pub mod error;
pub mod memory;
pub mod repositories;

pub use connection::{Database, DatabaseConfig};
pub use error::{DatabaseError, Result};
pub use memory::MemoryStore;
pub use repositories::{
    sessions::PgSessionRepository,
    transaction::PgTransaction,
    users::PgUserRepository,
    SessionRepository,
    SessionStore,
    Transaction,
    UserRepository,
    UserStore,
};

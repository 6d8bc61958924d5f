//! chat-repo — the repository (C4): persistence for users, sessions,
//! rooms, members, messages, and the nonce ledger (C3).

pub mod error;
pub mod models;
pub mod repository;
pub mod sqlite;

pub use error::RepoError;
pub use repository::Repository;
pub use sqlite::SqliteRepository;

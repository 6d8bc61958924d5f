#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to initialise schema: {0}")]
    SchemaInit(rusqlite::Error),
    #[error("room name already taken: {0}")]
    DuplicateRoomName(String),
    #[error("not found")]
    NotFound,
}

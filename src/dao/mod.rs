/// Database model definitions.
pub mod models;
/// Session, player and user persistence.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;

//! Storage layer for quizpool.
//!
//! `Storage` and `HintStore` describe the access patterns the scheduler needs;
//! `SqliteStorage` implements both over a single rusqlite connection.

mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{HintStore, Storage};

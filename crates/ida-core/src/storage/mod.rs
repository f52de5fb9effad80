pub mod models;
pub mod queries;
pub mod sqlite;

pub use queries::{ActionFilter, ChangeFilter};
pub use sqlite::Database;

pub mod files;
pub mod items;
pub mod models;
pub mod operations;
pub mod queries;
pub mod sqlite;

pub use sqlite::Database;

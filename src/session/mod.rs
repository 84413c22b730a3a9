// Session management and storage

pub mod database;
pub mod metadata;
pub mod storage;

pub use database::*;
pub use metadata::*;
pub use storage::*;

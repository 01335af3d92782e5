pub mod contacts;
pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;

pub use contacts::ContactRepo;
pub use database::Database;
pub use error::StoreError;

pub mod clients;
pub mod connection;
pub mod reports;
pub mod results;
pub mod scans;
pub mod schema;
pub mod tasks;

pub use connection::Database;

pub mod clients;
pub mod executions;
pub mod health;
pub mod reports;
pub mod scans;
pub mod stats;
pub mod tasks;

pub mod types;

pub use types::FleetError;

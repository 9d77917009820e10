pub mod error;
pub mod worker;

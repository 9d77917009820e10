pub mod publish;
pub mod query;

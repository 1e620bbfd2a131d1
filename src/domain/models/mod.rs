pub mod instrument;
pub mod types;

pub mod api;
pub mod core;
pub mod error;
pub mod worker;

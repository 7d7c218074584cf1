pub mod error;
pub mod incident;
pub mod models;
pub mod pipeline;
pub mod prober;
pub mod scheduler;
pub mod store;

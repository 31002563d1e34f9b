pub mod handlers;
pub mod logger;
pub mod workload;

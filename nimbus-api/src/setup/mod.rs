// Startup tasks
pub mod migrations;

pub use migrations::run_migrations;

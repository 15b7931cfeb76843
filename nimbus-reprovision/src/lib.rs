pub mod cloud_init;
pub mod console;
pub mod context;
pub mod deps;
pub mod error;
pub mod inspector;
pub mod instance_config;
pub mod logging;
pub mod poll;
pub mod profiles;
pub mod prompt;
pub mod quota;
pub mod reachability;
pub mod selection;
pub mod settings;
pub mod ssh_keys;
pub mod txlog;
pub mod workflow;

pub use context::ReprovisionContext;
pub use error::ReprovisionError;
pub use workflow::{Outcome, Reprovisioner};

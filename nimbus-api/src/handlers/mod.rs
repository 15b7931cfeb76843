// Handlers module - one file per resource family
pub mod audit;
pub mod budget;
pub mod health;
pub mod providers;
pub mod resources;
pub mod ws;

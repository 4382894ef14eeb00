//! Durable-with-fallback persistence for alerts and cooldowns.

pub mod backend;
pub mod store;

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
pub mod core;

pub mod app;
pub mod case_page;
pub use app::run;

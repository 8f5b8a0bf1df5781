//! Configuration loading for the blockd daemon.

mod settings;

pub use settings::Settings;

//! Recipes: stages, configurations and their generation

mod configuration;
mod generator;
mod params;
mod stage;

pub use configuration::{Configuration, ConfigurationSnapshot};
pub use generator::{generate, ConfigurationGenerator, StageOptions};
pub use params::{merge_layers, parameters_section};
pub use stage::{Stage, StageSnapshot};

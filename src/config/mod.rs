//! Settings and the typed grid configuration

mod grid;
mod settings;

pub use grid::GridConfig;
pub use settings::Settings;

//! Layered parameter merging

use crate::algorithms::Parameters;

/// Merge parameter layers from lowest to highest precedence; later layers
/// overwrite earlier ones key by key
pub fn merge_layers<'a, I>(layers: I) -> Parameters
where
    I: IntoIterator<Item = &'a Parameters>,
{
    let mut merged = Parameters::new();
    for layer in layers {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Settings section holding parameters for a stage or technique name
pub fn parameters_section(name: &str) -> String {
    format!("{}_parameters", name)
}

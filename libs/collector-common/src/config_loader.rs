//! Configuration loading: a figment-based layered loader for process
//! settings.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;

/// Layers `path` (if present) under environment variables prefixed with
/// `env_prefix`, then deserializes into `T`. Environment variables win
/// over the file.
pub fn load_layered<T: DeserializeOwned>(
    path: &str,
    env_prefix: &str,
) -> Result<T, figment::Error> {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(env_prefix))
        .extract()
}

//! Configuration merge system
//!
//! Four layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Host config (`<config dir>/drone-dispatch/config.toml`)
//! 3. Explicit config file (`--config`, TOML or JSON)
//! 4. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::DispatchConfig;
pub use effective::{default_host_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};

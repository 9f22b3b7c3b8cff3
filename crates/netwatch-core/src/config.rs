//! Configuration loading shared by every netwatch binary.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`NETWATCH__<SECTION>__<KEY>`)
//! 2. Config file (`netwatch.toml`, or the prefix given on the command line)
//! 3. Defaults

use serde::de::DeserializeOwned;

use crate::error::Result;

/// Environment variable prefix for all netwatch settings.
pub const ENV_PREFIX: &str = "NETWATCH";

/// Load one section of the configuration, falling back to `T::default()`
/// when neither the file nor the environment defines it.
pub fn load_section<T>(file_prefix: &str, section: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<T>(section) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => {
            tracing::debug!(section, "Config section not set, using defaults");
            Ok(T::default())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default = "default_interval")]
        interval_secs: u64,
    }

    fn default_interval() -> u64 {
        60
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                interval_secs: default_interval(),
            }
        }
    }

    #[test]
    fn test_missing_section_uses_defaults() {
        let loaded: Sample = load_section("does-not-exist-netwatch", "nonexistent_section").unwrap();
        assert_eq!(loaded, Sample::default());
    }
}

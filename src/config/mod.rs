mod types;

pub use types::*;

use crate::state::{CrashGuardStore, FileCrashGuard, MemoryCrashGuard};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./vidconvert.toml",
        "~/.config/vidconvert/config.toml",
        "/etc/vidconvert/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Crash guard store described by `config`.
pub fn crash_guard_store(config: &StateConfig) -> Arc<dyn CrashGuardStore> {
    if config.persist {
        Arc::new(FileCrashGuard::open(config.resolved_crash_guard_path()))
    } else {
        Arc::new(MemoryCrashGuard::default())
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.platform.api_level == 0 {
        anyhow::bail!("Platform API level cannot be 0");
    }

    if !config.encoder.mime.starts_with("video/") {
        anyhow::bail!("Encoder MIME type '{}' is not a video type", config.encoder.mime);
    }

    if config.encoder.frame_rate == 0 {
        anyhow::bail!("Encoder frame rate cannot be 0");
    }

    if config.encoder.default_bitrate == 0 {
        anyhow::bail!("Default bitrate cannot be 0");
    }

    if config.pipeline.poll_timeout_us == 0 {
        tracing::warn!("Codec poll timeout is 0, the pipeline will busy-poll");
    }

    if config.pipeline.flush_threshold == 0 {
        anyhow::bail!("Flush threshold cannot be 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::VideoMode;

    #[test]
    fn test_defaults_validate() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vidconvert.toml");
        std::fs::write(
            &path,
            r#"
[platform]
api_level = 17
manufacturer = "LGE"

[pipeline]
video_mode = "copy"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.platform.api_level, 17);
        assert_eq!(config.platform.to_platform().manufacturer, "lge");
        assert_eq!(config.pipeline.video_mode, VideoMode::Copy);
        assert_eq!(config.encoder.frame_rate, 25);
        assert!(config.state.persist);
    }

    #[test]
    fn test_invalid_mime_rejected() {
        let mut config = Config::default();
        config.encoder.mime = "audio/mp4a-latm".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("not a video type"));
    }

    #[test]
    fn test_unparseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "platform = [").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_memory_guard_when_not_persisted() {
        let config = StateConfig {
            persist: false,
            ..StateConfig::default()
        };
        let store = crash_guard_store(&config);
        assert!(store.last_run_clean());
    }
}

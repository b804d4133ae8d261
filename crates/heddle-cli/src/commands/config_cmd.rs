//! `heddle config` -- display resolved configuration.
//!
//! Loads and validates the config file, then prints it back as TOML.
//! Secret fields render as empty strings, so the output is safe to share
//! in bug reports.
//!
//! # Example
//!
//! ```text
//! heddle config show
//! heddle config show --config /etc/heddle/heddle.toml
//! ```

use anyhow::Context;

use super::load_config;

/// Display the resolved configuration as TOML.
pub fn show(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let rendered = toml::to_string_pretty(&config).context("failed to render config")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_accepts_a_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heddle.toml");
        std::fs::write(
            &path,
            r#"
            [auth]
            secret = "dev-signing-secret"

            [[providers]]
            id = "primary"
            base_url = "https://api.openai.com/v1"
            api_key = "sk-live-key"
            "#,
        )
        .unwrap();

        show(path.to_str().unwrap()).unwrap();
    }

    #[test]
    fn show_rejects_a_missing_file() {
        assert!(show("/nonexistent/heddle.toml").is_err());
    }
}

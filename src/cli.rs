//! Command-line interface definitions for the Pinchy archiver.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Most options can also be given via environment variables or a YAML
//! config file; command-line values win.

use crate::config::CrawlConfig;
use crate::error::ConfigError;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Pinchy archiver.
///
/// # Examples
///
/// ```sh
/// # Mirror everything into ~/media/audio/pinchy
/// pinchy_archive -a ~/media/audio/pinchy
///
/// # Show which mixes are on the site and which are archived
/// pinchy_archive -a ~/media/audio/pinchy --list
///
/// # Be gentler with the site
/// pinchy_archive -a ./pinchy --concurrency 2 --max-retries 5
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Archive root directory (one subdirectory per mix)
    #[arg(short, long, env = "PINCHY_ARCHIVE_ROOT")]
    pub archive_root: Option<PathBuf>,

    /// Optional path to a YAML config file
    #[arg(short, long, env = "PINCHY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the remote catalog and local archive status, then exit
    #[arg(short, long)]
    pub list: bool,

    /// Number of mixes processed concurrently
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Retries per request after the first attempt
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// Initial backoff delay in milliseconds (doubles per retry)
    #[arg(long)]
    pub base_delay_ms: Option<u64>,

    /// Site root to crawl
    #[arg(long, env = "PINCHY_BASE_URL")]
    pub base_url: Option<String>,

    /// User-Agent header sent with every request
    #[arg(long)]
    pub user_agent: Option<String>,
}

impl Cli {
    /// Resolve the effective configuration: defaults, then the config file,
    /// then command-line values.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the config file cannot be read or parsed,
    /// or if the merged values fail [`CrawlConfig::validate`].
    pub fn resolve_config(&self) -> Result<CrawlConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => CrawlConfig::from_yaml_file(path)?,
            None => CrawlConfig::default(),
        };

        if let Some(root) = &self.archive_root {
            config.archive_root = root.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(delay) = self.base_delay_ms {
            config.base_delay_ms = delay;
        }
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(agent) = &self.user_agent {
            config.user_agent = agent.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "pinchy_archive",
            "--archive-root",
            "./pinchy",
            "--concurrency",
            "6",
        ]);

        assert_eq!(cli.archive_root, Some(PathBuf::from("./pinchy")));
        assert_eq!(cli.concurrency, Some(6));
        assert!(!cli.list);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["pinchy_archive", "-a", "/tmp/pinchy", "-l"]);

        assert_eq!(cli.archive_root, Some(PathBuf::from("/tmp/pinchy")));
        assert!(cli.list);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency: 8\nmax_retries: 7").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::parse_from([
            "pinchy_archive",
            "-a",
            "/tmp/pinchy",
            "-c",
            path.as_str(),
            "--concurrency",
            "2",
        ]);
        let config = cli.resolve_config().unwrap();

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.archive_root, PathBuf::from("/tmp/pinchy"));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let cli = Cli::parse_from(["pinchy_archive", "-a", "/tmp/pinchy", "--concurrency", "0"]);
        assert!(cli.resolve_config().is_err());
    }
}

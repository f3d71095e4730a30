use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use config::{Config, Environment};
use serde::Deserialize;

const ENV_PREFIX: &str = "GLAZ";

/// Run settings: built-in defaults, overridden by `GLAZ_*` environment
/// variables, then by CLI flags in `main`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub snapshot: String,
    pub site: String,
    pub cache_dir: PathBuf,
    pub pictures_dir: PathBuf,
    pub avatars_dir: PathBuf,
    pub out_dir: PathBuf,
    pub timezone: String,
    pub timeout_secs: u64,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Config::builder()
            .set_default("snapshot", "20170923015827")?
            .set_default("site", "glazelki.ru")?
            .set_default("cache_dir", "cache")?
            .set_default("pictures_dir", "pictures")?
            .set_default("avatars_dir", "avatars")?
            .set_default("out_dir", ".")?
            .set_default("timezone", "Europe/Moscow")?
            .set_default("timeout_secs", 60)?
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("Failed to build settings")?
            .try_deserialize()
            .context("Invalid settings")
    }

    /// First listing page of the archived site.
    pub fn start_url(&self) -> String {
        format!(
            "https://web.archive.org/web/{}/http://{}:80/",
            self.snapshot, self.site
        )
    }

    /// Time zone the blog's wall-clock dates are written in.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|e| anyhow!("Unknown time zone {:?}: {}", self.timezone, e))
    }
}

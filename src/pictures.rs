use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::fetch::Fetcher;
use crate::parser::images::PictureSource;

/// Size suffix of hosted photos (`_XL`, `_L.jpg`, ...), swapped for the original.
static SIZE_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)_[a-z]+(?:\.[.a-z]+)?$").unwrap());

/// Pictures at least this wide are stored as retina (`@2x`) variants.
const RETINA_WIDTH: usize = 2000;

/// Local picture storage, named `<bucket>.<seq>[@2x].jpg`.
pub struct PictureStore<'a> {
    dir: PathBuf,
    fetcher: &'a Fetcher,
}

impl<'a> PictureStore<'a> {
    pub fn open(dir: impl AsRef<Path>, fetcher: &'a Fetcher) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
        Ok(PictureStore { dir, fetcher })
    }

    /// An already downloaded, non-empty picture for this slot.
    fn cached(&self, bucket: &str, seq: usize) -> Option<String> {
        let pattern = format!(
            "{}/{}.{}*",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            bucket,
            seq
        );
        let candidates = [picture_name(bucket, seq, 0), picture_name(bucket, seq, RETINA_WIDTH)];

        glob::glob(&pattern)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|path| fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false))
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .find(|name| candidates.contains(name))
    }

    fn download(&self, url: &str, bucket: &str, seq: usize) -> Result<String> {
        let url = original_variant(url);
        info!("Downloading {}", url);

        let bytes = self.fetcher.fetch(&url)?;
        let size = imagesize::blob_size(&bytes).map_err(|e| anyhow!("Not an image: {} ({:?})", url, e))?;
        let name = picture_name(bucket, seq, size.width);

        let partial = self.dir.join(format!(".{}.part", name));
        fs::write(&partial, &bytes)?;
        fs::rename(&partial, self.dir.join(&name))?;
        Ok(name)
    }
}

impl PictureSource for PictureStore<'_> {
    fn resolve(&self, url: &str, date_bucket: &str, seq: usize) -> Option<String> {
        if let Some(name) = self.cached(date_bucket, seq) {
            info!("Got cache: {}", name);
            return Some(name);
        }
        match self.download(url, date_bucket, seq) {
            Ok(name) => Some(name),
            Err(e) => {
                warn!("Picture {} failed: {:#}", url, e);
                None
            }
        }
    }
}

/// Commenter avatars, fetched once and never required.
pub struct AvatarStore<'a> {
    dir: PathBuf,
    fetcher: &'a Fetcher,
}

impl<'a> AvatarStore<'a> {
    pub fn open(dir: impl AsRef<Path>, fetcher: &'a Fetcher) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
        Ok(AvatarStore { dir, fetcher })
    }

    /// Download `url` to `name` unless a non-empty copy is already there.
    /// Failures are logged and otherwise ignored.
    pub fn fetch_if_absent(&self, url: &str, name: &str) {
        let path = self.dir.join(name);
        if fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false) {
            return;
        }
        let result = self
            .fetcher
            .fetch(url)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| fs::write(&path, bytes).map_err(anyhow::Error::from));
        if let Err(e) = result {
            warn!("Avatar {} failed: {:#}", url, e);
        }
    }
}

fn original_variant(url: &str) -> String {
    SIZE_SUFFIX_RE.replace(url, "_orig").into_owned()
}

fn picture_name(bucket: &str, seq: usize, width: usize) -> String {
    if width >= RETINA_WIDTH {
        format!("{}.{}@2x.jpg", bucket, seq)
    } else {
        format!("{}.{}.jpg", bucket, seq)
    }
}

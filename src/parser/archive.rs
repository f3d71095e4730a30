use std::sync::LazyLock;

use regex::Regex;

/// Any snapshot prefix, including the `im_`/`if_` flavours used for assets.
static ASSET_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://web\.archive\.org/web/[^/]+/").unwrap());
/// Timestamp-only snapshot prefix in front of an external link.
static SNAPSHOT_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://web\.archive\.org/web/\d+/").unwrap());

/// URL prefix rules of one archived site.
pub struct ArchiveSite {
    internal_re: Regex,
}

impl ArchiveSite {
    pub fn new(site: &str) -> Self {
        let internal_re = Regex::new(&format!(
            r"https://web\.archive\.org/web/\d+/http://{}(?::80)?/",
            regex::escape(site)
        ))
        .expect("escaped host always forms a valid pattern");
        ArchiveSite { internal_re }
    }

    /// Strip the snapshot prefix pointing back at the site itself. `None` when
    /// the URL is not an archived page of this site.
    pub fn strip_internal(&self, url: &str) -> Option<String> {
        strip_all(&self.internal_re, url)
    }

    /// Strip a bare snapshot prefix from an archived external URL.
    pub fn strip_snapshot(&self, url: &str) -> Option<String> {
        strip_all(&SNAPSHOT_PREFIX_RE, url)
    }

    /// Strip the snapshot prefix from an asset (`<img src>`) URL; URLs without
    /// one are returned unchanged.
    pub fn strip_asset(&self, url: &str) -> String {
        ASSET_PREFIX_RE.replace_all(url, "").into_owned()
    }
}

fn strip_all(re: &Regex, url: &str) -> Option<String> {
    if re.is_match(url) {
        Some(re.replace_all(url, "").into_owned())
    } else {
        None
    }
}

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::parser::archive::ArchiveSite;

static IMG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<img[^>]+>").unwrap());
static IMG_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static PICTURE_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}\.\d{2}\.\d{2}\.\d{2}\.\d{2}\.\d+(?:@2x)?\.jpg$").unwrap());

const SMILEY_ASSET: &str = "simple-smile.png";
const SMILEY_EMOJI: &str = "🙂";
/// Filename used in markup when a picture could not be downloaded.
pub const MISSING_PICTURE: &str = "MISSING.jpg";

/// Whether `line` is a bare local picture filename (`2017.09.23.01.58.1.jpg`).
pub fn is_picture_file(line: &str) -> bool {
    PICTURE_FILE_RE.is_match(line)
}

/// Where pictures referenced by a note end up locally.
pub trait PictureSource {
    /// Resolve `url` to a local filename, keyed by the note's minute bucket and
    /// the picture's 1-based position in the note. `None` means the source is
    /// broken.
    fn resolve(&self, url: &str, date_bucket: &str, seq: usize) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRewrite {
    Emoji(&'static str),
    Resolved { filename: String, caption: String },
}

impl ImageRewrite {
    pub fn render(&self) -> String {
        match self {
            ImageRewrite::Emoji(e) => e.to_string(),
            ImageRewrite::Resolved { filename, caption } => format!("{}\n{}\n", filename, caption),
        }
    }
}

/// Replace every `<img>` tag in `content` with a picture reference.
///
/// Identical tags are resolved once. The tag text itself is the substitution
/// key, so nothing around the tags changes.
pub fn rewrite_images(
    content: &str,
    site: &ArchiveSite,
    pictures: &dyn PictureSource,
    date_bucket: &str,
) -> Result<String> {
    let mut rewrites: HashMap<&str, String> = HashMap::new();

    for m in IMG_RE.find_iter(content) {
        let tag = m.as_str();
        if rewrites.contains_key(tag) {
            continue;
        }
        let seq = rewrites.len() + 1;
        let rewrite = rewrite_one(tag, site, pictures, date_bucket, seq)?;
        debug!(seq, ?rewrite, "image");
        rewrites.insert(tag, rewrite.render());
    }

    if rewrites.is_empty() {
        return Ok(content.to_string());
    }

    Ok(IMG_RE
        .replace_all(content, |caps: &regex::Captures| {
            rewrites.get(&caps[0]).cloned().unwrap_or_default()
        })
        .into_owned())
}

fn rewrite_one(
    tag: &str,
    site: &ArchiveSite,
    pictures: &dyn PictureSource,
    date_bucket: &str,
    seq: usize,
) -> Result<ImageRewrite> {
    let attrs = parse_img(tag)?;
    let src = site.strip_asset(&attrs.src);

    if src.contains(SMILEY_ASSET) {
        return Ok(ImageRewrite::Emoji(SMILEY_EMOJI));
    }

    let filename = pictures.resolve(&src, date_bucket, seq).unwrap_or_else(|| {
        warn!("Broken picture {}, using {}", src, MISSING_PICTURE);
        MISSING_PICTURE.to_string()
    });
    let caption = attrs
        .alt
        .or(attrs.title)
        .unwrap_or_default()
        .trim_end_matches('.')
        .to_string();

    Ok(ImageRewrite::Resolved { filename, caption })
}

struct ImgAttrs {
    src: String,
    alt: Option<String>,
    title: Option<String>,
}

fn parse_img(tag: &str) -> Result<ImgAttrs> {
    let fragment = Html::parse_fragment(tag);
    let malformed = || MigrateError::MalformedImageTag { tag: tag.to_string() };

    let img = fragment.select(&IMG_SEL).next().ok_or_else(malformed)?;
    let el = img.value();
    let src = el.attr("src").ok_or_else(malformed)?;

    Ok(ImgAttrs {
        src: src.to_string(),
        alt: el.attr("alt").map(str::to_string),
        title: el.attr("title").map(str::to_string),
    })
}

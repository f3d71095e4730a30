use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::parser::archive::ArchiveSite;
use crate::parser::images::{self, PictureSource, MISSING_PICTURE};
use crate::parser::links::LinkClassifier;
use crate::parser::translit::Transliterator;

/// Blog HTML → markup, applied as one simultaneous pass.
///
/// Alternatives are tried in this order at each position; replacements are
/// never re-scanned.
const SUBSTITUTIONS: &[(&str, &str)] = &[
    // leftover of the "read more" cut
    (r#"(?:<p>)?<strong><span id="more-\d+"></span></strong>(?:</p>)?"#, "\n"),
    (r"<p>", ""),
    (r"</p>", "\n"),
    (r"\r", ""),
    (r"&#171;|&laquo;", "«"),
    (r"&#187;|&raquo;", "»"),
    (r"</?em>", "//"),
    (r"<br\s*/?>\n*", "\n\n"),
    (r"</?(?:strong|b)>", "**"),
    (r"&#8212;", "—"),
    (r"\s*\.{3,}", "…"),
    (r"\s*\.*\s*&#8230;", "…"),
    (r"&quot;", "\""),
    (r"&ndash;", "–"),
    (r"  +", " "),
];

static SUBSTITUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternatives: Vec<String> = SUBSTITUTIONS.iter().map(|(p, _)| format!("({})", p)).collect();
    Regex::new(&format!("(?s){}", alternatives.join("|"))).unwrap()
});
static LIST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(</?[uo]l>)|(<li>)|(</li>)").unwrap());
static NEWLINES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static BLOCKQUOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<blockquote>(.*?)</blockquote>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static FOTKI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https://img-fotki\.yandex\.ru\S*$").unwrap());

/// Converts one note body from blog HTML to markup.
pub struct MarkupTransformer<'a> {
    site: &'a ArchiveSite,
    pictures: &'a dyn PictureSource,
    links: LinkClassifier<'a>,
}

impl<'a> MarkupTransformer<'a> {
    pub fn new(site: &'a ArchiveSite, translit: &'a Transliterator, pictures: &'a dyn PictureSource) -> Self {
        MarkupTransformer {
            site,
            pictures,
            links: LinkClassifier::new(site, translit),
        }
    }

    /// Steps run in a fixed order; later ones rely on text shapes produced by
    /// earlier ones.
    pub fn transform(&self, content: &str, date_bucket: &str) -> Result<String> {
        let content = normalize_lists(content);
        let content = substitute(&content);
        let content = images::rewrite_images(&content, self.site, self.pictures, date_bucket)?;
        let content = collapse_repeated_captions(&content);
        let content = NEWLINES_RE.replace_all(&content, "\n\n");
        let content = self.links.rewrite_all(&content)?;
        let content = quote_blocks(&content);
        Ok(content.trim().to_string())
    }
}

fn normalize_lists(content: &str) -> String {
    LIST_RE
        .replace_all(content, |caps: &regex::Captures| {
            if caps.get(2).is_some() {
                " - "
            } else {
                ""
            }
        })
        .into_owned()
}

fn substitute(content: &str) -> String {
    SUBSTITUTION_RE
        .replace_all(content, |caps: &regex::Captures| {
            (1..caps.len())
                .find(|&i| caps.get(i).is_some())
                .map(|i| SUBSTITUTIONS[i - 1].1)
                .unwrap_or_default()
        })
        .into_owned()
}

fn is_picture_line(line: &str) -> bool {
    images::is_picture_file(line) || line == MISSING_PICTURE || FOTKI_RE.is_match(line)
}

/// Old posts repeat a photo caption before and after the photo:
/// `caption`, blank line(s), picture, `caption`. Keep only the picture
/// followed by the caption.
fn collapse_repeated_captions(content: &str) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let caption = lines[i];
        if !caption.is_empty() {
            let mut j = i + 1;
            while j < lines.len() && lines[j].is_empty() {
                j += 1;
            }
            if j > i + 1 && j + 1 < lines.len() && is_picture_line(lines[j]) && lines[j + 1] == caption {
                out.push(lines[j]);
                out.push(caption);
                i = j + 2;
                continue;
            }
        }
        out.push(caption);
        i += 1;
    }

    out.join("\n")
}

fn quote_blocks(content: &str) -> String {
    BLOCKQUOTE_RE
        .replace_all(content, |caps: &regex::Captures| {
            let text = TAG_RE.replace_all(&caps[1], "");
            quote_lines(&text)
        })
        .into_owned()
}

/// Prefix every line with `> `. A trailing newline does not open a new line.
fn quote_lines(text: &str) -> String {
    let (body, trailing) = match text.strip_suffix('\n') {
        Some(body) => (body, "\n"),
        None => (text, ""),
    };
    let mut quoted: String = body
        .split('\n')
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n");
    quoted.push_str(trailing);
    quoted
}

pub mod archive;
pub mod comments;
pub mod images;
pub mod links;
pub mod markup;
pub mod translit;

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Offset, TimeZone};
use chrono_tz::Tz;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::error::{MigrateError, Result};
use archive::ArchiveSite;
use comments::CommentRecord;
use images::PictureSource;
use links::TagLink;
use markup::MarkupTransformer;
use translit::Transliterator;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<span class="entry-date" title="(\d+):(\d+)">(\d+)\.(\d+)\.(\d+)</span>"#).unwrap()
});
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<h1 class="art-postheader">(.*?)</h1>"#).unwrap());
static BODY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!-- article-content -->(.*?)<!--(?:Start Share Buttons| /article-content)").unwrap()
});
static TAG_HREF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)^.*?/tag/([^/]+)/?").unwrap());
static TAG_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"a[rel="tag"]"#).unwrap());
/// Single-quote references, left encoded in titles.
static SINGLE_QUOTE_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)&#0*39;|&#x0*27;|&apos;").unwrap());

/// Start of the social buttons block some notes carry inside the content.
const SHARE_MARKER: &str =
    r#"<div style="clear:both;"></div><div class="header_text" style="text-align:"><h3>Поделиться в соц. сетях"#;

/// One migrated note.
#[derive(Debug, Clone, Serialize)]
pub struct NoteRecord {
    pub created: DateTime<FixedOffset>,
    pub title: String,
    pub body: String,
    pub tags: Vec<TagLink>,
    pub image_refs: Vec<String>,
    pub comments: Vec<CommentRecord>,
}

impl NoteRecord {
    /// Minute bucket used to name the note's pictures.
    pub fn date_bucket(&self) -> String {
        date_bucket(&self.created)
    }
}

/// Parses archived note pages.
pub struct NoteParser<'a> {
    site: &'a ArchiveSite,
    translit: &'a Transliterator,
    markup: MarkupTransformer<'a>,
    tz: Tz,
}

impl<'a> NoteParser<'a> {
    pub fn new(
        site: &'a ArchiveSite,
        translit: &'a Transliterator,
        pictures: &'a dyn PictureSource,
        tz: Tz,
    ) -> Self {
        NoteParser {
            site,
            translit,
            markup: MarkupTransformer::new(site, translit, pictures),
            tz,
        }
    }

    pub fn parse(&self, html: &str) -> Result<NoteRecord> {
        let created = self.created(html)?;

        let title = TITLE_RE
            .captures(html)
            .map(|c| decode_title(c[1].trim()))
            .ok_or(MigrateError::MissingField("title"))?;

        let body = BODY_RE
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .ok_or(MigrateError::MissingField("article content"))?;
        let body = match body.find(SHARE_MARKER) {
            Some(idx) => &body[..idx],
            None => body,
        };
        let body = self.markup.transform(body, &date_bucket(&created))?;

        let image_refs = body
            .lines()
            .filter(|line| images::is_picture_file(line))
            .map(str::to_string)
            .collect();

        let page = Html::parse_document(html);
        let tags = self.tags(&page)?;
        let comments = comments::extract_comments(&page, self.site, self.tz)?;

        Ok(NoteRecord {
            created,
            title,
            body,
            tags,
            image_refs,
            comments,
        })
    }

    fn created(&self, html: &str) -> Result<DateTime<FixedOffset>> {
        DATE_RE
            .captures(html)
            .and_then(|c| {
                local_time(
                    self.tz,
                    c[5].parse().ok()?,
                    c[4].parse().ok()?,
                    c[3].parse().ok()?,
                    c[1].parse().ok()?,
                    c[2].parse().ok()?,
                )
            })
            .ok_or(MigrateError::MissingField("entry date"))
    }

    fn tags(&self, page: &Html) -> Result<Vec<TagLink>> {
        page.select(&TAG_SEL)
            .map(|a| -> Result<TagLink> {
                let href = a.value().attr("href").ok_or_else(|| MigrateError::MalformedLink {
                    href: a.html(),
                })?;
                let fragment = TAG_HREF_RE.replacen(href, 1, "$1");
                let decoded = links::url_decode(&fragment);
                Ok(TagLink {
                    slug: self.translit.slug(&decoded),
                    raw_href: fragment.into_owned(),
                    text: a.text().collect::<String>().to_lowercase(),
                })
            })
            .collect()
    }
}

/// Wall-clock time on the source blog, resolved in its time zone.
///
/// Ambiguous times (the autumn DST hour) take the earlier instant; times
/// skipped by a spring transition do not exist.
pub(crate) fn local_time(
    tz: Tz,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
) -> Option<DateTime<FixedOffset>> {
    let local = tz.with_ymd_and_hms(year, month, day, hour, minute, 0).earliest()?;
    Some(local.with_timezone(&local.offset().fix()))
}

/// Decode character references in a title, except single quotes, which
/// stay encoded as PHP's `ENT_COMPAT` leaves them.
fn decode_title(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for m in SINGLE_QUOTE_REF_RE.find_iter(raw) {
        out.push_str(&html_escape::decode_html_entities(&raw[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&html_escape::decode_html_entities(&raw[last..]));
    out
}

fn date_bucket(created: &DateTime<FixedOffset>) -> String {
    created.format("%Y.%m.%d.%H.%M").to_string()
}

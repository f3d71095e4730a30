use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::parser::archive::ArchiveSite;
use crate::parser::translit::Transliterator;

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<a [^>]+>.*?</a>").unwrap());
static DATE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+/\d+/\d+/").unwrap());
static A_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

const SUBSCRIPTION_FRAGMENT: &str = "feedburner.google.com/fb/a/mailverify";
/// Tag pages and permalinks both land here on the new platform.
const TAGS_PREFIX: &str = "/tags/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagLink {
    pub raw_href: String,
    pub slug: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRewrite {
    Tag(TagLink),
    Permalink { path: String, text: String },
    External { url: String, text: String },
    Dropped,
}

impl LinkRewrite {
    pub fn render(&self) -> String {
        match self {
            LinkRewrite::Tag(tag) => format!("[[{}{} {}]]", TAGS_PREFIX, tag.slug, tag.text),
            LinkRewrite::Permalink { path, text } => format!("[[{}{} {}]]", TAGS_PREFIX, path, text),
            LinkRewrite::External { url, text } => format!("[[{} {}]]", url, text),
            LinkRewrite::Dropped => String::new(),
        }
    }
}

/// Decides what one anchor becomes on the new platform.
pub struct LinkClassifier<'a> {
    site: &'a ArchiveSite,
    translit: &'a Transliterator,
}

impl<'a> LinkClassifier<'a> {
    pub fn new(site: &'a ArchiveSite, translit: &'a Transliterator) -> Self {
        LinkClassifier { site, translit }
    }

    pub fn classify(&self, href: &str, text: &str) -> Result<LinkRewrite> {
        let Some(path) = self.site.strip_internal(href) else {
            return self.classify_external(href, text);
        };

        if path.starts_with("tag") {
            let decoded = url_decode(&path);
            let segment = decoded.split('/').nth(1).ok_or_else(|| MigrateError::MalformedLink {
                href: href.to_string(),
            })?;
            return Ok(LinkRewrite::Tag(TagLink {
                raw_href: path.clone(),
                slug: self.translit.slug(segment),
                text: text.to_string(),
            }));
        }

        if DATE_PATH_RE.is_match(&path) {
            let slug = path.splitn(4, '/').nth(3).unwrap_or_default();
            return Ok(LinkRewrite::Permalink {
                path: slug.to_string(),
                text: text.to_string(),
            });
        }

        Err(MigrateError::UnrecognizedLinkShape { path })
    }

    fn classify_external(&self, href: &str, text: &str) -> Result<LinkRewrite> {
        let url = self.site.strip_snapshot(href).ok_or_else(|| MigrateError::MalformedLink {
            href: href.to_string(),
        })?;

        if url.contains(SUBSCRIPTION_FRAGMENT) {
            return Ok(LinkRewrite::Dropped);
        }
        Ok(LinkRewrite::External {
            url,
            text: text.to_string(),
        })
    }

    /// Replace every `<a …>…</a>` in `content` with its rewritten markup.
    pub fn rewrite_all(&self, content: &str) -> Result<String> {
        let mut rewrites: HashMap<&str, String> = HashMap::new();

        for m in ANCHOR_RE.find_iter(content) {
            let tag = m.as_str();
            if rewrites.contains_key(tag) {
                continue;
            }
            let (href, text) = parse_anchor(tag)?;
            let rewrite = self.classify(&href, &text)?;
            debug!(?rewrite, "link");
            rewrites.insert(tag, rewrite.render());
        }

        Ok(ANCHOR_RE
            .replace_all(content, |caps: &regex::Captures| {
                rewrites.get(&caps[0]).cloned().unwrap_or_default()
            })
            .into_owned())
    }
}

/// Tolerant parse of one anchor fragment into (href, visible text).
fn parse_anchor(tag: &str) -> Result<(String, String)> {
    let fragment = Html::parse_fragment(tag);
    let malformed = || MigrateError::MalformedLink { href: tag.to_string() };

    let a = fragment.select(&A_SEL).next().ok_or_else(malformed)?;
    let href = a.value().attr("href").ok_or_else(malformed)?;
    let text = a.text().collect::<String>();
    Ok((href.to_string(), text.trim().to_string()))
}

pub(crate) fn url_decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://web.archive.org/web/20170923015827/http://glazelki.ru/";

    fn with_classifier<T>(f: impl FnOnce(&LinkClassifier) -> T) -> T {
        let site = ArchiveSite::new("glazelki.ru");
        let translit = Transliterator::new();
        f(&LinkClassifier::new(&site, &translit))
    }

    #[test]
    fn latin_tag() {
        with_classifier(|c| {
            let r = c.classify(&format!("{BASE}tag/novosti/"), "Новости").unwrap();
            assert!(matches!(&r, LinkRewrite::Tag(t) if t.slug == "novosti"));
            assert_eq!(r.render(), "[[/tags/novosti Новости]]");
        });
    }

    #[test]
    fn encoded_cyrillic_tag() {
        with_classifier(|c| {
            let href = format!("{BASE}tag/%d0%bf%d1%83%d1%82%d0%b5%d1%88%d0%b5%d1%81%d1%82%d0%b2%d0%b8%d1%8f/");
            let r = c.classify(&href, "путешествия").unwrap();
            assert_eq!(r.render(), "[[/tags/puteshestviya путешествия]]");
        });
    }

    #[test]
    fn permalink_shares_tag_namespace() {
        with_classifier(|c| {
            let r = c.classify(&format!("{BASE}2017/09/23/some-slug"), "там").unwrap();
            assert_eq!(
                r,
                LinkRewrite::Permalink {
                    path: "some-slug".into(),
                    text: "там".into()
                }
            );
            assert_eq!(r.render(), "[[/tags/some-slug там]]");
        });
    }

    #[test]
    fn external_link() {
        with_classifier(|c| {
            let r = c
                .classify("https://web.archive.org/web/20160101000000/http://example.com/a?b=c", "пример")
                .unwrap();
            assert_eq!(r.render(), "[[http://example.com/a?b=c пример]]");
        });
    }

    #[test]
    fn subscription_link_is_dropped() {
        with_classifier(|c| {
            let r = c
                .classify(
                    "https://web.archive.org/web/20170923015827/http://feedburner.google.com/fb/a/mailverify?uri=glazelki",
                    "Подписаться",
                )
                .unwrap();
            assert_eq!(r, LinkRewrite::Dropped);
            assert_eq!(r.render(), "");
        });
    }

    #[test]
    fn unarchived_link_is_malformed() {
        with_classifier(|c| {
            let err = c.classify("http://example.com/", "x").unwrap_err();
            assert!(matches!(err, MigrateError::MalformedLink { .. }));
        });
    }

    #[test]
    fn unknown_internal_path_is_rejected() {
        with_classifier(|c| {
            let err = c.classify(&format!("{BASE}about/"), "О блоге").unwrap_err();
            assert!(matches!(err, MigrateError::UnrecognizedLinkShape { path } if path == "about/"));
        });
    }

    #[test]
    fn rewrite_all_replaces_anchors_in_place() {
        with_classifier(|c| {
            let body = format!(
                "Читай <a href=\"{BASE}tag/novosti/\" rel=\"tag\">Новости</a> и \
                 <a href='https://web.archive.org/web/1/http://ya.ru/'><b>Яндекс</b></a>."
            );
            let out = c.rewrite_all(&body).unwrap();
            assert_eq!(out, "Читай [[/tags/novosti Новости]] и [[http://ya.ru/ Яндекс]].");
        });
    }

    #[test]
    fn rewrite_all_fails_on_anchor_without_href() {
        with_classifier(|c| {
            let err = c.rewrite_all("<a name=\"top\">x</a>").unwrap_err();
            assert!(matches!(err, MigrateError::MalformedLink { .. }));
        });
    }

    #[test]
    fn text_without_anchors_is_untouched() {
        with_classifier(|c| {
            let s = "обычный текст\n\n**жирный**";
            assert_eq!(c.rewrite_all(s).unwrap(), s);
        });
    }
}

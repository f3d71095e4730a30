use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::error::{MigrateError, Result};
use crate::parser::archive::ArchiveSite;
use crate::parser::local_time;

static BLOCK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"[id^="comment-"]"#).unwrap());
const BLOCK_ID_PREFIX: &str = "comment-";
static AUTHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".comment-author").unwrap());
static NAME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".comment-author .fn").unwrap());
static META_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".comment-meta").unwrap());
static AVATAR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img.avatar").unwrap());
static VK_ICON_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"img[alt="vk.com"]"#).unwrap());
static HREF_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static P_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());

static STAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})\.(\d{1,2})\.(\d{4}) в (\d{1,2}):(\d{2})").unwrap());
static GRAVATAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"gravatar\.com/avatar/").unwrap());
static GRAVATAR_HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https?://[^/]*gravatar\.com/avatar/)([0-9a-f]{32})").unwrap());
static VK_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"vk\.com/id(\d+)").unwrap());

/// Avatar size requested from gravatar instead of the 48px thumbnails.
const GRAVATAR_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityProvider {
    None,
    Email,
    Vk,
}

impl IdentityProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityProvider::None => "",
            IdentityProvider::Email => "email",
            IdentityProvider::Vk => "vk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentRecord {
    pub author: String,
    pub text: String,
    pub created: DateTime<FixedOffset>,
    pub provider: IdentityProvider,
    pub account_key: Option<String>,
    pub avatar_url: Option<String>,
    pub avatar_name: Option<String>,
}

/// Collect every comment on a note page, in page order.
///
/// Replies may be nested inside their parent's block; each comment only sees
/// the elements that are not inside a nested block.
pub fn extract_comments(page: &Html, site: &ArchiveSite, tz: Tz) -> Result<Vec<CommentRecord>> {
    page.select(&BLOCK_SEL)
        .filter(|block| own(*block, &AUTHOR_SEL).next().is_some())
        .map(|block| parse_comment(block, site, tz))
        .collect()
}

fn is_block(el: &ElementRef) -> bool {
    el.value().id().is_some_and(|id| id.starts_with(BLOCK_ID_PREFIX))
}

/// Elements under `block` matching `sel`, skipping those of nested comments.
fn own<'a>(block: ElementRef<'a>, sel: &'a Selector) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    block.select(sel).filter(move |el| {
        el.ancestors()
            .filter_map(ElementRef::wrap)
            .find(is_block)
            .is_some_and(|owner| owner == block)
    })
}

fn parse_comment(block: ElementRef, site: &ArchiveSite, tz: Tz) -> Result<CommentRecord> {
    let id = block.value().id().unwrap_or_default();

    let author = own(block, &NAME_SEL)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| MigrateError::MalformedComment(format!("{id}: no author")))?;

    let meta = own(block, &META_SEL)
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default();
    let created = STAMP_RE
        .captures(&meta)
        .and_then(|c| {
            local_time(
                tz,
                c[3].parse().ok()?,
                c[2].parse().ok()?,
                c[1].parse().ok()?,
                c[4].parse().ok()?,
                c[5].parse().ok()?,
            )
        })
        .ok_or_else(|| MigrateError::MalformedComment(format!("{id}: no date in {:?}", meta.trim())))?;

    let text = own(block, &P_SEL)
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let avatar_src = own(block, &AVATAR_SEL)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(|src| site.strip_asset(src));

    let mut comment = CommentRecord {
        author,
        text,
        created,
        provider: IdentityProvider::None,
        account_key: None,
        avatar_url: None,
        avatar_name: None,
    };

    if let Some(src) = avatar_src.as_deref().filter(|s| GRAVATAR_RE.is_match(s)) {
        if let Some(caps) = GRAVATAR_HASH_RE.captures(src) {
            let hash = &caps[2];
            comment.provider = IdentityProvider::Email;
            comment.account_key = Some(hash.to_string());
            comment.avatar_url = Some(format!("{}{}?s={}", &caps[1], hash, GRAVATAR_SIZE));
            comment.avatar_name = Some(format!("{}.jpg", hash));
        }
    }

    if own(block, &VK_ICON_SEL).next().is_some() {
        let vk_id = own(block, &HREF_SEL)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| VK_ID_RE.captures(href).map(|c| c[1].to_string()))
            .ok_or_else(|| MigrateError::MalformedComment(format!("{id}: vk.com login without profile link")))?;
        comment.provider = IdentityProvider::Vk;
        comment.avatar_name = avatar_src.as_ref().map(|_| format!("vk{}.jpg", vk_id));
        comment.avatar_url = avatar_src;
        comment.account_key = Some(vk_id);
    }

    Ok(comment)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    fn comments(html: &str) -> Result<Vec<CommentRecord>> {
        let site = ArchiveSite::new("glazelki.ru");
        extract_comments(&Html::parse_document(html), &site, chrono_tz::Europe::Moscow)
    }

    fn block(id: u32, author_html: &str, avatar: &str, extra: &str) -> String {
        format!(
            r##"<li id="li-comment-{id}"><div id="comment-{id}">
                <div class="comment-author vcard">{avatar}<cite class="fn">{author_html}</cite> <span class="says">пишет:</span></div>
                <div class="comment-meta commentmetadata"><a href="#comment-{id}">23.09.2017 в 01:58</a></div>
                {extra}
                <p>Отличные фото!</p>
                <p>Спасибо.</p>
            </div></li>"##
        )
    }

    #[test]
    fn gravatar_comment() {
        let avatar = format!(
            "<img alt='' src='https://web.archive.org/web/20170923015827im_/http://1.gravatar.com/avatar/{HASH}?s=48&#038;d=mm&#038;r=g' class='avatar avatar-48 photo' />"
        );
        let html = format!("<ol class=\"commentlist\">{}</ol>", block(7, "Иван", &avatar, ""));
        let c = comments(&html).unwrap();
        assert_eq!(c.len(), 1);
        let c = &c[0];
        assert_eq!(c.author, "Иван");
        assert_eq!(c.text, "Отличные фото!\n\nСпасибо.");
        assert_eq!(c.created.to_rfc3339(), "2017-09-23T01:58:00+03:00");
        assert_eq!(c.provider, IdentityProvider::Email);
        assert_eq!(c.account_key.as_deref(), Some(HASH));
        assert_eq!(
            c.avatar_url.as_deref(),
            Some(format!("http://1.gravatar.com/avatar/{HASH}?s=256").as_str())
        );
        assert_eq!(c.avatar_name.as_deref(), Some(format!("{HASH}.jpg").as_str()));
    }

    #[test]
    fn gravatar_without_hash_has_no_identity() {
        let avatar = "<img src='http://0.gravatar.com/avatar/?s=48&amp;d=mm' class='avatar avatar-48' />";
        let c = comments(&block(1, "Гость", avatar, "")).unwrap();
        assert_eq!(c[0].provider, IdentityProvider::None);
        assert_eq!(c[0].account_key, None);
        assert_eq!(c[0].avatar_url, None);
    }

    #[test]
    fn vk_login_overrides_gravatar() {
        let avatar = format!("<img src='http://1.gravatar.com/avatar/{HASH}?s=48' class='avatar' />");
        let author = r#"<a href="https://web.archive.org/web/2017/http://vk.com/id123456" rel="external nofollow" class="url">Пётр</a>"#;
        let icon = r#"<img src="http://glazelki.ru/wp-content/plugins/ulogin/img/vkontakte.png" alt="vk.com" />"#;
        let c = comments(&block(2, author, &avatar, icon)).unwrap();
        let c = &c[0];
        assert_eq!(c.author, "Пётр");
        assert_eq!(c.provider, IdentityProvider::Vk);
        assert_eq!(c.account_key.as_deref(), Some("123456"));
        assert_eq!(c.avatar_name.as_deref(), Some("vk123456.jpg"));
        assert!(c.avatar_url.as_deref().unwrap().contains("gravatar.com"));
    }

    #[test]
    fn vk_login_without_profile_link_is_fatal() {
        let icon = r#"<img src="http://x/vkontakte.png" alt="vk.com" />"#;
        let err = comments(&block(3, "Аноним", "", icon)).unwrap_err();
        assert!(matches!(err, MigrateError::MalformedComment(_)));
    }

    #[test]
    fn blocks_without_author_marker_are_skipped() {
        let html = format!(
            r#"<div id="comment-form"><textarea></textarea></div>{}"#,
            block(4, "Ольга", "", "")
        );
        let c = comments(&html).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].author, "Ольга");
        assert_eq!(c[0].provider, IdentityProvider::None);
    }

    #[test]
    fn missing_date_is_fatal() {
        let html = r#"<div id="comment-9"><div class="comment-author"><cite class="fn">X</cite></div><p>hi</p></div>"#;
        assert!(matches!(comments(html), Err(MigrateError::MalformedComment(_))));
    }

    #[test]
    fn nested_reply_does_not_leak_into_parent() {
        let icon = r#"<img src="http://x/vkontakte.png" alt="vk.com" />"#;
        let reply_author = r#"<a href="http://vk.com/id42">Пётр</a>"#;
        let html = format!(
            r##"<ol class="commentlist"><li id="comment-1">
                <div class="comment-author"><cite class="fn">Маша</cite></div>
                <div class="comment-meta"><a href="#comment-1">01.06.2015 в 12:00</a></div>
                <p>Родитель</p>
                <ul class="children"><li id="comment-2">
                    <div class="comment-author">{icon}<cite class="fn">{reply_author}</cite></div>
                    <div class="comment-meta"><a href="#comment-2">02.06.2015 в 13:30</a></div>
                    <p>Ответ</p>
                </li></ul>
            </li></ol>"##
        );
        let c = comments(&html).unwrap();
        assert_eq!(c.len(), 2);

        assert_eq!(c[0].author, "Маша");
        assert_eq!(c[0].text, "Родитель");
        assert_eq!(c[0].provider, IdentityProvider::None);
        assert_eq!(c[0].account_key, None);

        assert_eq!(c[1].author, "Пётр");
        assert_eq!(c[1].text, "Ответ");
        assert_eq!(c[1].provider, IdentityProvider::Vk);
        assert_eq!(c[1].account_key.as_deref(), Some("42"));
        assert_eq!(c[1].created.to_rfc3339(), "2015-06-02T13:30:00+03:00");
    }

    #[test]
    fn comments_from_2012_use_moscow_summer_offset() {
        let html = block(5, "Ольга", "", "").replace("23.09.2017 в 01:58", "01.06.2012 в 12:00");
        let c = comments(&html).unwrap();
        assert_eq!(c[0].created.to_rfc3339(), "2012-06-01T12:00:00+04:00");
        assert_eq!(c[0].created.timestamp(), 1338537600);
    }

    #[test]
    fn page_without_comments() {
        assert!(comments("<p>Нет комментариев</p>").unwrap().is_empty());
    }
}

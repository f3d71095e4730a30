use std::collections::HashSet;

use regex::Regex;
use tracing::info;

use crate::error::Result;
use crate::fetch::Fetcher;
use crate::parser::translit::Transliterator;

/// Link patterns of the archived listing pages for one site.
pub struct Listing {
    snapshot: String,
    site: String,
    page_re: Regex,
    note_re: Regex,
}

/// What one listing page links to.
#[derive(Debug, Default, PartialEq)]
pub struct ListingScan {
    pub pages: Vec<u32>,
    pub notes: Vec<String>,
}

impl Listing {
    pub fn new(snapshot: &str, site: &str) -> Self {
        let host = regex::escape(site);
        let page_re = Regex::new(&format!(
            r"https://web\.archive\.org/web/\d+/http://{host}/page/(\d+)"
        ))
        .expect("escaped host always forms a valid pattern");
        let note_re = Regex::new(&format!(
            r#"https://web\.archive\.org/web/\d+/http://{host}/\d+/\d+/\d+/[^"/]+"#
        ))
        .expect("escaped host always forms a valid pattern");

        Listing {
            snapshot: snapshot.to_string(),
            site: site.to_string(),
            page_re,
            note_re,
        }
    }

    pub fn page_url(&self, n: u32) -> String {
        format!(
            "https://web.archive.org/web/{}/http://{}/page/{}",
            self.snapshot, self.site, n
        )
    }

    pub fn scan(&self, html: &str) -> ListingScan {
        let pages = self
            .page_re
            .captures_iter(html)
            .filter_map(|c| c[1].parse().ok())
            .collect();
        let notes = self
            .note_re
            .find_iter(html)
            .map(|m| m.as_str().to_string())
            .collect();
        ListingScan { pages, notes }
    }

    /// Walk every listing page reachable from `start_url` and collect note URLs.
    ///
    /// The start page counts as page 1. Pages are visited in discovery order,
    /// each once; notes keep their first-seen order.
    pub fn note_links(&self, fetcher: &Fetcher, start_url: &str) -> Result<Vec<String>> {
        let mut pages = vec![(1u32, true)];
        let mut known_pages: HashSet<u32> = HashSet::from([1]);
        let mut notes = Vec::new();
        let mut seen_notes = HashSet::new();
        let mut url = Some(start_url.to_string());

        while let Some(current) = url.take() {
            let html = fetcher.fetch_text(&current)?;
            let scan = self.scan(&html);

            for n in scan.pages {
                if known_pages.insert(n) {
                    pages.push((n, false));
                }
            }
            for note in scan.notes {
                if seen_notes.insert(note.clone()) {
                    notes.push(note);
                }
            }

            if let Some(next) = pages.iter_mut().find(|(_, visited)| !visited) {
                next.1 = true;
                url = Some(self.page_url(next.0));
            }
        }

        info!("Received {} urls.", notes.len());
        Ok(notes)
    }
}

/// Alias of a note on the new platform: its permalink slug, transliterated.
pub fn note_alias(note_url: &str, translit: &Transliterator) -> String {
    let slug = note_url.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let decoded = urlencoding::decode(slug)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| slug.to_string());
    translit.slug(&decoded)
}

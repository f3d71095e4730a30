mod cache;
mod error;
mod fetch;
mod listing;
mod parser;
mod pictures;
mod settings;
mod sql;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use cache::Cache;
use fetch::Fetcher;
use listing::Listing;
use parser::archive::ArchiveSite;
use parser::translit::Transliterator;
use parser::NoteParser;
use pictures::{AvatarStore, PictureStore};
use settings::Settings;
use sql::SqlDump;

const NOTE_LINKS_KEY: &str = "note_links";

#[derive(Parser)]
#[command(name = "glazelki_migrate", about = "Migrate the archived glazelki.ru blog to e2 SQL dumps")]
struct Cli {
    /// Where dump.sql, dump2.sql and dump3.sql are written
    #[arg(long, global = true)]
    out_dir: Option<PathBuf>,
    /// Fetch cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover note URLs on the archived listing pages
    Links,
    /// Parse a single archived note and print it as JSON
    Note {
        /// Archived note URL
        url: String,
    },
    /// Full migration: notes, tags, comments, pictures and avatars
    Run {
        /// Max notes to migrate (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(dir) = cli.out_dir {
        settings.out_dir = dir;
    }
    if let Some(dir) = cli.cache_dir {
        settings.cache_dir = dir;
    }

    let fetcher = Fetcher::new(Duration::from_secs(settings.timeout_secs))?;
    let cache = Cache::open(&settings.cache_dir)
        .with_context(|| format!("Failed to open cache {:?}", settings.cache_dir))?;

    let result = match cli.command {
        Commands::Links => {
            let links = note_links(&settings, &fetcher, &cache)?;
            for url in &links {
                println!("{}", url);
            }
            println!("Found {} notes.", links.len());
            Ok(())
        }
        Commands::Note { url } => {
            let site = ArchiveSite::new(&settings.site);
            let translit = Transliterator::new();
            let pictures = PictureStore::open(&settings.pictures_dir, &fetcher)?;
            let parser = NoteParser::new(&site, &translit, &pictures, settings.tz()?);

            let html = note_page(&fetcher, &cache, &url)?;
            let note = parser.parse(&html).with_context(|| format!("Failed to parse {}", url))?;
            println!("{}", serde_json::to_string_pretty(&note)?);
            Ok(())
        }
        Commands::Run { limit } => {
            let mut links = note_links(&settings, &fetcher, &cache)?;
            if let Some(n) = limit {
                links.truncate(n);
            }
            if links.is_empty() {
                println!("No notes found on the archived listing.");
                return Ok(());
            }
            println!("Migrating {} notes...", links.len());
            let counts = migrate(&settings, &fetcher, &cache, &links)?;
            counts.print(&settings.out_dir);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn note_links(settings: &Settings, fetcher: &Fetcher, cache: &Cache) -> anyhow::Result<Vec<String>> {
    let listing = Listing::new(&settings.snapshot, &settings.site);
    let start = settings.start_url();
    cache
        .cached_or_compute(NOTE_LINKS_KEY, || listing.note_links(fetcher, &start))
        .context("Failed to collect note links")
}

fn note_page(fetcher: &Fetcher, cache: &Cache, url: &str) -> anyhow::Result<String> {
    cache
        .cached_or_compute(&cache::note_key(url), || fetcher.fetch_text(url))
        .with_context(|| format!("Failed to get note {}", url))
}

struct RunCounts {
    notes: usize,
    tags: usize,
    comments: usize,
    pictures: usize,
}

impl RunCounts {
    fn print(&self, out_dir: &std::path::Path) {
        println!(
            "Wrote {} notes, {} tag links, {} comments, {} pictures to {}.",
            self.notes,
            self.tags,
            self.comments,
            self.pictures,
            out_dir.display(),
        );
    }
}

fn migrate(settings: &Settings, fetcher: &Fetcher, cache: &Cache, links: &[String]) -> anyhow::Result<RunCounts> {
    let site = ArchiveSite::new(&settings.site);
    let translit = Transliterator::new();
    let pictures = PictureStore::open(&settings.pictures_dir, fetcher)?;
    let avatars = AvatarStore::open(&settings.avatars_dir, fetcher)?;
    let parser = NoteParser::new(&site, &translit, &pictures, settings.tz()?);
    let mut dump = SqlDump::create(&settings.out_dir)?;

    let pb = ProgressBar::new(links.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut counts = RunCounts {
        notes: 0,
        tags: 0,
        comments: 0,
        pictures: 0,
    };

    for url in links {
        let html = note_page(fetcher, cache, url)?;
        let note = parser.parse(&html).with_context(|| format!("Failed to parse {}", url))?;

        for comment in &note.comments {
            if let (Some(src), Some(name)) = (&comment.avatar_url, &comment.avatar_name) {
                avatars.fetch_if_absent(src, name);
            }
        }

        let alias = listing::note_alias(url, &translit);
        dump.write_note(&note, &alias)
            .with_context(|| format!("Failed to write {}", url))?;

        info!("Migrated {:?} ({} comments)", note.title, note.comments.len());
        counts.notes += 1;
        counts.tags += note.tags.len();
        counts.comments += note.comments.len();
        counts.pictures += note.image_refs.len();
        pb.inc(1);
    }

    pb.finish_and_clear();
    dump.finish()?;
    Ok(counts)
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

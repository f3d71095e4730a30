use thiserror::Error;

/// Structural failures that abort the migration.
///
/// Media problems (pictures, avatars) never surface here; they are logged and
/// the run continues without the file.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("malformed link: {href}")]
    MalformedLink { href: String },

    #[error("unrecognized internal link shape: {path}")]
    UnrecognizedLinkShape { path: String },

    #[error("malformed image tag: {tag}")]
    MalformedImageTag { tag: String },

    #[error("malformed comment: {0}")]
    MalformedComment(String),

    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cache entry {key} is unreadable: {source}")]
    Cache {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MigrateError>;

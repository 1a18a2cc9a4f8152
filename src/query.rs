//! Read side: resolve a requested source and hand back its persisted cache.

use crate::config::Config;
use crate::merge::SourceCache;
use crate::store::{CacheStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid source: {0}")]
    UnknownSource(String),
    #[error("No source requested and no default source configured")]
    NoDefaultSource,
    #[error("No cache found for {0}")]
    NotPopulated(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Picks the requested source key, or the configured default when none was
/// given, and checks it against the configuration.
pub fn resolve_source<'a>(config: &'a Config, requested: Option<&'a str>) -> Result<&'a str, QueryError> {
    let key = match requested {
        Some(key) => key,
        None => config
            .default_source_key()
            .ok_or(QueryError::NoDefaultSource)?,
    };

    if config.source(key).is_none() {
        return Err(QueryError::UnknownSource(key.to_string()));
    }
    Ok(key)
}

/// Loads the source's cache through the store's locked read path.
/// A configured source that has never completed a cycle is `NotPopulated`.
pub async fn query_source(
    config: &Config,
    store: &CacheStore,
    requested: Option<&str>,
) -> Result<(String, SourceCache), QueryError> {
    let key = resolve_source(config, requested)?;
    let cache = store
        .load_existing(key)
        .await?
        .ok_or_else(|| QueryError::NotPopulated(key.to_string()))?;
    Ok((key.to_string(), cache))
}

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SourceConfig;
use crate::normalize::{normalize_entries, RawEntry};
use crate::store::CacheStore;

/// What one successful cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub dropped: usize,
    pub added: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStatus {
    pub last_fetched: Option<String>,
    pub last_error: Option<String>,
    pub cycles: u64,
    pub failures: u64,
    /// Entries discarded for unparseable dates, across all cycles.
    pub dropped_entries: u64,
    pub last_added: usize,
}

pub struct Fetcher {
    client: Client,
    store: Arc<CacheStore>,
    status: RwLock<HashMap<String, SourceStatus>>,
}

impl Fetcher {
    pub fn new(store: Arc<CacheStore>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("FeedCache/1.0 (RSS Cache)")
            .build()?;

        Ok(Self {
            client,
            store,
            status: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub async fn statuses(&self) -> BTreeMap<String, SourceStatus> {
        self.status
            .read()
            .await
            .iter()
            .map(|(key, status)| (key.clone(), status.clone()))
            .collect()
    }

    /// Runs one cycle and records its outcome. Failures end here.
    pub async fn run_cycle(&self, key: &str, source: &SourceConfig) -> Option<CycleReport> {
        let result = self.refresh_source(key, source).await;
        let now = Utc::now().to_rfc3339();

        let mut status = self.status.write().await;
        let entry = status.entry(key.to_string()).or_default();
        entry.cycles += 1;
        entry.last_fetched = Some(now);

        match result {
            Ok(report) => {
                entry.last_error = None;
                entry.dropped_entries += report.dropped as u64;
                entry.last_added = report.added;
                Some(report)
            }
            Err(e) => {
                error!("Error refreshing source '{}': {:#}", key, e);
                entry.failures += 1;
                entry.last_error = Some(format!("{:#}", e));
                None
            }
        }
    }

    /// Fetch, normalize, merge and persist one source, once.
    pub async fn refresh_source(&self, key: &str, source: &SourceConfig) -> anyhow::Result<CycleReport> {
        info!("Fetching from {} ({})", key, source.url);

        let entries = self.fetch_entries(&source.url).await?;
        let batch = normalize_entries(&entries);
        if batch.dropped > 0 {
            warn!(
                "Dropped {} of {} entries from '{}' with unparseable dates",
                batch.dropped,
                entries.len(),
                key
            );
        }

        let dropped = batch.dropped;
        let outcome = self
            .store
            .update(key, |cache| cache.merge(batch.articles))
            .await?;

        info!(
            "Updated {}: {} new, {} already cached",
            key, outcome.added, outcome.duplicates
        );

        Ok(CycleReport {
            fetched: entries.len(),
            dropped,
            added: outcome.added,
            duplicates: outcome.duplicates,
        })
    }

    pub async fn fetch_entries(&self, url: &str) -> anyhow::Result<Vec<RawEntry>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Self::parse_entries(&bytes)
    }

    /// Parse a feed document into raw entries, keeping each item's original
    /// date string where the XML has one.
    pub fn parse_entries(bytes: &[u8]) -> anyhow::Result<Vec<RawEntry>> {
        // feed_rs only exposes parsed dates, so the verbatim ones come from the XML
        let raw_dates = Self::extract_pub_dates_from_xml(bytes);

        let parsed = parser::parse(bytes)?;

        let entries = parsed
            .entries
            .into_iter()
            .map(|entry| {
                let title = entry
                    .title
                    .as_ref()
                    .map(|t| t.content.clone())
                    .unwrap_or_default();

                let link = entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .unwrap_or_default();

                let description = entry
                    .summary
                    .as_ref()
                    .map(|s| s.content.clone())
                    .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
                    .unwrap_or_default();

                let published = raw_dates.get(&link).cloned().or_else(|| {
                    entry
                        .published
                        .or(entry.updated)
                        .map(|dt: DateTime<Utc>| dt.to_rfc2822())
                });

                RawEntry {
                    title,
                    link,
                    description,
                    published,
                }
            })
            .collect();

        Ok(entries)
    }

    /// Map item link, entity-decoded, to the item's `<pubDate>` text.
    pub fn extract_pub_dates_from_xml(xml_bytes: &[u8]) -> HashMap<String, String> {
        let mut dates = HashMap::new();
        let xml_str = match std::str::from_utf8(xml_bytes) {
            Ok(s) => s,
            Err(_) => return dates,
        };

        for item_block in xml_str.split("<item>").skip(1) {
            let item_end = item_block.find("</item>").unwrap_or(item_block.len());
            let item = &item_block[..item_end];

            // feed_rs hands back decoded hrefs, so the key must match them
            let link = Self::extract_xml_element(item, "link")
                .map(|link| html_escape::decode_html_entities(&link).into_owned());
            let pub_date = Self::extract_xml_element(item, "pubDate");

            if let (Some(link), Some(pub_date)) = (link, pub_date) {
                dates.insert(link, pub_date);
            }
        }

        dates
    }

    pub fn extract_xml_element(xml: &str, tag: &str) -> Option<String> {
        let start_tag = format!("<{}>", tag);
        let end_tag = format!("</{}>", tag);

        let start = xml.find(&start_tag)? + start_tag.len();
        let end = xml[start..].find(&end_tag)? + start;

        let text = xml[start..end].trim();
        let text = text
            .strip_prefix("<![CDATA[")
            .and_then(|t| t.strip_suffix("]]>"))
            .unwrap_or(text);

        Some(text.trim().to_string())
    }
}

/// Spawn one refresh loop per source. Each loop runs a cycle immediately,
/// then every `interval`, until `cancel` fires.
pub fn start_background_refresh(
    fetcher: Arc<Fetcher>,
    sources: &BTreeMap<String, SourceConfig>,
    interval: Duration,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    info!("Starting refresh loops for {} sources", sources.len());

    sources
        .iter()
        .map(|(key, source)| {
            let fetcher = fetcher.clone();
            let key = key.clone();
            let source = source.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_source_loop(fetcher, key, source, interval, cancel).await;
            })
        })
        .collect()
}

pub async fn run_source_loop(
    fetcher: Arc<Fetcher>,
    key: String,
    source: SourceConfig,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = fetcher.run_cycle(&key, &source) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Refresh loop for '{}' stopped", key);
}

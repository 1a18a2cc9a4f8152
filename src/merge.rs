use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::normalize::Article;

/// Persisted state of one source: articles bucketed by publish date.
///
/// `sorted_dates` always lists exactly the keys of `articles`, newest first.
/// Within a bucket articles are ordered by `pub_date` descending and titles
/// are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCache {
    #[serde(default)]
    pub articles: BTreeMap<String, Vec<Article>>,
    #[serde(default)]
    pub sorted_dates: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub duplicates: usize,
}

impl SourceCache {
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn article_count(&self) -> usize {
        self.articles.values().map(Vec::len).sum()
    }

    /// Merges a freshly normalized batch.
    ///
    /// Articles whose title already exists in their date bucket are skipped;
    /// the first one seen is kept. Every touched bucket is re-sorted newest
    /// first with a stable sort, so equal timestamps keep insertion order.
    pub fn merge(&mut self, batch: Vec<Article>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for (date, items) in group_by_date(batch) {
            let bucket = self.articles.entry(date).or_default();
            let mut titles: HashSet<String> = bucket.iter().map(|a| a.title.clone()).collect();

            for item in items {
                if titles.insert(item.title.clone()) {
                    bucket.push(item);
                    outcome.added += 1;
                } else {
                    outcome.duplicates += 1;
                }
            }

            bucket.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        }

        self.refresh_sorted_dates();
        outcome
    }

    /// Rebuilds `sorted_dates` from the bucket keys.
    pub fn refresh_sorted_dates(&mut self) {
        self.sorted_dates = self.articles.keys().rev().cloned().collect();
    }

    /// Checks every ordering and uniqueness guarantee of the cache.
    pub fn is_consistent(&self) -> bool {
        let dates_match = self
            .sorted_dates
            .iter()
            .eq(self.articles.keys().rev());

        dates_match
            && self.articles.iter().all(|(date, bucket)| {
                let mut titles = HashSet::new();
                bucket.iter().all(|a| a.date_key() == date.as_str() && titles.insert(&a.title))
                    && bucket.windows(2).all(|w| w[0].pub_date >= w[1].pub_date)
            })
    }
}

/// Groups articles by date key, keeping their relative order.
pub fn group_by_date(articles: Vec<Article>) -> BTreeMap<String, Vec<Article>> {
    let mut buckets: BTreeMap<String, Vec<Article>> = BTreeMap::new();
    for article in articles {
        buckets
            .entry(article.date_key().to_string())
            .or_default()
            .push(article);
    }
    buckets
}

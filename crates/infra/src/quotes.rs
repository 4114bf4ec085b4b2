//! In-process history of fetched quotes, used to price events at the time
//! they happened.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use keepsats_accounting::{Quote, nearest_quote};

use crate::external::{ExternalError, QuoteSource};

const DEFAULT_CAPACITY: usize = 4_096;

#[derive(Debug)]
pub struct QuoteHistory {
    quotes: RwLock<Vec<Quote>>,
    capacity: usize,
}

impl Default for QuoteHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl QuoteHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` quotes; the oldest are dropped first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            quotes: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, quote: Quote) {
        let mut quotes = match self.quotes.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let at = quotes.partition_point(|q| q.fetched_at <= quote.fetched_at);
        quotes.insert(at, quote);
        let excess = quotes.len().saturating_sub(self.capacity);
        if excess > 0 {
            quotes.drain(..excess);
        }
    }

    /// The quote to price something that happened at `at`.
    pub fn nearest(&self, at: DateTime<Utc>, window: Duration) -> Option<Quote> {
        let quotes = match self.quotes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        nearest_quote(&quotes, at, window).cloned()
    }

    pub fn latest(&self) -> Option<Quote> {
        let quotes = match self.quotes.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        quotes.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.quotes.read().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch from `source` and record the blended quote.
    pub async fn refresh(&self, source: &dyn QuoteSource) -> Result<Quote, ExternalError> {
        match source.get_all_quotes().await {
            Ok(response) => {
                debug!(
                    source = %response.global.source,
                    feeds = response.sources.len(),
                    "quote refreshed"
                );
                self.record(response.global.clone());
                Ok(response.global)
            }
            Err(e) => {
                warn!(error = %e, "quote refresh failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::quote_at;
    use async_trait::async_trait;
    use keepsats_accounting::QuoteResponse;

    #[test]
    fn nearest_prefers_recent_quote_in_window() {
        let history = QuoteHistory::new();
        history.record(quote_at(100));
        history.record(quote_at(50));
        history.record(quote_at(300));
        let at = quote_at(120).fetched_at;
        let got = history.nearest(at, Duration::seconds(60)).unwrap();
        assert_eq!(got.fetched_at, quote_at(100).fetched_at);
        assert_eq!(history.latest().unwrap().fetched_at, quote_at(300).fetched_at);
    }

    #[test]
    fn capacity_drops_oldest() {
        let history = QuoteHistory::with_capacity(2);
        for t in [10, 20, 30] {
            history.record(quote_at(t));
        }
        assert_eq!(history.len(), 2);
        let oldest = history.nearest(quote_at(0).fetched_at, Duration::seconds(1)).unwrap();
        assert_eq!(oldest.fetched_at, quote_at(20).fetched_at);
    }

    struct Fixed;

    #[async_trait]
    impl QuoteSource for Fixed {
        async fn get_all_quotes(&self) -> Result<QuoteResponse, ExternalError> {
            Ok(QuoteResponse {
                global: quote_at(5),
                sources: vec![quote_at(5)],
            })
        }
    }

    #[tokio::test]
    async fn refresh_records_global_quote() {
        let history = QuoteHistory::new();
        assert!(history.is_empty());
        history.refresh(&Fixed).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}

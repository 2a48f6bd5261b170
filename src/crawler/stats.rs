//! Crawl statistics
//!
//! Workers update a shared [`CrawlStats`] through atomic counters; the
//! orchestrator turns it into a [`CrawlSummary`] once every pool is drained.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by all workers of one run
#[derive(Debug, Default)]
pub struct CrawlStats {
    locations: AtomicU64,
    pages_attempted: AtomicU64,
    pages_failed: AtomicU64,
    listings_persisted: AtomicU64,
    workers_panicked: AtomicU64,
}

impl CrawlStats {
    pub fn record_location(&self) {
        self.locations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page(&self) {
        self.pages_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_page(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listings(&self, count: usize) {
        self.listings_persisted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.workers_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of the counters
    pub fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            locations: self.locations.load(Ordering::Relaxed),
            pages_attempted: self.pages_attempted.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            listings_persisted: self.listings_persisted.load(Ordering::Relaxed),
            workers_panicked: self.workers_panicked.load(Ordering::Relaxed),
        }
    }
}

/// Totals of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Locations processed, counted once per category
    pub locations: u64,
    pub pages_attempted: u64,
    pub pages_failed: u64,
    pub listings_persisted: u64,
    pub workers_panicked: u64,
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} locations, {} pages ({} failed), {} listings persisted",
            self.locations, self.pages_attempted, self.pages_failed, self.listings_persisted
        )?;
        if self.workers_panicked > 0 {
            write!(f, ", {} workers panicked", self.workers_panicked)?;
        }
        Ok(())
    }
}

//! Lazy, single-pass iteration over engine cursors.

use crate::{Error, Result, types::Variant};
use std::time::{Duration, Instant};

/// Raw, engine-encoded records produced by a storage scan.
pub trait RawCursor: Send {
    fn has_next(&mut self) -> bool;

    fn next_row(&mut self) -> Result<Vec<u8>>;

    /// Release the scan. Called at most once by [`VariantResultIterator`].
    fn close(&mut self);
}

/// Decodes one raw row into the domain representation.
pub trait RowConverter: Send + Sync {
    fn convert(&self, row: &[u8]) -> Result<Variant>;
}

/// Rows encoded as JSON documents.
pub struct JsonRowConverter;

impl RowConverter for JsonRowConverter {
    fn convert(&self, row: &[u8]) -> Result<Variant> {
        Ok(serde_json::from_slice(row)?)
    }
}

/// Resource released together with an iterator.
pub trait Closeable: Send {
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    Open,
    Streaming,
    Closed,
}

/// Forward-only stream of variants decoded from a [`RawCursor`].
///
/// Yields at most `limit` records. Closing releases the cursor and every
/// attached [`Closeable`] exactly once; dropping an unclosed iterator closes it.
pub struct VariantResultIterator {
    cursor: Box<dyn RawCursor>,
    converter: Box<dyn RowConverter>,
    closeables: Vec<Box<dyn Closeable>>,
    limit: u64,
    count: u64,
    state: IteratorState,
    time_fetching: Duration,
    time_converting: Duration,
}

impl VariantResultIterator {
    /// A non-positive `limit` means unbounded.
    pub fn new(
        cursor: Box<dyn RawCursor>,
        converter: Box<dyn RowConverter>,
        limit: Option<i64>,
    ) -> Self {
        Self {
            cursor,
            converter,
            closeables: Vec::new(),
            limit: normalize_limit(limit),
            count: 0,
            state: IteratorState::Open,
            time_fetching: Duration::ZERO,
            time_converting: Duration::ZERO,
        }
    }

    pub fn add_closeable(&mut self, closeable: Box<dyn Closeable>) {
        self.closeables.push(closeable);
    }

    pub fn has_next(&mut self) -> bool {
        self.state != IteratorState::Closed && self.count < self.limit && self.cursor.has_next()
    }

    pub fn next_variant(&mut self) -> Result<Variant> {
        if self.state == IteratorState::Closed {
            return Err(Error::Exhausted("iterator is closed".to_string()));
        }
        if self.count >= self.limit {
            return Err(Error::Exhausted(format!("limit {} reached", self.limit)));
        }
        if !self.cursor.has_next() {
            return Err(Error::Exhausted("no more rows".to_string()));
        }
        self.state = IteratorState::Streaming;
        self.count += 1;

        let start = Instant::now();
        let row = self.cursor.next_row()?;
        self.time_fetching += start.elapsed();

        let start = Instant::now();
        let variant = self.converter.convert(&row)?;
        self.time_converting += start.elapsed();

        Ok(variant)
    }

    pub fn close(&mut self) -> Result<()> {
        if self.state == IteratorState::Closed {
            return Ok(());
        }
        self.state = IteratorState::Closed;
        tracing::debug!(
            "close variant iterator after {} variants. Fetch = {:?}, Convert = {:?}",
            self.count,
            self.time_fetching,
            self.time_converting
        );
        self.cursor.close();

        let mut first_error = None;
        for closeable in self.closeables.iter_mut() {
            if let Err(e) = closeable.close() {
                tracing::warn!("failed to close iterator resource: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Variants handed out so far.
    pub fn num_emitted(&self) -> u64 {
        self.count
    }

    pub fn time_fetching(&self) -> Duration {
        self.time_fetching
    }

    pub fn time_converting(&self) -> Duration {
        self.time_converting
    }
}

fn normalize_limit(limit: Option<i64>) -> u64 {
    match limit {
        Some(l) if l > 0 => l as u64,
        _ => u64::MAX,
    }
}

impl Iterator for VariantResultIterator {
    type Item = Result<Variant>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.has_next() {
            Some(self.next_variant())
        } else {
            None
        }
    }
}

impl Drop for VariantResultIterator {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("error closing dropped variant iterator: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cursor over in-memory rows that counts how often it was closed.
    struct CountingCursor {
        rows: std::vec::IntoIter<Vec<u8>>,
        closes: Arc<AtomicUsize>,
        fetched: Arc<AtomicUsize>,
    }

    impl CountingCursor {
        fn new(n: u64, closes: Arc<AtomicUsize>) -> Self {
            let rows: Vec<Vec<u8>> = (1..=n)
                .map(|i| serde_json::to_vec(&Variant::new("1", i * 100, "A", "C")).unwrap())
                .collect();
            Self {
                rows: rows.into_iter(),
                closes,
                fetched: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn fetched(&self) -> Arc<AtomicUsize> {
            self.fetched.clone()
        }
    }

    impl RawCursor for CountingCursor {
        fn has_next(&mut self) -> bool {
            self.rows.len() > 0
        }

        fn next_row(&mut self) -> Result<Vec<u8>> {
            self.fetched.fetch_add(1, Ordering::SeqCst);
            self.rows
                .next()
                .ok_or_else(|| Error::Exhausted("cursor".to_string()))
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingCloseable(Arc<AtomicUsize>);

    impl Closeable for CountingCloseable {
        fn close(&mut self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_limit_bounds_output() {
        let closes = Arc::new(AtomicUsize::new(0));
        let cursor = CountingCursor::new(10, closes.clone());
        let fetched = cursor.fetched();
        let mut it = VariantResultIterator::new(Box::new(cursor), Box::new(JsonRowConverter), Some(3));

        let mut seen = Vec::new();
        while it.has_next() {
            seen.push(it.next_variant().unwrap());
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].start, 300);
        assert!(!it.has_next());
        assert_eq!(10 - fetched.load(Ordering::SeqCst), 7);
        assert!(matches!(it.next_variant(), Err(Error::Exhausted(_))));

        it.close().unwrap();
        it.close().unwrap();
        drop(it);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_non_positive_limit_is_unbounded() {
        let closes = Arc::new(AtomicUsize::new(0));
        let it = VariantResultIterator::new(
            Box::new(CountingCursor::new(10, closes.clone())),
            Box::new(JsonRowConverter),
            Some(0),
        );
        assert_eq!(it.limit(), u64::MAX);
        let all: Vec<_> = it.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let it = VariantResultIterator::new(
            Box::new(CountingCursor::new(1, closes.clone())),
            Box::new(JsonRowConverter),
            Some(-5),
        );
        assert_eq!(it.limit(), u64::MAX);
    }

    #[test]
    fn test_state_transitions_and_closeables() {
        let closes = Arc::new(AtomicUsize::new(0));
        let extra = Arc::new(AtomicUsize::new(0));
        let mut it = VariantResultIterator::new(
            Box::new(CountingCursor::new(2, closes.clone())),
            Box::new(JsonRowConverter),
            None,
        );
        it.add_closeable(Box::new(CountingCloseable(extra.clone())));
        assert_eq!(it.state(), IteratorState::Open);
        it.next_variant().unwrap();
        assert_eq!(it.state(), IteratorState::Streaming);
        assert_eq!(it.num_emitted(), 1);

        it.close().unwrap();
        assert_eq!(it.state(), IteratorState::Closed);
        assert!(!it.has_next());
        assert!(matches!(it.next_variant(), Err(Error::Exhausted(_))));
        it.close().unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(extra.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let mut it = VariantResultIterator::new(
                Box::new(CountingCursor::new(5, closes.clone())),
                Box::new(JsonRowConverter),
                None,
            );
            it.next_variant().unwrap();
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}

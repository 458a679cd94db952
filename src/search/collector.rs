//! Collectors: top-K selection and its composable wrappers.
//!
//! The base collector keeps a bounded min-heap of scored documents. Once
//! the heap is full its minimum is the pruning threshold the driver feeds
//! back into the matchers as a block-quality bound. Filtering, masking and
//! time limits compose as wrappers around an inner collector.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::Debug;
use std::time::{Duration, Instant};

use ahash::AHashSet;

use crate::document::FieldValue;
use crate::error::{QuillError, Result};

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Synthetic global doc id (segment base + local id).
    pub doc_id: u64,
    /// Score of the hit.
    pub score: f32,
}

/// The outcome of a search.
#[derive(Debug, Clone, Default)]
pub struct TopDocs {
    /// Ranked hits, best first.
    pub hits: Vec<SearchHit>,
    /// Number of matching documents seen.
    pub total_hits: u64,
    /// Whether a time limit cut the search short; the hits are the valid
    /// partial result.
    pub timed_out: bool,
}

/// Trait for collecting scored documents.
///
/// Doc ids arrive in increasing global order within a search.
pub trait Collector: Send + Debug {
    /// Offer one scored document.
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()>;

    /// Current pruning threshold: the score a new hit must beat to enter
    /// the results. `None` until the collector has filled up.
    fn threshold(&self) -> Option<f32>;

    /// Whether the driver may skip blocks via quality bounds.
    fn allows_pruning(&self) -> bool {
        true
    }

    /// Finish and return the ranked results.
    fn into_top_docs(self: Box<Self>) -> TopDocs;
}

/// Heap entry ordered worst-hit-first.
///
/// Equal scores tie-break by doc id: the lower doc id ranks better, so the
/// higher one sits nearer the top of this reversed heap.
#[derive(Debug, Clone)]
struct HeapHit {
    doc_id: u64,
    score: f32,
}

impl PartialEq for HeapHit {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.doc_id == other.doc_id
    }
}

impl Eq for HeapHit {}

impl PartialOrd for HeapHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapHit {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; make the worst hit the maximum
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.doc_id.cmp(&other.doc_id))
    }
}

/// Keeps the best K hits by score.
#[derive(Debug)]
pub struct TopKCollector {
    limit: usize,
    heap: BinaryHeap<HeapHit>,
    total_hits: u64,
}

impl TopKCollector {
    /// Collect the best `limit` hits.
    pub fn new(limit: usize) -> Self {
        TopKCollector {
            limit,
            heap: BinaryHeap::with_capacity(limit + 1),
            total_hits: 0,
        }
    }

    fn worst(&self) -> Option<&HeapHit> {
        self.heap.peek()
    }
}

impl Collector for TopKCollector {
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        self.total_hits += 1;
        if self.limit == 0 {
            return Ok(());
        }
        if self.heap.len() < self.limit {
            self.heap.push(HeapHit { doc_id, score });
            return Ok(());
        }
        // Strictly-greater competitiveness: docs arrive in increasing doc
        // order, so on equal scores the earliest (lowest) doc id stays in
        // the heap. This keeps block-quality pruning exact: a block bounded
        // at the threshold can never hold a competitive posting.
        let worst = self.worst().expect("heap is full");
        if score > worst.score {
            self.heap.pop();
            self.heap.push(HeapHit { doc_id, score });
        }
        Ok(())
    }

    fn threshold(&self) -> Option<f32> {
        if self.heap.len() >= self.limit && self.limit > 0 {
            self.worst().map(|hit| hit.score)
        } else {
            None
        }
    }

    fn into_top_docs(self: Box<Self>) -> TopDocs {
        let mut hits: Vec<SearchHit> = self
            .heap
            .into_iter()
            .map(|hit| SearchHit {
                doc_id: hit.doc_id,
                score: hit.score,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        TopDocs {
            hits,
            total_hits: self.total_hits,
            timed_out: false,
        }
    }
}

/// Passes through only documents in the allowed set.
#[derive(Debug)]
pub struct FilterCollector {
    inner: Box<dyn Collector>,
    allowed: AHashSet<u64>,
}

impl FilterCollector {
    /// Restrict `inner` to the allowed doc ids.
    pub fn new(inner: Box<dyn Collector>, allowed: AHashSet<u64>) -> Self {
        FilterCollector { inner, allowed }
    }
}

impl Collector for FilterCollector {
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        if self.allowed.contains(&doc_id) {
            self.inner.collect(doc_id, score)?;
        }
        Ok(())
    }

    fn threshold(&self) -> Option<f32> {
        self.inner.threshold()
    }

    fn allows_pruning(&self) -> bool {
        self.inner.allows_pruning()
    }

    fn into_top_docs(self: Box<Self>) -> TopDocs {
        self.inner.into_top_docs()
    }
}

/// Drops documents in the masked set.
#[derive(Debug)]
pub struct MaskCollector {
    inner: Box<dyn Collector>,
    masked: AHashSet<u64>,
}

impl MaskCollector {
    /// Subtract the masked doc ids from `inner`.
    pub fn new(inner: Box<dyn Collector>, masked: AHashSet<u64>) -> Self {
        MaskCollector { inner, masked }
    }
}

impl Collector for MaskCollector {
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        if !self.masked.contains(&doc_id) {
            self.inner.collect(doc_id, score)?;
        }
        Ok(())
    }

    fn threshold(&self) -> Option<f32> {
        self.inner.threshold()
    }

    fn allows_pruning(&self) -> bool {
        self.inner.allows_pruning()
    }

    fn into_top_docs(self: Box<Self>) -> TopDocs {
        self.inner.into_top_docs()
    }
}

/// Enforces a soft deadline, polled every `check_interval` postings.
///
/// On expiry, raises [`QuillError::TimeLimit`]; the driver catches it and
/// surfaces the partial heap with `timed_out` set.
#[derive(Debug)]
pub struct TimeLimitCollector {
    inner: Box<dyn Collector>,
    deadline: Instant,
    check_interval: u32,
    since_check: u32,
}

impl TimeLimitCollector {
    /// Limit `inner` to `budget` from now.
    pub fn new(inner: Box<dyn Collector>, budget: Duration, check_interval: u32) -> Self {
        TimeLimitCollector {
            inner,
            deadline: Instant::now() + budget,
            check_interval: check_interval.max(1),
            since_check: 0,
        }
    }
}

impl Collector for TimeLimitCollector {
    fn collect(&mut self, doc_id: u64, score: f32) -> Result<()> {
        self.since_check += 1;
        if self.since_check >= self.check_interval {
            self.since_check = 0;
            if Instant::now() >= self.deadline {
                return Err(QuillError::time_limit(format!(
                    "search exceeded its budget at doc {doc_id}"
                )));
            }
        }
        self.inner.collect(doc_id, score)
    }

    fn threshold(&self) -> Option<f32> {
        self.inner.threshold()
    }

    fn allows_pruning(&self) -> bool {
        self.inner.allows_pruning()
    }

    fn into_top_docs(self: Box<Self>) -> TopDocs {
        self.inner.into_top_docs()
    }
}

/// Sort direction for field sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest field value first.
    Ascending,
    /// Largest field value first.
    Descending,
}

/// Keeps the K documents with the best column values instead of scores.
///
/// Score-based pruning is disabled in this mode: a low-scoring posting can
/// still carry a winning sort value. The driver feeds the field value
/// alongside the score.
#[derive(Debug)]
pub struct SortByFieldCollector {
    limit: usize,
    order: SortOrder,
    entries: Vec<(FieldValue, u64, f32)>,
    total_hits: u64,
}

impl SortByFieldCollector {
    /// Collect the best `limit` docs by field value.
    pub fn new(limit: usize, order: SortOrder) -> Self {
        SortByFieldCollector {
            limit,
            order,
            entries: Vec::new(),
            total_hits: 0,
        }
    }

    /// Offer a document with its sort value.
    pub fn collect_with_value(&mut self, doc_id: u64, score: f32, value: FieldValue) {
        self.total_hits += 1;
        self.entries.push((value, doc_id, score));
    }

    fn value_rank(value: &FieldValue) -> u8 {
        // Heterogeneous columns: order by type first, then within type
        match value {
            FieldValue::Null => 0,
            FieldValue::Bool(_) => 1,
            FieldValue::I64(_) => 2,
            FieldValue::F64(_) => 3,
            FieldValue::String(_) => 4,
            FieldValue::Bytes(_) => 5,
            FieldValue::List(_) => 6,
            FieldValue::Map(_) => 7,
        }
    }

    fn compare_values(a: &FieldValue, b: &FieldValue) -> Ordering {
        match (a, b) {
            (FieldValue::Bool(x), FieldValue::Bool(y)) => x.cmp(y),
            (FieldValue::I64(x), FieldValue::I64(y)) => x.cmp(y),
            (FieldValue::F64(x), FieldValue::F64(y)) => {
                x.partial_cmp(y).unwrap_or(Ordering::Equal)
            }
            (FieldValue::String(x), FieldValue::String(y)) => x.cmp(y),
            (FieldValue::Bytes(x), FieldValue::Bytes(y)) => x.cmp(y),
            _ => Self::value_rank(a).cmp(&Self::value_rank(b)),
        }
    }

    /// Finish and return the ranked results.
    pub fn into_top_docs(mut self) -> TopDocs {
        self.entries.sort_by(|a, b| {
            let ordering = Self::compare_values(&a.0, &b.0).then_with(|| a.1.cmp(&b.1));
            match self.order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });
        self.entries.truncate(self.limit);
        TopDocs {
            hits: self
                .entries
                .into_iter()
                .map(|(_, doc_id, score)| SearchHit { doc_id, score })
                .collect(),
            total_hits: self.total_hits,
            timed_out: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_keeps_best() {
        let mut collector = TopKCollector::new(2);
        collector.collect(0, 1.0).unwrap();
        collector.collect(1, 3.0).unwrap();
        collector.collect(2, 2.0).unwrap();
        collector.collect(3, 0.5).unwrap();

        let docs = Box::new(collector).into_top_docs();
        assert_eq!(docs.total_hits, 4);
        let pairs: Vec<(u64, f32)> = docs.hits.iter().map(|h| (h.doc_id, h.score)).collect();
        assert_eq!(pairs, vec![(1, 3.0), (2, 2.0)]);
    }

    #[test]
    fn test_threshold_appears_when_full() {
        let mut collector = TopKCollector::new(2);
        assert_eq!(collector.threshold(), None);
        collector.collect(0, 1.0).unwrap();
        assert_eq!(collector.threshold(), None);
        collector.collect(1, 3.0).unwrap();
        assert_eq!(collector.threshold(), Some(1.0));

        collector.collect(2, 2.0).unwrap();
        assert_eq!(collector.threshold(), Some(2.0));
    }

    #[test]
    fn test_equal_scores_keep_earliest_docs() {
        let mut collector = TopKCollector::new(2);
        collector.collect(5, 1.0).unwrap();
        collector.collect(9, 1.0).unwrap();
        // Docs arrive in increasing order; an equal score does not displace
        // an earlier doc, so lower doc ids win ties
        collector.collect(12, 1.0).unwrap();

        let docs = Box::new(collector).into_top_docs();
        let ids: Vec<u64> = docs.hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![5, 9]);

        // A strictly better score still displaces the worst tied doc
        collector = TopKCollector::new(2);
        collector.collect(5, 1.0).unwrap();
        collector.collect(9, 1.0).unwrap();
        collector.collect(12, 2.0).unwrap();
        let docs = Box::new(collector).into_top_docs();
        let ids: Vec<u64> = docs.hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![12, 5]);
    }

    #[test]
    fn test_filter_and_mask() {
        let allowed: AHashSet<u64> = [1, 2, 3].into_iter().collect();
        let mut collector = FilterCollector::new(Box::new(TopKCollector::new(10)), allowed);
        for doc in 0..5 {
            collector.collect(doc, 1.0).unwrap();
        }
        let docs = Box::new(collector).into_top_docs();
        assert_eq!(docs.hits.len(), 3);

        let masked: AHashSet<u64> = [1].into_iter().collect();
        let mut collector = MaskCollector::new(Box::new(TopKCollector::new(10)), masked);
        for doc in 0..3 {
            collector.collect(doc, 1.0).unwrap();
        }
        let docs = Box::new(collector).into_top_docs();
        let ids: Vec<u64> = docs.hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_time_limit_raises() {
        let mut collector = TimeLimitCollector::new(
            Box::new(TopKCollector::new(10)),
            Duration::from_millis(0),
            1,
        );
        // The deadline is already past; the first checked collect fails
        let result = collector.collect(0, 1.0);
        assert!(matches!(result, Err(QuillError::TimeLimit(_))));
    }

    #[test]
    fn test_time_limit_checks_periodically() {
        let mut collector = TimeLimitCollector::new(
            Box::new(TopKCollector::new(10)),
            Duration::from_millis(0),
            1000,
        );
        // Below the check interval nothing is polled yet
        for doc in 0..10 {
            collector.collect(doc, 1.0).unwrap();
        }
    }

    #[test]
    fn test_sort_by_field() {
        let mut collector = SortByFieldCollector::new(2, SortOrder::Ascending);
        collector.collect_with_value(0, 1.0, FieldValue::I64(30));
        collector.collect_with_value(1, 1.0, FieldValue::I64(10));
        collector.collect_with_value(2, 1.0, FieldValue::I64(20));

        let docs = collector.into_top_docs();
        let ids: Vec<u64> = docs.hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![1, 2]);

        let mut collector = SortByFieldCollector::new(2, SortOrder::Descending);
        collector.collect_with_value(0, 1.0, FieldValue::String("b".into()));
        collector.collect_with_value(1, 1.0, FieldValue::String("c".into()));
        collector.collect_with_value(2, 1.0, FieldValue::String("a".into()));

        let docs = collector.into_top_docs();
        let ids: Vec<u64> = docs.hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![1, 0]);
    }
}

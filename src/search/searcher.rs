//! The searcher: builds matcher trees from queries and drives collectors
//! over the index's segments.
//!
//! Segments are visited in the reader's stable (generation, id) order, each
//! offset into a synthetic global doc-id space. When the collector is full
//! and every matcher in the tree supports block quality, the driver skips
//! whole posting blocks that cannot beat the current threshold.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};

use crate::document::{Document, FieldValue};
use crate::error::{QuillError, Result};
use crate::index::dictionary::TermKey;
use crate::index::reader::{IndexReader, SegmentReader};
use crate::query::{Query, RangeBound};
use crate::search::collector::{
    Collector, FilterCollector, MaskCollector, SortByFieldCollector, SortOrder,
    TimeLimitCollector, TopDocs, TopKCollector,
};
use crate::search::matcher::{
    AllMatcher, AndNotMatcher, ConjunctionMatcher, ConstantScoreMatcher, DisjunctionMatcher,
    EmptyMatcher, Matcher, PhraseMatcher, TermMatcher,
};
use crate::search::scorer::{Bm25Similarity, Similarity, TermStatistics};

/// Default bound on multi-term expansion (wildcard, prefix, range).
pub const DEFAULT_EXPANSION_LIMIT: usize = 1024;

/// Default number of collected postings between deadline polls.
pub const DEFAULT_CHECK_INTERVAL: u32 = 64;

/// Sort-by-field request.
#[derive(Debug, Clone)]
pub struct SortBy {
    /// Stored field supplying the sort key.
    pub field: String,
    /// Sort direction.
    pub order: SortOrder,
}

/// Parameters of one search call.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Number of hits to return.
    pub limit: usize,

    /// Restrict hits to this global doc-id set.
    pub filter: Option<AHashSet<u64>>,

    /// Exclude hits in this global doc-id set.
    pub mask: Option<AHashSet<u64>>,

    /// Soft deadline; on expiry the partial results are returned with
    /// `timed_out` set.
    pub time_limit: Option<Duration>,

    /// Postings between deadline polls.
    pub check_interval: u32,

    /// Order results by a stored field instead of score.
    pub sort_by: Option<SortBy>,

    /// Allow block-quality pruning. Disabling it is mainly useful for
    /// verifying that pruning does not change results.
    pub quality_pruning: bool,
}

impl SearchRequest {
    /// A plain top-`limit` relevance search.
    pub fn with_limit(limit: usize) -> Self {
        SearchRequest {
            limit,
            filter: None,
            mask: None,
            time_limit: None,
            check_interval: DEFAULT_CHECK_INTERVAL,
            sort_by: None,
            quality_pruning: true,
        }
    }

    /// Set the filter set.
    pub fn filter(mut self, allowed: AHashSet<u64>) -> Self {
        self.filter = Some(allowed);
        self
    }

    /// Set the mask set.
    pub fn mask(mut self, masked: AHashSet<u64>) -> Self {
        self.mask = Some(masked);
        self
    }

    /// Set the time limit.
    pub fn time_limit(mut self, budget: Duration) -> Self {
        self.time_limit = Some(budget);
        self
    }

    /// Sort by a stored field.
    pub fn sort_by<S: Into<String>>(mut self, field: S, order: SortOrder) -> Self {
        self.sort_by = Some(SortBy {
            field: field.into(),
            order,
        });
        self
    }

    /// Enable or disable block-quality pruning.
    pub fn quality_pruning(mut self, enabled: bool) -> Self {
        self.quality_pruning = enabled;
        self
    }
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self::with_limit(10)
    }
}

/// Per-search cache of term statistics and field averages.
#[derive(Default)]
struct StatsCache {
    terms: AHashMap<TermKey, (u64, u64)>,
    field_avg: AHashMap<String, f32>,
}

/// Executes queries against one pinned index reader.
pub struct Searcher<'a> {
    reader: &'a IndexReader,
    similarity: Arc<dyn Similarity>,
    expansion_limit: usize,
}

impl<'a> Searcher<'a> {
    /// Create a searcher with BM25 scoring.
    pub fn new(reader: &'a IndexReader) -> Self {
        Searcher {
            reader,
            similarity: Arc::new(Bm25Similarity::new()),
            expansion_limit: DEFAULT_EXPANSION_LIMIT,
        }
    }

    /// Replace the scoring model.
    pub fn with_similarity(mut self, similarity: Arc<dyn Similarity>) -> Self {
        self.similarity = similarity;
        self
    }

    /// Bound multi-term expansion.
    pub fn with_expansion_limit(mut self, limit: usize) -> Self {
        self.expansion_limit = limit;
        self
    }

    /// The reader this searcher is bound to.
    pub fn reader(&self) -> &IndexReader {
        self.reader
    }

    /// Fetch the stored fields of a hit.
    pub fn doc(&self, doc_id: u64) -> Result<Document> {
        self.reader.stored_fields(doc_id)
    }

    /// Execute a query and collect the top results.
    pub fn search(&self, query: &Query, request: &SearchRequest) -> Result<TopDocs> {
        if let Some(sort_by) = &request.sort_by {
            return self.search_sorted(query, request, sort_by);
        }

        let mut collector: Box<dyn Collector> = Box::new(TopKCollector::new(request.limit));
        if let Some(allowed) = &request.filter {
            collector = Box::new(FilterCollector::new(collector, allowed.clone()));
        }
        if let Some(masked) = &request.mask {
            collector = Box::new(MaskCollector::new(collector, masked.clone()));
        }
        if let Some(budget) = request.time_limit {
            collector = Box::new(TimeLimitCollector::new(
                collector,
                budget,
                request.check_interval,
            ));
        }

        let pruning = request.quality_pruning
            && !self.similarity.uses_final()
            && collector.allows_pruning();

        let mut cache = StatsCache::default();
        let mut timed_out = false;

        'segments: for (segment, base) in self.reader.segments() {
            let mut matcher = self.build_matcher(query, segment, 1.0, &mut cache)?;
            loop {
                if pruning && matcher.supports_quality() {
                    if let Some(threshold) = collector.threshold() {
                        if !matcher.skip_to_quality(threshold)? {
                            break;
                        }
                    }
                }
                if !matcher.is_active() {
                    break;
                }
                let local = matcher.doc_id();
                if !segment.is_deleted(local as u32) {
                    let doc_id = base + local;
                    let score = self.similarity.final_score(doc_id, matcher.score());
                    match collector.collect(doc_id, score) {
                        Ok(()) => {}
                        Err(QuillError::TimeLimit(_)) => {
                            timed_out = true;
                            break 'segments;
                        }
                        Err(e) => return Err(e),
                    }
                }
                if !matcher.next()? {
                    break;
                }
            }
        }

        let mut top_docs = collector.into_top_docs();
        top_docs.timed_out = timed_out;
        Ok(top_docs)
    }

    /// Sorted search: score pruning is off, sort keys come from stored
    /// fields.
    fn search_sorted(
        &self,
        query: &Query,
        request: &SearchRequest,
        sort_by: &SortBy,
    ) -> Result<TopDocs> {
        let mut collector = SortByFieldCollector::new(request.limit, sort_by.order);
        let deadline = request.time_limit.map(|budget| Instant::now() + budget);
        let mut cache = StatsCache::default();
        let mut timed_out = false;
        let mut seen = 0u32;

        'segments: for (segment, base) in self.reader.segments() {
            let mut matcher = self.build_matcher(query, segment, 1.0, &mut cache)?;
            while matcher.is_active() {
                let local = matcher.doc_id();
                let doc_id = base + local;
                let allowed = !segment.is_deleted(local as u32)
                    && request
                        .filter
                        .as_ref()
                        .map(|set| set.contains(&doc_id))
                        .unwrap_or(true)
                    && !request
                        .mask
                        .as_ref()
                        .map(|set| set.contains(&doc_id))
                        .unwrap_or(false);
                if allowed {
                    let value = segment
                        .stored_fields(local as u32)?
                        .get(&sort_by.field)
                        .cloned()
                        .unwrap_or(FieldValue::Null);
                    let score = self.similarity.final_score(doc_id, matcher.score());
                    collector.collect_with_value(doc_id, score, value);
                }

                seen += 1;
                if let Some(deadline) = deadline {
                    if seen % request.check_interval.max(1) == 0 && Instant::now() >= deadline {
                        timed_out = true;
                        break 'segments;
                    }
                }
                if !matcher.next()? {
                    break;
                }
            }
        }

        let mut top_docs = collector.into_top_docs();
        top_docs.timed_out = timed_out;
        Ok(top_docs)
    }

    fn statistics(&self, key: &TermKey, boost: f32, cache: &mut StatsCache) -> TermStatistics {
        let (df, cf) = *cache
            .terms
            .entry(key.clone())
            .or_insert_with(|| self.reader.term_stats(key));
        let avg_field_length = *cache
            .field_avg
            .entry(key.field.clone())
            .or_insert_with(|| self.reader.avg_field_length(&key.field));
        TermStatistics {
            field: key.field.clone(),
            doc_frequency: df,
            collection_frequency: cf,
            doc_count: self.reader.doc_count(),
            avg_field_length,
            boost,
        }
    }

    fn term_matcher(
        &self,
        segment: &SegmentReader,
        key: &TermKey,
        boost: f32,
        with_positions: bool,
        cache: &mut StatsCache,
    ) -> Result<Box<dyn Matcher>> {
        let Some(info) = segment.term_info(key) else {
            return Ok(Box::new(EmptyMatcher::new()));
        };
        let cursor = segment.cursor_for(info, with_positions)?;
        let weight = self
            .similarity
            .weight(&self.statistics(key, boost, cache));
        let lengths = segment
            .length_column(&key.field)
            .map(|column| Arc::clone(&column.bytes));
        Ok(Box::new(TermMatcher::new(
            cursor,
            weight,
            lengths,
            info.max_tf,
            info.min_len,
        )))
    }

    /// Expand a dictionary scan into term matchers, bounded by the
    /// expansion limit.
    fn expand_terms(
        &self,
        segment: &SegmentReader,
        keys: Vec<TermKey>,
        boost: f32,
        cache: &mut StatsCache,
    ) -> Result<Box<dyn Matcher>> {
        if keys.len() > self.expansion_limit {
            return Err(QuillError::query(format!(
                "term expansion produced {} terms, limit is {}",
                keys.len(),
                self.expansion_limit
            )));
        }
        let mut children = Vec::with_capacity(keys.len());
        for key in &keys {
            children.push(self.term_matcher(segment, key, boost, false, cache)?);
        }
        Ok(Box::new(DisjunctionMatcher::new(children)))
    }

    fn field_kind(&self, field: &str) -> Result<&crate::schema::FieldKind> {
        self.reader
            .schema()
            .get(field)
            .ok_or_else(|| QuillError::query(format!("field '{field}' is not in the schema")))
    }

    /// Build the matcher tree for a query over one segment.
    fn build_matcher(
        &self,
        query: &Query,
        segment: &SegmentReader,
        boost: f32,
        cache: &mut StatsCache,
    ) -> Result<Box<dyn Matcher>> {
        match query {
            Query::Term { field, term } => {
                self.field_kind(field)?;
                let key = TermKey::new(field.clone(), term.clone());
                self.term_matcher(segment, &key, boost, false, cache)
            }

            Query::Phrase { field, terms, slop } => {
                let kind = self.field_kind(field)?;
                if !kind.has_positions() {
                    return Err(QuillError::query(format!(
                        "field '{field}' does not record positions"
                    )));
                }
                if terms.is_empty() {
                    return Ok(Box::new(EmptyMatcher::new()));
                }
                if terms.len() == 1 {
                    let key = TermKey::new(field.clone(), terms[0].clone());
                    return self.term_matcher(segment, &key, boost, false, cache);
                }
                let mut children = Vec::with_capacity(terms.len());
                for term in terms {
                    let key = TermKey::new(field.clone(), term.clone());
                    if segment.term_info(&key).is_none() {
                        return Ok(Box::new(EmptyMatcher::new()));
                    }
                    children.push(self.term_matcher(segment, &key, boost, true, cache)?);
                }
                Ok(Box::new(PhraseMatcher::new(children, *slop)?))
            }

            Query::And(clauses) => {
                if clauses.is_empty() {
                    return Ok(Box::new(EmptyMatcher::new()));
                }
                let children = clauses
                    .iter()
                    .map(|clause| self.build_matcher(clause, segment, boost, cache))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(ConjunctionMatcher::new(children)?))
            }

            Query::Or(clauses) => {
                let children = clauses
                    .iter()
                    .map(|clause| self.build_matcher(clause, segment, boost, cache))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(DisjunctionMatcher::new(children)))
            }

            Query::AndNot(include, exclude) => {
                let include = self.build_matcher(include, segment, boost, cache)?;
                let exclude = self.build_matcher(exclude, segment, 1.0, cache)?;
                Ok(Box::new(AndNotMatcher::new(include, exclude)?))
            }

            Query::Range {
                field,
                lower,
                upper,
            } => {
                self.field_kind(field)?;
                let keys = self.range_keys(segment, field, lower, upper);
                self.expand_terms(segment, keys, boost, cache)
            }

            Query::Prefix { field, prefix } => {
                self.field_kind(field)?;
                let keys: Vec<TermKey> = segment
                    .dictionary()
                    .iter_prefix(field, prefix)
                    .map(|(key, _)| key.clone())
                    .collect();
                self.expand_terms(segment, keys, boost, cache)
            }

            Query::Wildcard { field, pattern } => {
                self.field_kind(field)?;
                let regex = wildcard_regex(pattern)?;
                let literal_prefix: Vec<u8> = pattern
                    .bytes()
                    .take_while(|b| *b != b'*' && *b != b'?')
                    .collect();
                let keys: Vec<TermKey> = segment
                    .dictionary()
                    .iter_prefix(field, &literal_prefix)
                    .filter(|(key, _)| regex.is_match(&key.term))
                    .map(|(key, _)| key.clone())
                    .collect();
                self.expand_terms(segment, keys, boost, cache)
            }

            Query::Every(None) => Ok(Box::new(AllMatcher::new(
                segment.doc_count_all() as u64,
                boost,
            ))),

            Query::Every(Some(field)) => {
                self.field_kind(field)?;
                let keys: Vec<TermKey> = segment
                    .dictionary()
                    .iter_field(field)
                    .map(|(key, _)| key.clone())
                    .collect();
                let mut children = Vec::with_capacity(keys.len());
                for key in &keys {
                    children.push(self.term_matcher(segment, key, 1.0, false, cache)?);
                }
                Ok(Box::new(ConstantScoreMatcher::new(
                    Box::new(DisjunctionMatcher::new(children)),
                    boost,
                )))
            }

            Query::Boost(inner, factor) => self.build_matcher(inner, segment, boost * factor, cache),

            Query::Constant(inner, score) => {
                let matcher = self.build_matcher(inner, segment, 1.0, cache)?;
                Ok(Box::new(ConstantScoreMatcher::new(matcher, *score * boost)))
            }
        }
    }

    fn range_keys(
        &self,
        segment: &SegmentReader,
        field: &str,
        lower: &RangeBound,
        upper: &RangeBound,
    ) -> Vec<TermKey> {
        segment
            .dictionary()
            .iter_range(
                field,
                lower.value.as_deref(),
                upper.value.as_deref(),
                lower.inclusive,
                upper.inclusive,
            )
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Translate a glob pattern into an anchored byte regex.
fn wildcard_regex(pattern: &str) -> Result<regex::bytes::Regex> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 2);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    regex::bytes::RegexBuilder::new(&expr)
        .unicode(false)
        .build()
        .map_err(|e| QuillError::query(format!("invalid wildcard pattern '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_regex_translation() {
        let regex = wildcard_regex("qu*k").unwrap();
        assert!(regex.is_match(b"quick"));
        assert!(regex.is_match(b"quk"));
        assert!(!regex.is_match(b"quicker"));

        let regex = wildcard_regex("h?llo").unwrap();
        assert!(regex.is_match(b"hello"));
        assert!(regex.is_match(b"hallo"));
        assert!(!regex.is_match(b"hllo"));

        // Regex metacharacters in the pattern are literals
        let regex = wildcard_regex("a.b*").unwrap();
        assert!(regex.is_match(b"a.bc"));
        assert!(!regex.is_match(b"axbc"));
    }
}

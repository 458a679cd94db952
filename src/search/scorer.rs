//! Scoring: the pluggable similarity contract and the BM25 default.
//!
//! A [`Similarity`] turns per-term collection statistics into a
//! [`TermWeight`], which scores individual postings and computes the
//! block-quality upper bounds matchers use for pruning. Keeping the bound
//! computation on the scorer side keeps matchers scorer-agnostic.

use std::fmt::Debug;

use ahash::AHashMap;

use crate::util::fieldlen::byte_to_length;

/// Collection statistics for one weighted term.
#[derive(Debug, Clone)]
pub struct TermStatistics {
    /// Field the term belongs to.
    pub field: String,
    /// Documents containing the term, across the index.
    pub doc_frequency: u64,
    /// Sum of term frequencies across the index.
    pub collection_frequency: u64,
    /// Live documents in the index.
    pub doc_count: u64,
    /// Average raw length of the field.
    pub avg_field_length: f32,
    /// Query-level boost applied to this term.
    pub boost: f32,
}

/// A per-term scoring function produced by a [`Similarity`].
pub trait TermWeight: Send + Sync + Debug {
    /// Score one posting given its term frequency and raw field length.
    fn score(&self, tf: f32, length: u32) -> f32;

    /// Upper bound on the score of any posting in a block with the given
    /// maximum term frequency and minimum encoded length.
    fn max_quality(&self, max_tf: u32, min_len: u8) -> f32;

    /// Clone into a boxed weight.
    fn clone_weight(&self) -> Box<dyn TermWeight>;
}

/// A pluggable scoring model.
pub trait Similarity: Send + Sync + Debug {
    /// Build the weight for one term.
    fn weight(&self, stats: &TermStatistics) -> Box<dyn TermWeight>;

    /// Whether [`Similarity::final_score`] rescoring is in use.
    ///
    /// A rescorer can reorder hits arbitrarily, so block-quality pruning is
    /// disabled when this returns true.
    fn uses_final(&self) -> bool {
        false
    }

    /// Optional rescoring hook applied to each collected hit.
    fn final_score(&self, _doc_id: u64, score: f32) -> f32 {
        score
    }
}

/// Per-field BM25 parameter overrides.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization strength.
    pub b: f32,
    /// Multiplicative field weight.
    pub weight: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Bm25Params {
            k1: 1.2,
            b: 0.75,
            weight: 1.0,
        }
    }
}

/// BM25 with per-field parameters (the BM25F family).
#[derive(Debug, Clone, Default)]
pub struct Bm25Similarity {
    defaults: Bm25Params,
    per_field: AHashMap<String, Bm25Params>,
}

impl Bm25Similarity {
    /// BM25 with the standard parameters (k1 = 1.2, b = 0.75).
    pub fn new() -> Self {
        Bm25Similarity::default()
    }

    /// Override the default parameters.
    pub fn with_defaults(mut self, params: Bm25Params) -> Self {
        self.defaults = params;
        self
    }

    /// Override parameters for one field.
    pub fn with_field<S: Into<String>>(mut self, field: S, params: Bm25Params) -> Self {
        self.per_field.insert(field.into(), params);
        self
    }

    fn params_for(&self, field: &str) -> Bm25Params {
        self.per_field.get(field).copied().unwrap_or(self.defaults)
    }
}

impl Similarity for Bm25Similarity {
    fn weight(&self, stats: &TermStatistics) -> Box<dyn TermWeight> {
        let params = self.params_for(&stats.field);
        let n = stats.doc_count as f32;
        let df = stats.doc_frequency as f32;
        // The +1 keeps idf positive for terms in most documents
        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

        Box::new(Bm25Weight {
            idf,
            k1: params.k1,
            b: params.b,
            avg_len: stats.avg_field_length.max(f32::MIN_POSITIVE),
            boost: stats.boost * params.weight,
        })
    }
}

/// The BM25 term weight.
#[derive(Debug, Clone)]
pub struct Bm25Weight {
    idf: f32,
    k1: f32,
    b: f32,
    avg_len: f32,
    boost: f32,
}

impl TermWeight for Bm25Weight {
    fn score(&self, tf: f32, length: u32) -> f32 {
        let norm = 1.0 - self.b + self.b * (length as f32 / self.avg_len);
        self.boost * self.idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm)
    }

    fn max_quality(&self, max_tf: u32, min_len: u8) -> f32 {
        // Score is monotonic up in tf and down in length, so evaluating at
        // the block extremes gives a true upper bound.
        self.score(max_tf as f32, byte_to_length(min_len))
    }

    fn clone_weight(&self) -> Box<dyn TermWeight> {
        Box::new(self.clone())
    }
}

/// A weight that scores every posting with the same value.
///
/// Used by constant-score queries and match-everything matchers.
#[derive(Debug, Clone)]
pub struct ConstWeight {
    value: f32,
}

impl ConstWeight {
    /// Create a constant weight.
    pub fn new(value: f32) -> Self {
        ConstWeight { value }
    }
}

impl TermWeight for ConstWeight {
    fn score(&self, _tf: f32, _length: u32) -> f32 {
        self.value
    }

    fn max_quality(&self, _max_tf: u32, _min_len: u8) -> f32 {
        self.value
    }

    fn clone_weight(&self) -> Box<dyn TermWeight> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::fieldlen::length_to_byte;

    fn stats(df: u64, doc_count: u64) -> TermStatistics {
        TermStatistics {
            field: "body".to_string(),
            doc_frequency: df,
            collection_frequency: df * 2,
            doc_count,
            avg_field_length: 10.0,
            boost: 1.0,
        }
    }

    #[test]
    fn test_rarer_terms_score_higher() {
        let similarity = Bm25Similarity::new();
        let rare = similarity.weight(&stats(2, 1000));
        let common = similarity.weight(&stats(900, 1000));

        assert!(rare.score(1.0, 10) > common.score(1.0, 10));
    }

    #[test]
    fn test_tf_saturates() {
        let similarity = Bm25Similarity::new();
        let weight = similarity.weight(&stats(10, 1000));

        let s1 = weight.score(1.0, 10);
        let s2 = weight.score(2.0, 10);
        let s20 = weight.score(20.0, 10);
        let s21 = weight.score(21.0, 10);

        assert!(s2 > s1);
        // Marginal gain shrinks as tf grows
        assert!(s21 - s20 < s2 - s1);
    }

    #[test]
    fn test_longer_docs_score_lower() {
        let similarity = Bm25Similarity::new();
        let weight = similarity.weight(&stats(10, 1000));

        assert!(weight.score(1.0, 5) > weight.score(1.0, 50));
    }

    #[test]
    fn test_max_quality_is_upper_bound() {
        let similarity = Bm25Similarity::new();
        let weight = similarity.weight(&stats(10, 1000));

        // Any posting with tf <= max_tf and length >= decoded(min_len)
        // scores at most the bound
        let min_len_byte = length_to_byte(8);
        let bound = weight.max_quality(4, min_len_byte);
        for tf in 1..=4 {
            for length in [8u32, 10, 30, 100] {
                assert!(weight.score(tf as f32, length) <= bound + f32::EPSILON);
            }
        }
    }

    #[test]
    fn test_field_overrides() {
        let similarity = Bm25Similarity::new().with_field(
            "title",
            Bm25Params {
                weight: 3.0,
                ..Default::default()
            },
        );

        let mut title_stats = stats(10, 1000);
        title_stats.field = "title".to_string();
        let title_weight = similarity.weight(&title_stats);
        let body_weight = similarity.weight(&stats(10, 1000));

        let ratio = title_weight.score(1.0, 10) / body_weight.score(1.0, 10);
        assert!((ratio - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_boost_scales_scores() {
        let similarity = Bm25Similarity::new();
        let mut boosted_stats = stats(10, 1000);
        boosted_stats.boost = 2.0;

        let plain = similarity.weight(&stats(10, 1000));
        let boosted = similarity.weight(&boosted_stats);
        let ratio = boosted.score(1.0, 10) / plain.score(1.0, 10);
        assert!((ratio - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_const_weight() {
        let weight = ConstWeight::new(2.5);
        assert_eq!(weight.score(10.0, 3), 2.5);
        assert_eq!(weight.max_quality(100, 0), 2.5);
    }
}

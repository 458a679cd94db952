//! The query tree.
//!
//! Queries are a tagged tree handed to the searcher; no parser lives in
//! this crate. Term bytes are matched exactly, so callers are responsible
//! for analyzing query text the same way the indexed fields were analyzed.

use crate::storage::structured::{encode_f64_ordered, encode_i64_ordered};

/// One bound of a range query.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBound {
    /// Bound term bytes; `None` leaves the end open.
    pub value: Option<Vec<u8>>,
    /// Whether the bound itself is included.
    pub inclusive: bool,
}

impl RangeBound {
    /// An open (absent) bound.
    pub fn open() -> Self {
        RangeBound {
            value: None,
            inclusive: false,
        }
    }

    /// A bound at `value`, inclusive or not.
    pub fn at<T: Into<Vec<u8>>>(value: T, inclusive: bool) -> Self {
        RangeBound {
            value: Some(value.into()),
            inclusive,
        }
    }
}

/// A search query.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Match documents containing the exact term in the field.
    Term {
        /// Field to search.
        field: String,
        /// Term bytes.
        term: Vec<u8>,
    },

    /// Match documents where the terms occur as a phrase.
    ///
    /// With slop 0 the terms must be adjacent in order; a positive slop
    /// allows that many extra position steps between the first and last
    /// term.
    Phrase {
        /// Field to search; must record positions.
        field: String,
        /// Phrase terms in order.
        terms: Vec<Vec<u8>>,
        /// Allowed positional slack.
        slop: u32,
    },

    /// Match documents matching every subquery.
    And(Vec<Query>),

    /// Match documents matching any subquery.
    Or(Vec<Query>),

    /// Match documents matching the first query but not the second.
    AndNot(Box<Query>, Box<Query>),

    /// Match documents with a term of the field inside the byte range.
    Range {
        /// Field to search.
        field: String,
        /// Lower bound.
        lower: RangeBound,
        /// Upper bound.
        upper: RangeBound,
    },

    /// Match documents with a term of the field starting with the prefix.
    Prefix {
        /// Field to search.
        field: String,
        /// Prefix bytes.
        prefix: Vec<u8>,
    },

    /// Match documents with a term of the field matching a glob pattern
    /// (`*` any run, `?` one character).
    Wildcard {
        /// Field to search.
        field: String,
        /// Glob pattern.
        pattern: String,
    },

    /// Match every live document, or every document with at least one term
    /// in the given field.
    Every(Option<String>),

    /// Multiply the subquery's scores by a factor.
    Boost(Box<Query>, f32),

    /// Match the subquery but score every hit with a constant.
    Constant(Box<Query>, f32),
}

impl Query {
    /// A term query.
    pub fn term<F: Into<String>, T: Into<Vec<u8>>>(field: F, term: T) -> Self {
        Query::Term {
            field: field.into(),
            term: term.into(),
        }
    }

    /// A term query over an i64 numeric field.
    pub fn term_i64<F: Into<String>>(field: F, value: i64) -> Self {
        Query::term(field, encode_i64_ordered(value).to_vec())
    }

    /// A term query over an f64 numeric field.
    pub fn term_f64<F: Into<String>>(field: F, value: f64) -> Self {
        Query::term(field, encode_f64_ordered(value).to_vec())
    }

    /// A phrase query with zero slop.
    pub fn phrase<F: Into<String>>(field: F, terms: Vec<&str>) -> Self {
        Query::Phrase {
            field: field.into(),
            terms: terms.into_iter().map(|t| t.as_bytes().to_vec()).collect(),
            slop: 0,
        }
    }

    /// Set the slop of a phrase query; no-op for other variants.
    pub fn with_slop(mut self, new_slop: u32) -> Self {
        if let Query::Phrase { ref mut slop, .. } = self {
            *slop = new_slop;
        }
        self
    }

    /// Conjunction of subqueries.
    pub fn and(queries: Vec<Query>) -> Self {
        Query::And(queries)
    }

    /// Disjunction of subqueries.
    pub fn or(queries: Vec<Query>) -> Self {
        Query::Or(queries)
    }

    /// Difference: documents matching `include` but not `exclude`.
    pub fn and_not(include: Query, exclude: Query) -> Self {
        Query::AndNot(Box::new(include), Box::new(exclude))
    }

    /// A range query over raw term bytes.
    pub fn range<F: Into<String>, T: Into<Vec<u8>>>(
        field: F,
        lower: Option<T>,
        upper: Option<T>,
        include_lower: bool,
        include_upper: bool,
    ) -> Self {
        Query::Range {
            field: field.into(),
            lower: match lower {
                Some(value) => RangeBound::at(value, include_lower),
                None => RangeBound::open(),
            },
            upper: match upper {
                Some(value) => RangeBound::at(value, include_upper),
                None => RangeBound::open(),
            },
        }
    }

    /// A range query over an i64 numeric field, both bounds inclusive.
    pub fn range_i64<F: Into<String>>(field: F, lower: i64, upper: i64) -> Self {
        Query::range(
            field,
            Some(encode_i64_ordered(lower).to_vec()),
            Some(encode_i64_ordered(upper).to_vec()),
            true,
            true,
        )
    }

    /// A prefix query.
    pub fn prefix<F: Into<String>, T: Into<Vec<u8>>>(field: F, prefix: T) -> Self {
        Query::Prefix {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    /// A wildcard query.
    pub fn wildcard<F: Into<String>, P: Into<String>>(field: F, pattern: P) -> Self {
        Query::Wildcard {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Match every live document.
    pub fn every() -> Self {
        Query::Every(None)
    }

    /// Boost the subquery's scores.
    pub fn boost(self, factor: f32) -> Self {
        Query::Boost(Box::new(self), factor)
    }

    /// Score every hit of the subquery with a constant.
    pub fn constant_score(self, score: f32) -> Self {
        Query::Constant(Box::new(self), score)
    }
}

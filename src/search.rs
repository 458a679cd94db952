//! Search: matchers, scoring, collection and the searcher facade.

pub mod collector;
pub mod matcher;
pub mod scorer;
pub mod searcher;

pub use collector::{
    Collector, FilterCollector, MaskCollector, SearchHit, SortByFieldCollector, SortOrder,
    TimeLimitCollector, TopDocs, TopKCollector,
};
pub use matcher::{
    AllMatcher, AndNotMatcher, ConjunctionMatcher, ConstantScoreMatcher, DisjunctionMatcher,
    EmptyMatcher, Matcher, PhraseMatcher, TermMatcher,
};
pub use scorer::{Bm25Params, Bm25Similarity, ConstWeight, Similarity, TermStatistics, TermWeight};
pub use searcher::{SearchRequest, Searcher, SortBy};

//! Matcher implementations for query execution.
//!
//! A matcher is a positioned iterator over the documents matching some
//! query node within one segment. All matchers expose skip-to navigation;
//! matchers over real posting lists additionally expose block-quality
//! bounds, which lets the collector skip whole blocks that cannot reach
//! the current top-K threshold.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::index::postings::PostingsCursor;
use crate::search::scorer::TermWeight;
use crate::util::fieldlen::byte_to_length;

/// Sentinel doc id of an inactive matcher.
pub const NO_DOC: u64 = u64::MAX;

/// Trait for document matchers.
pub trait Matcher: Send + Debug {
    /// Whether the matcher is positioned on a valid posting.
    fn is_active(&self) -> bool;

    /// Current doc id, or [`NO_DOC`] when inactive. Non-decreasing across
    /// calls.
    fn doc_id(&self) -> u64;

    /// Advance to the next matching document.
    fn next(&mut self) -> Result<bool>;

    /// Advance until `doc_id() >= target` or the matcher goes inactive.
    fn skip_to(&mut self, target: u64) -> Result<bool>;

    /// Score-independent weight of the current posting (usually tf).
    fn weight(&self) -> f32;

    /// Score of the current posting.
    fn score(&self) -> f32;

    /// Whether block-quality navigation is supported.
    fn supports_quality(&self) -> bool {
        false
    }

    /// Upper bound on the score of any posting this matcher can produce.
    fn max_quality(&self) -> f32 {
        f32::INFINITY
    }

    /// Upper bound on the score of any posting in the current block.
    fn block_quality(&self) -> f32 {
        f32::INFINITY
    }

    /// Advance past blocks whose quality bound is `<= min_quality`.
    ///
    /// Matchers that do not support quality leave their position unchanged.
    fn skip_to_quality(&mut self, min_quality: f32) -> Result<bool> {
        let _ = min_quality;
        Ok(self.is_active())
    }

    /// Positions of the current posting; empty when not recorded.
    fn positions(&self) -> Vec<u32> {
        Vec::new()
    }

    /// Estimated number of postings this matcher will produce.
    fn cost(&self) -> u64;

    /// Independent positioned clone, for branch-and-bound matching.
    fn copy_matcher(&self) -> Result<Box<dyn Matcher>>;
}

/// A matcher that matches no documents.
#[derive(Debug, Clone)]
pub struct EmptyMatcher;

impl EmptyMatcher {
    /// Create a new empty matcher.
    pub fn new() -> Self {
        EmptyMatcher
    }
}

impl Default for EmptyMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for EmptyMatcher {
    fn is_active(&self) -> bool {
        false
    }

    fn doc_id(&self) -> u64 {
        NO_DOC
    }

    fn next(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn skip_to(&mut self, _target: u64) -> Result<bool> {
        Ok(false)
    }

    fn weight(&self) -> f32 {
        0.0
    }

    fn score(&self) -> f32 {
        0.0
    }

    fn max_quality(&self) -> f32 {
        0.0
    }

    fn block_quality(&self) -> f32 {
        0.0
    }

    fn cost(&self) -> u64 {
        0
    }

    fn copy_matcher(&self) -> Result<Box<dyn Matcher>> {
        Ok(Box::new(EmptyMatcher))
    }
}

/// A matcher over every document in a segment, scored with a constant.
#[derive(Debug, Clone)]
pub struct AllMatcher {
    current: u64,
    max_doc: u64,
    score: f32,
}

impl AllMatcher {
    /// Match docs `0..max_doc` with the given constant score.
    pub fn new(max_doc: u64, score: f32) -> Self {
        AllMatcher {
            current: 0,
            max_doc,
            score,
        }
    }
}

impl Matcher for AllMatcher {
    fn is_active(&self) -> bool {
        self.current < self.max_doc
    }

    fn doc_id(&self) -> u64 {
        if self.is_active() { self.current } else { NO_DOC }
    }

    fn next(&mut self) -> Result<bool> {
        if self.current < self.max_doc {
            self.current += 1;
        }
        Ok(self.is_active())
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        self.current = self.current.max(target);
        Ok(self.is_active())
    }

    fn weight(&self) -> f32 {
        1.0
    }

    fn score(&self) -> f32 {
        self.score
    }

    fn cost(&self) -> u64 {
        self.max_doc
    }

    fn copy_matcher(&self) -> Result<Box<dyn Matcher>> {
        Ok(Box::new(self.clone()))
    }
}

/// A matcher over one term's posting list.
pub struct TermMatcher {
    cursor: PostingsCursor,
    term_weight: Box<dyn TermWeight>,
    /// Encoded length column of the field, when scorable.
    lengths: Option<Arc<Vec<u8>>>,
    /// Term-wide aggregates from the dictionary entry.
    info_max_tf: u32,
    info_min_len: u8,
    cost: u64,
}

impl Debug for TermMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermMatcher")
            .field("doc_id", &self.cursor.doc_id())
            .field("active", &self.cursor.is_active())
            .finish()
    }
}

impl TermMatcher {
    /// Create a term matcher from a positioned cursor.
    pub fn new(
        cursor: PostingsCursor,
        term_weight: Box<dyn TermWeight>,
        lengths: Option<Arc<Vec<u8>>>,
        info_max_tf: u32,
        info_min_len: u8,
    ) -> Self {
        let cost = cursor.cost();
        TermMatcher {
            cursor,
            term_weight,
            lengths,
            info_max_tf,
            info_min_len,
            cost,
        }
    }

    fn current_length(&self) -> u32 {
        let byte = self
            .lengths
            .as_ref()
            .and_then(|column| column.get(self.cursor.doc_id() as usize).copied())
            .unwrap_or(0);
        byte_to_length(byte)
    }
}

impl Matcher for TermMatcher {
    fn is_active(&self) -> bool {
        self.cursor.is_active()
    }

    fn doc_id(&self) -> u64 {
        if self.cursor.is_active() {
            self.cursor.doc_id() as u64
        } else {
            NO_DOC
        }
    }

    fn next(&mut self) -> Result<bool> {
        self.cursor.advance()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if target >= u32::MAX as u64 {
            self.cursor.deactivate();
            return Ok(false);
        }
        self.cursor.skip_to(target as u32)
    }

    fn weight(&self) -> f32 {
        self.cursor.tf() as f32
    }

    fn score(&self) -> f32 {
        self.term_weight
            .score(self.cursor.tf() as f32, self.current_length())
    }

    fn supports_quality(&self) -> bool {
        true
    }

    fn max_quality(&self) -> f32 {
        self.term_weight
            .max_quality(self.info_max_tf, self.info_min_len)
    }

    fn block_quality(&self) -> f32 {
        match self.cursor.current_block() {
            Some(pointer) => self.term_weight.max_quality(pointer.max_tf, pointer.min_len),
            // Inline posting: the term aggregates are exact
            None => self.max_quality(),
        }
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<bool> {
        if !self.cursor.is_active() {
            return Ok(false);
        }
        if self.cursor.current_block().is_none() {
            // Inline posting: keep or drop it as a whole
            if self.max_quality() <= min_quality {
                self.cursor.deactivate();
            }
            return Ok(self.cursor.is_active());
        }
        let term_weight = &self.term_weight;
        self.cursor
            .skip_blocks(&|pointer| term_weight.max_quality(pointer.max_tf, pointer.min_len) > min_quality)
    }

    fn positions(&self) -> Vec<u32> {
        self.cursor.positions().to_vec()
    }

    fn cost(&self) -> u64 {
        self.cost
    }

    fn copy_matcher(&self) -> Result<Box<dyn Matcher>> {
        Ok(Box::new(TermMatcher {
            cursor: self.cursor.copy_cursor()?,
            term_weight: self.term_weight.clone_weight(),
            lengths: self.lengths.clone(),
            info_max_tf: self.info_max_tf,
            info_min_len: self.info_min_len,
            cost: self.cost,
        }))
    }
}

/// Intersection of all children.
#[derive(Debug)]
pub struct ConjunctionMatcher {
    children: Vec<Box<dyn Matcher>>,
    active: bool,
}

impl ConjunctionMatcher {
    /// Create a conjunction, positioning on the first common document.
    pub fn new(children: Vec<Box<dyn Matcher>>) -> Result<Self> {
        let mut matcher = ConjunctionMatcher {
            active: !children.is_empty() && children.iter().all(|c| c.is_active()),
            children,
        };
        if matcher.active {
            matcher.align()?;
        }
        Ok(matcher)
    }

    /// Skip lagging children to the leader until all agree.
    fn align(&mut self) -> Result<()> {
        loop {
            let target = self
                .children
                .iter()
                .map(|c| c.doc_id())
                .max()
                .unwrap_or(NO_DOC);
            if target == NO_DOC {
                self.active = false;
                return Ok(());
            }
            let mut aligned = true;
            for child in &mut self.children {
                if child.doc_id() < target {
                    if !child.skip_to(target)? {
                        self.active = false;
                        return Ok(());
                    }
                    aligned &= child.doc_id() == target;
                }
            }
            if aligned {
                return Ok(());
            }
        }
    }
}

impl Matcher for ConjunctionMatcher {
    fn is_active(&self) -> bool {
        self.active
    }

    fn doc_id(&self) -> u64 {
        if self.active {
            self.children[0].doc_id()
        } else {
            NO_DOC
        }
    }

    fn next(&mut self) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        if !self.children[0].next()? {
            self.active = false;
            return Ok(false);
        }
        self.align()?;
        Ok(self.active)
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if !self.active {
            return Ok(false);
        }
        if !self.children[0].skip_to(target)? {
            self.active = false;
            return Ok(false);
        }
        self.align()?;
        Ok(self.active)
    }

    fn weight(&self) -> f32 {
        self.children.iter().map(|c| c.weight()).sum()
    }

    fn score(&self) -> f32 {
        self.children.iter().map(|c| c.score()).sum()
    }

    fn supports_quality(&self) -> bool {
        self.children.iter().all(|c| c.supports_quality())
    }

    fn max_quality(&self) -> f32 {
        self.children.iter().map(|c| c.max_quality()).sum()
    }

    fn block_quality(&self) -> f32 {
        self.children.iter().map(|c| c.block_quality()).sum()
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<bool> {
        while self.active && self.block_quality() <= min_quality {
            // Move the weakest child past its current block; the others'
            // bounds stay valid because quality only constrains blocks.
            let others: f32 = self.children.iter().map(|c| c.block_quality()).sum::<f32>();
            let (weakest, _) = self
                .children
                .iter()
                .enumerate()
                .min_by(|a, b| {
                    a.1.block_quality()
                        .partial_cmp(&b.1.block_quality())
                        .unwrap_or(Ordering::Equal)
                })
                .expect("conjunction has children");
            let child = &mut self.children[weakest];
            let child_bound = min_quality - (others - child.block_quality());
            if !child.skip_to_quality(child_bound)? {
                self.active = false;
                return Ok(false);
            }
            self.align()?;
        }
        Ok(self.active)
    }

    fn cost(&self) -> u64 {
        self.children.iter().map(|c| c.cost()).min().unwrap_or(0)
    }

    fn copy_matcher(&self) -> Result<Box<dyn Matcher>> {
        let children = self
            .children
            .iter()
            .map(|c| c.copy_matcher())
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(ConjunctionMatcher {
            children,
            active: self.active,
        }))
    }
}

/// A heap entry ordering matchers by their current doc id.
#[derive(Debug)]
struct MatcherEntry {
    matcher: Box<dyn Matcher>,
}

impl PartialEq for MatcherEntry {
    fn eq(&self, other: &Self) -> bool {
        self.matcher.doc_id() == other.matcher.doc_id()
    }
}

impl Eq for MatcherEntry {}

impl PartialOrd for MatcherEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MatcherEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: lower doc ids come first
        other.matcher.doc_id().cmp(&self.matcher.doc_id())
    }
}

/// Union of the children, driven by a doc-id min-heap.
#[derive(Debug)]
pub struct DisjunctionMatcher {
    heap: BinaryHeap<MatcherEntry>,
    current: u64,
    cost: u64,
}

impl DisjunctionMatcher {
    /// Create a disjunction over the active children.
    pub fn new(children: Vec<Box<dyn Matcher>>) -> Self {
        let mut heap = BinaryHeap::new();
        let mut cost = 0;
        for matcher in children {
            if matcher.is_active() {
                cost += matcher.cost();
                heap.push(MatcherEntry { matcher });
            }
        }
        let current = heap
            .peek()
            .map(|entry| entry.matcher.doc_id())
            .unwrap_or(NO_DOC);
        DisjunctionMatcher {
            heap,
            current,
            cost,
        }
    }

    fn settle(&mut self) {
        self.current = self
            .heap
            .peek()
            .map(|entry| entry.matcher.doc_id())
            .unwrap_or(NO_DOC);
    }
}

impl Matcher for DisjunctionMatcher {
    fn is_active(&self) -> bool {
        self.current != NO_DOC
    }

    fn doc_id(&self) -> u64 {
        self.current
    }

    fn next(&mut self) -> Result<bool> {
        if !self.is_active() {
            return Ok(false);
        }
        // Advance every child sitting on the current doc
        let mut advanced = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.matcher.doc_id() != self.current {
                break;
            }
            let mut entry = self.heap.pop().expect("peeked entry");
            if entry.matcher.next()? {
                advanced.push(entry);
            }
        }
        for entry in advanced {
            self.heap.push(entry);
        }
        self.settle();
        Ok(self.is_active())
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if !self.is_active() || target <= self.current {
            return Ok(self.is_active());
        }
        let mut kept = Vec::new();
        while let Some(mut entry) = self.heap.pop() {
            if entry.matcher.doc_id() >= target || entry.matcher.skip_to(target)? {
                kept.push(entry);
            }
        }
        for entry in kept {
            self.heap.push(entry);
        }
        self.settle();
        Ok(self.is_active())
    }

    fn weight(&self) -> f32 {
        self.heap
            .iter()
            .filter(|entry| entry.matcher.doc_id() == self.current)
            .map(|entry| entry.matcher.weight())
            .sum()
    }

    fn score(&self) -> f32 {
        self.heap
            .iter()
            .filter(|entry| entry.matcher.doc_id() == self.current)
            .map(|entry| entry.matcher.score())
            .sum()
    }

    fn supports_quality(&self) -> bool {
        self.heap.iter().all(|entry| entry.matcher.supports_quality())
    }

    fn max_quality(&self) -> f32 {
        self.heap.iter().map(|entry| entry.matcher.max_quality()).sum()
    }

    fn block_quality(&self) -> f32 {
        self.heap
            .iter()
            .map(|entry| entry.matcher.block_quality())
            .sum()
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<bool> {
        if !self.is_active() {
            return Ok(false);
        }
        // WAND-style: a child can be skipped when even its best block plus
        // everything the other children could add stays at or below the
        // threshold.
        let total_max: f32 = self
            .heap
            .iter()
            .map(|entry| entry.matcher.max_quality())
            .sum();

        let mut kept = Vec::new();
        let mut drained = Vec::new();
        while let Some(entry) = self.heap.pop() {
            drained.push(entry);
        }
        for mut entry in drained {
            let others = total_max - entry.matcher.max_quality();
            let child_bound = min_quality - others;
            if entry.matcher.block_quality() <= child_bound {
                if !entry.matcher.skip_to_quality(child_bound)? {
                    continue;
                }
            }
            kept.push(entry);
        }
        for entry in kept {
            self.heap.push(entry);
        }
        self.settle();
        Ok(self.is_active())
    }

    fn cost(&self) -> u64 {
        self.cost
    }

    fn copy_matcher(&self) -> Result<Box<dyn Matcher>> {
        let mut children = Vec::with_capacity(self.heap.len());
        for entry in self.heap.iter() {
            children.push(entry.matcher.copy_matcher()?);
        }
        let mut copy = DisjunctionMatcher::new(children);
        copy.current = self.current;
        copy.cost = self.cost;
        Ok(Box::new(copy))
    }
}

/// Documents matching `include` but not `exclude`.
#[derive(Debug)]
pub struct AndNotMatcher {
    include: Box<dyn Matcher>,
    exclude: Box<dyn Matcher>,
}

impl AndNotMatcher {
    /// Create a difference matcher, positioned on the first kept doc.
    pub fn new(include: Box<dyn Matcher>, exclude: Box<dyn Matcher>) -> Result<Self> {
        let mut matcher = AndNotMatcher { include, exclude };
        matcher.settle()?;
        Ok(matcher)
    }

    /// Advance `include` past every doc the exclusion also matches.
    fn settle(&mut self) -> Result<()> {
        while self.include.is_active() {
            let doc = self.include.doc_id();
            if self.exclude.is_active() && self.exclude.doc_id() < doc {
                self.exclude.skip_to(doc)?;
            }
            if self.exclude.is_active() && self.exclude.doc_id() == doc {
                self.include.next()?;
            } else {
                break;
            }
        }
        Ok(())
    }
}

impl Matcher for AndNotMatcher {
    fn is_active(&self) -> bool {
        self.include.is_active()
    }

    fn doc_id(&self) -> u64 {
        self.include.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        if !self.include.next()? {
            return Ok(false);
        }
        self.settle()?;
        Ok(self.is_active())
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if !self.include.skip_to(target)? {
            return Ok(false);
        }
        self.settle()?;
        Ok(self.is_active())
    }

    fn weight(&self) -> f32 {
        self.include.weight()
    }

    fn score(&self) -> f32 {
        self.include.score()
    }

    fn supports_quality(&self) -> bool {
        self.include.supports_quality()
    }

    fn max_quality(&self) -> f32 {
        self.include.max_quality()
    }

    fn block_quality(&self) -> f32 {
        self.include.block_quality()
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<bool> {
        if !self.include.skip_to_quality(min_quality)? {
            return Ok(false);
        }
        self.settle()?;
        Ok(self.is_active())
    }

    fn positions(&self) -> Vec<u32> {
        self.include.positions()
    }

    fn cost(&self) -> u64 {
        self.include.cost()
    }

    fn copy_matcher(&self) -> Result<Box<dyn Matcher>> {
        Ok(Box::new(AndNotMatcher {
            include: self.include.copy_matcher()?,
            exclude: self.exclude.copy_matcher()?,
        }))
    }
}

/// A conjunction gated by an intra-document position check.
///
/// Children are the phrase's term matchers in phrase order; a document
/// matches when some chain of positions `q_0 < q_1 < ... < q_k` exists
/// with every `q_k` within `slop` of `q_0 + k`.
#[derive(Debug)]
pub struct PhraseMatcher {
    inner: ConjunctionMatcher,
    slop: u32,
    /// Phrase occurrences in the current document.
    matches: u32,
}

impl PhraseMatcher {
    /// Create a phrase matcher, positioned on the first phrase match.
    pub fn new(children: Vec<Box<dyn Matcher>>, slop: u32) -> Result<Self> {
        let inner = ConjunctionMatcher::new(children)?;
        let mut matcher = PhraseMatcher {
            inner,
            slop,
            matches: 0,
        };
        matcher.settle()?;
        Ok(matcher)
    }

    /// Advance the conjunction until the position check passes.
    fn settle(&mut self) -> Result<()> {
        while self.inner.is_active() {
            self.matches = self.count_matches();
            if self.matches > 0 {
                return Ok(());
            }
            self.inner.next()?;
        }
        self.matches = 0;
        Ok(())
    }

    fn count_matches(&self) -> u32 {
        let position_lists: Vec<Vec<u32>> =
            self.inner.children.iter().map(|c| c.positions()).collect();
        if position_lists.iter().any(|p| p.is_empty()) {
            return 0;
        }

        let mut count = 0;
        'starts: for &start in &position_lists[0] {
            let mut prev = start;
            for (k, positions) in position_lists.iter().enumerate().skip(1) {
                let limit = start + k as u32 + self.slop;
                // Smallest position after the previous term, within the
                // slop window
                match positions.iter().find(|&&p| p > prev && p <= limit) {
                    Some(&p) => prev = p,
                    None => continue 'starts,
                }
            }
            count += 1;
        }
        count
    }
}

impl Matcher for PhraseMatcher {
    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn doc_id(&self) -> u64 {
        self.inner.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        if !self.inner.next()? {
            return Ok(false);
        }
        self.settle()?;
        Ok(self.is_active())
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        if !self.inner.skip_to(target)? {
            return Ok(false);
        }
        self.settle()?;
        Ok(self.is_active())
    }

    fn weight(&self) -> f32 {
        self.matches as f32
    }

    fn score(&self) -> f32 {
        self.inner.score()
    }

    fn supports_quality(&self) -> bool {
        self.inner.supports_quality()
    }

    fn max_quality(&self) -> f32 {
        self.inner.max_quality()
    }

    fn block_quality(&self) -> f32 {
        self.inner.block_quality()
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<bool> {
        if !self.inner.skip_to_quality(min_quality)? {
            return Ok(false);
        }
        self.settle()?;
        Ok(self.is_active())
    }

    fn cost(&self) -> u64 {
        self.inner.cost()
    }

    fn copy_matcher(&self) -> Result<Box<dyn Matcher>> {
        let children = self
            .inner
            .children
            .iter()
            .map(|c| c.copy_matcher())
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(PhraseMatcher {
            inner: ConjunctionMatcher {
                children,
                active: self.inner.active,
            },
            slop: self.slop,
            matches: self.matches,
        }))
    }
}

/// Wraps a matcher, replacing every score with a constant.
#[derive(Debug)]
pub struct ConstantScoreMatcher {
    inner: Box<dyn Matcher>,
    value: f32,
}

impl ConstantScoreMatcher {
    /// Wrap `inner`, scoring each hit as `value`.
    pub fn new(inner: Box<dyn Matcher>, value: f32) -> Self {
        ConstantScoreMatcher { inner, value }
    }
}

impl Matcher for ConstantScoreMatcher {
    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn doc_id(&self) -> u64 {
        self.inner.doc_id()
    }

    fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    fn skip_to(&mut self, target: u64) -> Result<bool> {
        self.inner.skip_to(target)
    }

    fn weight(&self) -> f32 {
        self.inner.weight()
    }

    fn score(&self) -> f32 {
        self.value
    }

    fn supports_quality(&self) -> bool {
        true
    }

    fn max_quality(&self) -> f32 {
        self.value
    }

    fn block_quality(&self) -> f32 {
        self.value
    }

    fn skip_to_quality(&mut self, min_quality: f32) -> Result<bool> {
        if self.value <= min_quality {
            // No posting can beat the threshold; exhaust
            self.inner.skip_to(NO_DOC)?;
            return Ok(false);
        }
        Ok(self.inner.is_active())
    }

    fn positions(&self) -> Vec<u32> {
        self.inner.positions()
    }

    fn cost(&self) -> u64 {
        self.inner.cost()
    }

    fn copy_matcher(&self) -> Result<Box<dyn Matcher>> {
        Ok(Box::new(ConstantScoreMatcher {
            inner: self.inner.copy_matcher()?,
            value: self.value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::postings::{Posting, PostingsCursor};
    use crate::search::scorer::ConstWeight;

    /// Term matcher over in-memory postings with constant scoring.
    fn term_matcher(docs: &[u32]) -> Box<dyn Matcher> {
        term_matcher_with_positions(&docs.iter().map(|&d| (d, vec![0u32])).collect::<Vec<_>>())
    }

    fn term_matcher_with_positions(postings: &[(u32, Vec<u32>)]) -> Box<dyn Matcher> {
        // Inline cursors only hold one posting, so chain matchers over a
        // hand-built block file instead.
        use crate::index::postings::write_postings;
        use crate::storage::structured::StructWriter;
        use crate::storage::{MemoryStorage, MemoryStorageConfig, Storage};

        let list: Vec<Posting> = postings
            .iter()
            .map(|(doc, positions)| Posting::with_positions(*doc, positions.clone()))
            .collect();

        let storage = MemoryStorage::new(MemoryStorageConfig::default());
        let output = storage.create_output("p.pst").unwrap();
        let mut writer = StructWriter::new(output);
        let pointers = write_postings(&mut writer, &list, true, &|_| 10).unwrap();
        writer.close().unwrap();

        let input = storage.open_input("p.pst").unwrap();
        let cursor = PostingsCursor::blocks(pointers, input, true).unwrap();
        Box::new(TermMatcher::new(
            cursor,
            Box::new(ConstWeight::new(1.0)),
            None,
            1,
            10,
        ))
    }

    fn collect_docs(matcher: &mut dyn Matcher) -> Vec<u64> {
        let mut docs = Vec::new();
        while matcher.is_active() {
            docs.push(matcher.doc_id());
            matcher.next().unwrap();
        }
        docs
    }

    #[test]
    fn test_conjunction_intersects() {
        let a = term_matcher(&[1, 3, 5, 7, 9]);
        let b = term_matcher(&[2, 3, 5, 8, 9]);
        let mut matcher = ConjunctionMatcher::new(vec![a, b]).unwrap();
        assert_eq!(collect_docs(&mut matcher), vec![3, 5, 9]);
    }

    #[test]
    fn test_conjunction_empty_when_disjoint() {
        let a = term_matcher(&[1, 2]);
        let b = term_matcher(&[3, 4]);
        let matcher = ConjunctionMatcher::new(vec![a, b]).unwrap();
        assert!(!matcher.is_active());
    }

    #[test]
    fn test_disjunction_unions() {
        let a = term_matcher(&[1, 5]);
        let b = term_matcher(&[2, 5, 8]);
        let mut matcher = DisjunctionMatcher::new(vec![a, b]);
        assert_eq!(collect_docs(&mut matcher), vec![1, 2, 5, 8]);
    }

    #[test]
    fn test_disjunction_scores_sum_on_shared_docs() {
        let a = term_matcher(&[5]);
        let b = term_matcher(&[5]);
        let matcher = DisjunctionMatcher::new(vec![a, b]);
        assert_eq!(matcher.doc_id(), 5);
        assert_eq!(matcher.score(), 2.0);
    }

    #[test]
    fn test_disjunction_skip_to() {
        let a = term_matcher(&[1, 4, 9]);
        let b = term_matcher(&[2, 6]);
        let mut matcher = DisjunctionMatcher::new(vec![a, b]);
        assert!(matcher.skip_to(5).unwrap());
        assert_eq!(matcher.doc_id(), 6);
        assert!(matcher.skip_to(8).unwrap());
        assert_eq!(matcher.doc_id(), 9);
        assert!(!matcher.skip_to(100).unwrap());
    }

    #[test]
    fn test_and_not_subtracts() {
        let include = term_matcher(&[1, 2, 3, 4, 5]);
        let exclude = term_matcher(&[2, 4]);
        let mut matcher = AndNotMatcher::new(include, exclude).unwrap();
        assert_eq!(collect_docs(&mut matcher), vec![1, 3, 5]);
    }

    #[test]
    fn test_phrase_requires_adjacency() {
        // doc 0: "the quick brown fox" — quick@1 fox@3 (not adjacent)
        // doc 1: "brown fox quick"     — fox@1 quick@2 (wrong order)
        // doc 2: "the quick fox"       — quick@1 fox@2 (phrase match)
        let quick = term_matcher_with_positions(&[(0, vec![1]), (1, vec![2]), (2, vec![1])]);
        let fox = term_matcher_with_positions(&[(0, vec![3]), (1, vec![1]), (2, vec![2])]);
        let mut matcher = PhraseMatcher::new(vec![quick, fox], 0).unwrap();
        assert_eq!(collect_docs(&mut matcher), vec![2]);
    }

    #[test]
    fn test_phrase_slop_allows_gap() {
        // "quick ? fox": quick@1 fox@3
        let quick = term_matcher_with_positions(&[(0, vec![1])]);
        let fox = term_matcher_with_positions(&[(0, vec![3])]);

        let matcher = PhraseMatcher::new(
            vec![
                term_matcher_with_positions(&[(0, vec![1])]),
                term_matcher_with_positions(&[(0, vec![3])]),
            ],
            0,
        )
        .unwrap();
        assert!(!matcher.is_active());

        let matcher = PhraseMatcher::new(vec![quick, fox], 1).unwrap();
        assert!(matcher.is_active());
        assert_eq!(matcher.doc_id(), 0);
    }

    #[test]
    fn test_phrase_counts_occurrences() {
        // "a b a b": a@0 a@2, b@1 b@3 — two matches of "a b"
        let a = term_matcher_with_positions(&[(0, vec![0, 2])]);
        let b = term_matcher_with_positions(&[(0, vec![1, 3])]);
        let matcher = PhraseMatcher::new(vec![a, b], 0).unwrap();
        assert_eq!(matcher.weight(), 2.0);
    }

    #[test]
    fn test_constant_score_wrapper() {
        let inner = term_matcher(&[1, 2]);
        let mut matcher = ConstantScoreMatcher::new(inner, 7.5);
        assert_eq!(matcher.score(), 7.5);
        assert_eq!(matcher.block_quality(), 7.5);

        // Threshold above the constant exhausts the matcher
        assert!(!matcher.skip_to_quality(10.0).unwrap());
        assert!(!matcher.is_active());
    }

    #[test]
    fn test_empty_and_all_matchers() {
        let mut empty = EmptyMatcher::new();
        assert!(!empty.is_active());
        assert!(!empty.next().unwrap());

        let mut all = AllMatcher::new(3, 1.0);
        assert_eq!(collect_docs(&mut all), vec![0, 1, 2]);
    }

    #[test]
    fn test_copy_preserves_position() {
        let mut matcher = term_matcher(&[1, 4, 9]);
        matcher.skip_to(4).unwrap();
        let mut copy = matcher.copy_matcher().unwrap();
        assert_eq!(copy.doc_id(), 4);
        copy.next().unwrap();
        assert_eq!(copy.doc_id(), 9);
        assert_eq!(matcher.doc_id(), 4);
    }
}

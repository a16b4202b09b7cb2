//! Lexical retrieval over vocabulary descriptions. No embeddings.
//!
//! Scores are on a 0–100 scale in the indel-similarity family:
//! `ratio = 100 * 2 * LCS(a, b) / (|a| + |b|)`.

use std::collections::HashMap;

use super::types::Retriever;
use super::RetrievalError;
use crate::models::CodedEntry;

pub const DEFAULT_SCORE_CUTOFF: f64 = 50.0;

/// Similarity function used to rank descriptions against a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scorer {
    Ratio,
    /// Best `ratio` of the shorter string against any same-length window of the longer.
    #[default]
    PartialRatio,
    /// `ratio` after sorting whitespace-separated tokens.
    TokenSortRatio,
}

impl Scorer {
    pub fn score(self, a: &str, b: &str) -> f64 {
        match self {
            Scorer::Ratio => ratio(a, b),
            Scorer::PartialRatio => partial_ratio(a, b),
            Scorer::TokenSortRatio => token_sort_ratio(a, b),
        }
    }
}

pub struct FuzzyRetriever {
    entries: Vec<CodedEntry>,
    scorer: Scorer,
    score_cutoff: f64,
    fold_case: bool,
}

impl FuzzyRetriever {
    pub fn new(entries: Vec<CodedEntry>) -> Self {
        tracing::info!(entries = entries.len(), "Fuzzy retriever ready");
        Self {
            entries,
            scorer: Scorer::default(),
            score_cutoff: DEFAULT_SCORE_CUTOFF,
            fold_case: false,
        }
    }

    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_score_cutoff(mut self, cutoff: f64) -> Self {
        self.score_cutoff = cutoff;
        self
    }

    /// Compare lowercased text.
    pub fn case_insensitive(mut self, fold: bool) -> Self {
        self.fold_case = fold;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `k` entries scoring at least `score_cutoff`, best first.
    /// Equal scores keep corpus order.
    pub fn retrieve_with(
        &self,
        query: &str,
        k: usize,
        score_cutoff: f64,
        scorer: Scorer,
    ) -> Vec<CodedEntry> {
        if k == 0 {
            return Vec::new();
        }

        let query = self.prepare(query);
        let mut scored: Vec<(f64, usize)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| {
                let score = scorer.score(&query, &self.prepare(&entry.description));
                (score >= score_cutoff).then_some((score, position))
            })
            .collect();

        // Stable: equal scores stay in corpus order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(_, position)| self.entries[position].clone())
            .collect()
    }

    fn prepare(&self, text: &str) -> String {
        if self.fold_case {
            text.to_lowercase()
        } else {
            text.to_string()
        }
    }
}

impl Retriever for FuzzyRetriever {
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<CodedEntry>, RetrievalError> {
        Ok(self.retrieve_with(query, k, self.score_cutoff, self.scorer))
    }

    fn strategy(&self) -> &'static str {
        "fuzzy"
    }
}

// ── Scorers ────────────────────────────────────────────────

pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    let (m, n) = (short.len(), long.len());
    if m == 0 {
        return if n == 0 { 100.0 } else { 0.0 };
    }

    let lcs = LcsPattern::new(short);
    let score_of = |window: &[char]| 200.0 * lcs.against(window) as f64 / (m + window.len()) as f64;

    // Windows hanging off either end, then every full-length window.
    let mut best = 0.0f64;
    for len in 1..m.min(n) {
        best = best.max(score_of(&long[..len])).max(score_of(&long[n - len..]));
    }
    for start in 0..=(n - m) {
        best = best.max(score_of(&long[start..start + m]));
        if best >= 100.0 {
            break;
        }
    }
    best
}

pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let sorted = |s: &str| {
        let mut tokens: Vec<&str> = s.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    };
    ratio(&sorted(a), &sorted(b))
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    200.0 * LcsPattern::new(short).against(long) as f64 / total as f64
}

/// Longest-common-subsequence length against a fixed pattern.
///
/// Patterns up to 64 chars use the bit-parallel recurrence
/// `V' = (V + (V & M)) | (V & !M)`; longer ones fall back to the DP table.
struct LcsPattern<'a> {
    pattern: &'a [char],
    masks: Option<HashMap<char, u64>>,
}

impl<'a> LcsPattern<'a> {
    fn new(pattern: &'a [char]) -> Self {
        let masks = (pattern.len() <= 64).then(|| {
            let mut masks: HashMap<char, u64> = HashMap::new();
            for (i, c) in pattern.iter().enumerate() {
                *masks.entry(*c).or_default() |= 1u64 << i;
            }
            masks
        });
        Self { pattern, masks }
    }

    fn against(&self, text: &[char]) -> usize {
        match &self.masks {
            Some(masks) => {
                let width = self.pattern.len();
                let live = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
                let mut v = u64::MAX;
                for c in text {
                    let m = masks.get(c).copied().unwrap_or(0);
                    let u = v & m;
                    v = v.wrapping_add(u) | (v & !m);
                }
                (!v & live).count_ones() as usize
            }
            None => lcs_table(self.pattern, text),
        }
    }
}

fn lcs_table(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// 📏 Similarity Scorer - bounded [0,1] name similarity
//
// Two interchangeable algorithms over already-normalized names:
// - Dice bigram overlap for the bulk match pass
// - Jaro-Winkler for the preflight ranking shown to reviewers

use std::collections::HashMap;

/// Scores two normalized dealer names
pub trait SimilarityScorer {
    /// Short identifier used in logs and reports
    fn name(&self) -> &'static str;

    /// Raw algorithm score, no short-circuit
    fn raw_score(&self, a: &str, b: &str) -> f64;

    /// Similarity in [0,1]; exact equality is 1.0 without invoking the algorithm
    fn score(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        self.raw_score(a, b).clamp(0.0, 1.0)
    }
}

/// Character-bigram Dice coefficient: 2·|A∩B| / (|A|+|B|)
///
/// Bigrams are taken over every char, spaces included, and counted as a
/// multiset.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiceScorer;

impl SimilarityScorer for DiceScorer {
    fn name(&self) -> &'static str {
        "dice"
    }

    fn raw_score(&self, a: &str, b: &str) -> f64 {
        let left = bigrams(a);
        let right = bigrams(b);
        if left.is_empty() || right.is_empty() {
            return 0.0;
        }

        let mut counts: HashMap<(char, char), usize> = HashMap::new();
        for pair in &left {
            *counts.entry(*pair).or_insert(0) += 1;
        }

        let mut shared = 0usize;
        for pair in &right {
            if let Some(count) = counts.get_mut(pair) {
                if *count > 0 {
                    *count -= 1;
                    shared += 1;
                }
            }
        }

        (2 * shared) as f64 / (left.len() + right.len()) as f64
    }
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Jaro-Winkler: windowed matches, transpositions, prefix bonus (p=0.1, up to 4 chars)
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinklerScorer;

impl SimilarityScorer for JaroWinklerScorer {
    fn name(&self) -> &'static str {
        "jaro_winkler"
    }

    fn raw_score(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(a, b)
    }
}

/// First whitespace-delimited token, used by the high-confidence veto
pub fn first_token(s: &str) -> &str {
    s.split_whitespace().next().unwrap_or("")
}

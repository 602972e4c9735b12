//! BM25 keyword index over the shared tokenizer.

use std::collections::{BTreeSet, HashMap};

use crate::text::tokenize;

/// Term-frequency saturation.
pub const DEFAULT_K1: f32 = 1.2;
/// Document-length normalization.
pub const DEFAULT_B: f32 = 0.75;

/// An inverted index scoring documents with Okapi BM25.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    k1: f32,
    b: f32,
    /// term → (id → term frequency)
    postings: HashMap<String, HashMap<u32, u32>>,
    /// id → (token count, distinct terms)
    documents: HashMap<u32, (u32, Vec<String>)>,
    total_tokens: u64,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new(DEFAULT_K1, DEFAULT_B)
    }
}

impl Bm25Index {
    pub fn new(k1: f32, b: f32) -> Self {
        Self { k1, b, postings: HashMap::new(), documents: HashMap::new(), total_tokens: 0 }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Index `text` under `id`, replacing any previous text for that id.
    pub fn insert(&mut self, id: u32, text: &str) {
        self.remove(id);

        let tokens = tokenize(text);
        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *frequencies.entry(token.clone()).or_insert(0) += 1;
        }

        let terms: Vec<String> = frequencies.keys().cloned().collect();
        for (term, tf) in frequencies {
            self.postings.entry(term).or_default().insert(id, tf);
        }
        self.total_tokens += tokens.len() as u64;
        self.documents.insert(id, (tokens.len() as u32, terms));
    }

    /// Remove `id` from the index. Returns whether it was present.
    pub fn remove(&mut self, id: u32) -> bool {
        let Some((length, terms)) = self.documents.remove(&id) else {
            return false;
        };
        self.total_tokens -= u64::from(length);
        for term in terms {
            if let Some(docs) = self.postings.get_mut(&term) {
                docs.remove(&id);
                if docs.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        true
    }

    fn idf(&self, document_frequency: usize) -> f32 {
        let n = self.documents.len() as f32;
        let df = document_frequency as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// The `k` best-scoring ids for `query`, best first, as `(id, score)`.
    ///
    /// Only ids containing at least one query term are returned. Equal
    /// scores are ordered by ascending id.
    pub fn search(&self, query: &str, k: usize) -> Vec<(u32, f32)> {
        if k == 0 || self.documents.is_empty() {
            return Vec::new();
        }

        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        let avg_length = self.total_tokens as f32 / self.documents.len() as f32;
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for term in &terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(docs.len());
            for (&id, &tf) in docs {
                let length = self.documents.get(&id).map(|(len, _)| *len).unwrap_or(0) as f32;
                let tf = tf as f32;
                let norm = if avg_length > 0.0 { length / avg_length } else { 1.0 };
                let score = idf * tf * (self.k1 + 1.0) / (tf + self.k1 * (1.0 - self.b + self.b * norm));
                *scores.entry(id).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(u32, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_matching_documents_only() {
        let mut index = Bm25Index::default();
        index.insert(0, "Chunk A about cats.");
        index.insert(1, "Chunk B about dogs.");
        index.insert(2, "cats and more cats");

        let results = index.search("cats", 10);
        let ids: Vec<u32> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 0]);
        assert!(results.iter().all(|(_, score)| *score > 0.0));
    }

    #[test]
    fn rarer_terms_weigh_more() {
        let mut index = Bm25Index::default();
        index.insert(0, "rust memory safety");
        index.insert(1, "rust compiler");
        index.insert(2, "rust borrow checker");

        let results = index.search("rust checker", 3);
        assert_eq!(results[0].0, 2);
    }

    #[test]
    fn reinsert_and_remove_keep_statistics_consistent() {
        let mut index = Bm25Index::default();
        index.insert(7, "alpha beta");
        index.insert(7, "gamma");
        assert_eq!(index.len(), 1);
        assert!(index.search("alpha", 5).is_empty());
        assert_eq!(index.search("gamma", 5)[0].0, 7);

        assert!(index.remove(7));
        assert!(!index.remove(7));
        assert!(index.is_empty());
        assert!(index.search("gamma", 5).is_empty());
    }
}

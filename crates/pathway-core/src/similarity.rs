use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::SimilarityConfig;
use crate::error::PathwayError;
use crate::resource::ResourceId;

/// `(column, weight)` pairs sorted by column.
pub type SparseVector = Vec<(usize, f32)>;

const STOP_WORDS: [&str; 258] = [
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all",
    "almost", "alone", "along", "already", "also", "although", "always", "am", "among",
    "amongst", "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway",
    "anywhere", "are", "around", "as", "at", "be", "became", "because", "become", "becomes",
    "becoming", "been", "before", "beforehand", "behind", "being", "below", "beside",
    "besides", "between", "beyond", "both", "but", "by", "can", "cannot", "could", "did",
    "do", "does", "doing", "done", "down", "due", "during", "each", "eg", "either", "else",
    "elsewhere", "enough", "etc", "even", "ever", "every", "everyone", "everything",
    "everywhere", "except", "few", "for", "former", "formerly", "from", "further", "had",
    "has", "have", "having", "he", "hence", "her", "here", "hereafter", "hereby", "herein",
    "hers", "herself", "him", "himself", "his", "how", "however", "i", "ie", "if", "in",
    "indeed", "into", "is", "it", "its", "itself", "just", "last", "latter", "least",
    "less", "many", "may", "me", "meanwhile", "might", "mine", "more", "moreover", "most",
    "mostly", "much", "must", "my", "myself", "namely", "neither", "never", "nevertheless",
    "next", "no", "nobody", "none", "noone", "nor", "not", "nothing", "now", "nowhere",
    "of", "off", "often", "on", "once", "one", "only", "onto", "or", "other", "others",
    "otherwise", "our", "ours", "ourselves", "out", "over", "own", "per", "perhaps",
    "please", "rather", "re", "same", "seem", "seemed", "seeming", "seems", "several",
    "she", "should", "since", "so", "some", "somehow", "someone", "something", "sometime",
    "sometimes", "somewhere", "still", "such", "than", "that", "the", "their", "theirs",
    "them", "themselves", "then", "thence", "there", "thereafter", "thereby", "therefore",
    "therein", "thereupon", "these", "they", "this", "those", "though", "through",
    "throughout", "thru", "thus", "to", "together", "too", "toward", "towards", "under",
    "until", "up", "upon", "us", "very", "via", "was", "we", "well", "were", "what",
    "whatever", "when", "whence", "whenever", "where", "whereafter", "whereas", "whereby",
    "wherein", "whereupon", "wherever", "whether", "which", "while", "whither", "who",
    "whoever", "whole", "whom", "whose", "why", "will", "with", "within", "without",
    "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityIndex {
    pub ngram_max: usize,
    pub stop_words: bool,
    /// Term to column; columns follow ascending term order.
    pub vocabulary: BTreeMap<String, usize>,
    pub idf: Vec<f32>,
    pub documents: BTreeMap<ResourceId, SparseVector>,
}

impl SimilarityIndex {
    /// Fit the vocabulary and IDF weights on `corpus` and index every document.
    ///
    /// # Errors
    /// Returns [`PathwayError::Schema`] when the corpus is empty or repeats a resource id.
    pub fn build(
        corpus: &[(ResourceId, String)],
        config: &SimilarityConfig,
    ) -> Result<Self, PathwayError> {
        if corpus.is_empty() {
            return Err(PathwayError::Schema("similarity corpus is empty".to_string()));
        }

        let mut document_terms = BTreeMap::new();
        for (resource_id, text) in corpus {
            let terms = extract_terms(text, config.ngram_max, config.stop_words);
            if document_terms.insert(*resource_id, terms).is_some() {
                return Err(PathwayError::Schema(format!(
                    "similarity corpus repeats resource {resource_id}"
                )));
            }
        }

        let mut document_frequency = BTreeMap::<&str, usize>::new();
        let mut corpus_frequency = BTreeMap::<&str, usize>::new();
        for terms in document_terms.values() {
            for (term, count) in count_terms(terms) {
                *document_frequency.entry(term).or_default() += 1;
                *corpus_frequency.entry(term).or_default() += count;
            }
        }

        let total = corpus.len();
        #[allow(clippy::cast_precision_loss)]
        let max_documents = config.max_df * total as f32;
        let mut kept = document_frequency
            .iter()
            .filter(|(_, df)| {
                #[allow(clippy::cast_precision_loss)]
                let share = **df as f32;
                **df >= config.min_df && share <= max_documents
            })
            .map(|(term, _)| (*term, corpus_frequency.get(term).copied().unwrap_or(0)))
            .collect::<Vec<_>>();
        kept.sort_by(|lhs, rhs| rhs.1.cmp(&lhs.1).then_with(|| lhs.0.cmp(rhs.0)));
        kept.truncate(config.max_features);
        let mut terms = kept.into_iter().map(|(term, _)| term.to_string()).collect::<Vec<_>>();
        terms.sort();

        #[allow(clippy::cast_precision_loss)]
        let idf = terms
            .iter()
            .map(|term| {
                let df = document_frequency.get(term.as_str()).copied().unwrap_or(0);
                (((1 + total) as f32) / ((1 + df) as f32)).ln() + 1.0
            })
            .collect::<Vec<_>>();
        let vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(column, term)| (term, column))
            .collect::<BTreeMap<_, _>>();

        if vocabulary.is_empty() {
            tracing::warn!(documents = total, "similarity vocabulary is empty after df filtering");
        }

        let mut index = Self {
            ngram_max: config.ngram_max,
            stop_words: config.stop_words,
            vocabulary,
            idf,
            documents: BTreeMap::new(),
        };
        let documents = document_terms
            .iter()
            .map(|(resource_id, terms)| (*resource_id, index.weigh(terms)))
            .collect();
        index.documents = documents;

        tracing::debug!(
            documents = total,
            vocabulary = index.vocabulary.len(),
            "built similarity index"
        );
        Ok(index)
    }

    /// Project free text into the index space. Empty when no term is in vocabulary.
    #[must_use]
    pub fn vectorize(&self, text: &str) -> SparseVector {
        self.weigh(&extract_terms(text, self.ngram_max, self.stop_words))
    }

    /// In-vocabulary terms of `text`, heaviest first.
    #[must_use]
    pub fn matched_terms(&self, text: &str) -> Vec<String> {
        let mut columns = self.vectorize(text);
        columns.sort_by(|lhs, rhs| rhs.1.total_cmp(&lhs.1).then_with(|| lhs.0.cmp(&rhs.0)));
        let by_column = self
            .vocabulary
            .iter()
            .map(|(term, column)| (*column, term.as_str()))
            .collect::<BTreeMap<_, _>>();
        columns
            .into_iter()
            .filter_map(|(column, _)| by_column.get(&column).map(|term| (*term).to_string()))
            .collect()
    }

    /// Terms a projected query shares with one resource, strongest contribution first.
    #[must_use]
    pub fn shared_terms(&self, query: &[(usize, f32)], resource_id: ResourceId) -> Vec<String> {
        let Some(document) = self.documents.get(&resource_id) else {
            return Vec::new();
        };
        let weights = document.iter().copied().collect::<BTreeMap<_, _>>();
        let mut shared = query
            .iter()
            .filter_map(|(column, weight)| {
                weights.get(column).map(|other| (*column, weight * other))
            })
            .collect::<Vec<_>>();
        shared.sort_by(|lhs, rhs| rhs.1.total_cmp(&lhs.1).then_with(|| lhs.0.cmp(&rhs.0)));
        let terms = self.vocabulary.keys().collect::<Vec<_>>();
        shared
            .into_iter()
            .filter_map(|(column, _)| terms.get(column).map(|term| (*term).clone()))
            .collect()
    }

    /// Cosine between a projected query and one indexed resource; 0 when unknown.
    #[must_use]
    pub fn cosine(&self, query: &[(usize, f32)], resource_id: ResourceId) -> f32 {
        self.documents.get(&resource_id).map_or(0.0, |document| sparse_dot(query, document))
    }

    #[must_use]
    pub fn score(&self, text: &str, resource_id: ResourceId) -> f32 {
        self.cosine(&self.vectorize(text), resource_id)
    }

    /// Similarity of `text` to every indexed resource, best first, ties by ascending id.
    #[must_use]
    pub fn query(&self, text: &str) -> Vec<(ResourceId, f32)> {
        let query = self.vectorize(text);
        let mut scored = self
            .documents
            .iter()
            .map(|(resource_id, document)| (*resource_id, sparse_dot(&query, document)))
            .collect::<Vec<_>>();
        scored.sort_by(|lhs, rhs| rhs.1.total_cmp(&lhs.1).then_with(|| lhs.0.cmp(&rhs.0)));
        scored
    }

    #[must_use]
    pub fn top_k(&self, text: &str, k: usize) -> Vec<(ResourceId, f32)> {
        let mut scored = self.query(text);
        scored.truncate(k);
        scored
    }

    /// Resources whose indexed text resembles `resource_id`'s, best first, ties by
    /// ascending id. The resource itself and scores below `min_similarity` are
    /// dropped; an unindexed id has no neighbours.
    #[must_use]
    pub fn similar_to(
        &self,
        resource_id: ResourceId,
        k: usize,
        min_similarity: f32,
    ) -> Vec<(ResourceId, f32)> {
        let Some(anchor) = self.documents.get(&resource_id) else {
            return Vec::new();
        };
        let mut scored = self
            .documents
            .iter()
            .filter(|(other, _)| **other != resource_id)
            .map(|(other, document)| (*other, sparse_dot(anchor, document)))
            .filter(|(_, score)| *score > 0.0 && *score >= min_similarity)
            .collect::<Vec<_>>();
        scored.sort_by(|lhs, rhs| rhs.1.total_cmp(&lhs.1).then_with(|| lhs.0.cmp(&rhs.0)));
        scored.truncate(k);
        scored
    }

    fn weigh(&self, terms: &[String]) -> SparseVector {
        let mut weights = BTreeMap::<usize, f32>::new();
        for term in terms {
            if let Some(column) = self.vocabulary.get(term) {
                *weights.entry(*column).or_default() += 1.0;
            }
        }
        let mut vector = weights
            .into_iter()
            .map(|(column, count)| (column, count * self.idf.get(column).copied().unwrap_or(1.0)))
            .collect::<Vec<_>>();
        let norm = vector.iter().map(|(_, weight)| weight * weight).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, weight) in &mut vector {
                *weight /= norm;
            }
        }
        vector
    }
}

fn sparse_dot(lhs: &[(usize, f32)], rhs: &[(usize, f32)]) -> f32 {
    let (mut i, mut j, mut total) = (0, 0, 0.0_f32);
    while i < lhs.len() && j < rhs.len() {
        match lhs[i].0.cmp(&rhs[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                total += lhs[i].1 * rhs[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    total.clamp(0.0, 1.0)
}

fn count_terms(terms: &[String]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for term in terms {
        *counts.entry(term.as_str()).or_default() += 1;
    }
    counts
}

/// Lowercase, strip accents, and split into tokens of at least two alphanumerics.
#[must_use]
pub fn tokenize(text: &str, stop_words: bool) -> Vec<String> {
    let folded = text
        .to_lowercase()
        .nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect::<String>();
    folded
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .filter(|token| !stop_words || STOP_WORDS.binary_search(token).is_err())
        .map(str::to_string)
        .collect()
}

/// Tokens plus every n-gram up to `ngram_max`, joined by single spaces.
#[must_use]
pub fn extract_terms(text: &str, ngram_max: usize, stop_words: bool) -> Vec<String> {
    let tokens = tokenize(text, stop_words);
    let mut terms = tokens.clone();
    for size in 2..=ngram_max.max(1) {
        terms.extend(tokens.windows(size).map(|window| window.join(" ")));
    }
    terms
}

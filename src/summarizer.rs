//! Cluster summarization (spec §4.1 steps 4 and 8)
//!
//! Summarizer implementations are a pluggable capability, like the
//! embedder: the engine calls one over a single-link cluster of similar
//! records and attaches the resulting text to every member. Failures here
//! are swallowed (spec §7 kind 3) — a missing summary never fails a write
//! or a read.

use crate::metadata::cosine_similarity;
use crate::record::MemoryRecord;

#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum SummarizeError {
    #[error("summarization failed: {0}")]
    Failed(String),
}

pub trait Summarizer: Send + Sync {
    fn summarize(&self, cluster: &[MemoryRecord]) -> Result<String, SummarizeError>;
}

/// A deterministic, dependency-free summarizer: concatenates a truncated
/// prefix of each member's content. Good enough as a default and for tests;
/// a real deployment plugs in an LLM-backed `Summarizer` (out of scope here,
/// spec §1).
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatSummarizer {
    pub max_chars_per_member: usize,
}

impl ConcatSummarizer {
    pub fn new() -> Self {
        Self { max_chars_per_member: 60 }
    }
}

impl Summarizer for ConcatSummarizer {
    fn summarize(&self, cluster: &[MemoryRecord]) -> Result<String, SummarizeError> {
        if cluster.is_empty() {
            return Err(SummarizeError::Failed("empty cluster".to_string()));
        }
        let parts: Vec<String> = cluster
            .iter()
            .map(|r| {
                let content = r.content.trim();
                if content.chars().count() > self.max_chars_per_member {
                    content.chars().take(self.max_chars_per_member).collect::<String>() + "..."
                } else {
                    content.to_string()
                }
            })
            .collect();
        Ok(parts.join("; "))
    }
}

/// Partition `records` into single-link clusters: two records are in the
/// same cluster iff connected by a chain of pairwise cosine similarities
/// each `>= threshold`. Returns groups of indices into `records`.
pub fn single_link_clusters(records: &[MemoryRecord], threshold: f32) -> Vec<Vec<usize>> {
    let n = records.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if cosine_similarity(&records[i].embedding, &records[j].embedding) >= threshold {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        }
    }

    let mut groups: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rec(content: &str, embedding: Vec<f32>) -> MemoryRecord {
        let mut r = MemoryRecord::new("s", content, Utc::now());
        r.embedding = embedding;
        r
    }

    #[test]
    fn clusters_transitively_connected_records() {
        let records = vec![
            rec("a", vec![1.0, 0.0]),
            rec("b", vec![0.99, 0.14]),
            rec("c", vec![0.0, 1.0]),
        ];
        let clusters = single_link_clusters(&records, 0.9);
        assert_eq!(clusters.len(), 2);
        let sizes: Vec<usize> = {
            let mut s: Vec<usize> = clusters.iter().map(|c| c.len()).collect();
            s.sort();
            s
        };
        assert_eq!(sizes, vec![1, 2]);
    }

    #[test]
    fn concat_summarizer_truncates_long_members() {
        let s = ConcatSummarizer { max_chars_per_member: 5 };
        let records = vec![rec("abcdefgh", vec![]), rec("xy", vec![])];
        let summary = s.summarize(&records).unwrap();
        assert_eq!(summary, "abcde...; xy");
    }

    #[test]
    fn concat_summarizer_rejects_empty_cluster() {
        let s = ConcatSummarizer::new();
        assert!(s.summarize(&[]).is_err());
    }
}

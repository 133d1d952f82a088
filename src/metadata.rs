//! Metadata normalization and vector math (spec §4.6)

use crate::record::{EdgeType, GraphEdge};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// The result of normalizing a caller-supplied metadata blob: the hydrated
/// scalar fields plus the sanitized graph edges / multi-vectors, and the
/// deterministically re-serialized JSON string that gets persisted.
#[derive(Debug, Clone)]
pub struct NormalizedMetadata {
    pub importance: f32,
    pub source: String,
    pub summary: Option<String>,
    pub last_embedded: DateTime<Utc>,
    pub graph_edges: Vec<GraphEdge>,
    pub multi_embeddings: Vec<Vec<f32>>,
    pub json: String,
}

/// Clone `meta`, coerce/clamp its scalar fields, sanitize `graph_edges` and
/// `multi_embeddings`, and re-marshal deterministically (fixed key order, so
/// `normalize_metadata(x).json` is stable across calls with the same input).
pub fn normalize_metadata(meta: Option<&Value>, fallback_time: DateTime<Utc>) -> NormalizedMetadata {
    let empty = Map::new();
    let obj = meta.and_then(Value::as_object).unwrap_or(&empty);

    let importance = obj
        .get("importance")
        .map(coerce_to_f32)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    let source = obj
        .get("source")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "default".to_string());

    let summary = obj
        .get("summary")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let last_embedded = obj
        .get("last_embedded")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fallback_time);

    let graph_edges = obj
        .get("graph_edges")
        .and_then(Value::as_array)
        .map(|arr| sanitize_graph_edges(arr))
        .unwrap_or_default();

    let multi_embeddings = obj
        .get("multi_embeddings")
        .and_then(Value::as_array)
        .map(|arr| sanitize_multi_embeddings(arr))
        .unwrap_or_default();

    let mut out = Map::new();
    out.insert("importance".to_string(), Value::from(importance));
    out.insert("source".to_string(), Value::from(source.clone()));
    if let Some(s) = &summary {
        out.insert("summary".to_string(), Value::from(s.clone()));
    }
    out.insert(
        "last_embedded".to_string(),
        Value::from(last_embedded.to_rfc3339_opts(SecondsFormat::Nanos, true)),
    );
    out.insert(
        "graph_edges".to_string(),
        Value::Array(
            graph_edges
                .iter()
                .map(|e| {
                    let mut m = Map::new();
                    m.insert("target".to_string(), Value::from(e.target));
                    m.insert("type".to_string(), Value::from(e.edge_type.as_str()));
                    Value::Object(m)
                })
                .collect(),
        ),
    );
    out.insert(
        "multi_embeddings".to_string(),
        Value::Array(
            multi_embeddings
                .iter()
                .map(|v| Value::Array(v.iter().map(|f| Value::from(*f as f64)).collect()))
                .collect(),
        ),
    );

    NormalizedMetadata {
        importance,
        source,
        summary,
        last_embedded,
        graph_edges,
        multi_embeddings,
        json: Value::Object(out).to_string(),
    }
}

/// Lazily fill zero-valued fields on `rec` from `norm`, never overriding
/// values already set explicitly.
pub fn hydrate_record_from_metadata(rec: &mut crate::record::MemoryRecord, norm: &NormalizedMetadata) {
    if rec.importance == 0.0 {
        rec.importance = norm.importance;
    }
    if rec.source.is_empty() {
        rec.source = norm.source.clone();
    }
    if rec.summary.is_none() {
        rec.summary = norm.summary.clone();
    }
    if rec.graph_edges.is_empty() {
        rec.graph_edges = norm.graph_edges.clone();
    }
    if rec.multi_embeddings.is_empty() {
        rec.multi_embeddings = norm.multi_embeddings.clone();
    }
}

fn coerce_to_f32(v: &Value) -> f32 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0) as f32,
        Value::String(s) => s.parse::<f32>().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn sanitize_graph_edges(arr: &[Value]) -> Vec<GraphEdge> {
    arr.iter()
        .filter_map(|v| {
            let obj = v.as_object()?;
            let target = obj.get("target")?.as_u64()?;
            let ty = obj.get("type")?.as_str()?;
            GraphEdge::new(target, EdgeType::parse(ty)?)
        })
        .collect()
}

fn sanitize_multi_embeddings(arr: &[Value]) -> Vec<Vec<f32>> {
    arr.iter()
        .filter_map(|v| {
            let row = v.as_array()?;
            Some(
                row.iter()
                    .filter_map(|f| f.as_f64().map(|f| f as f32))
                    .collect::<Vec<f32>>(),
            )
        })
        .filter(|row: &Vec<f32>| !row.is_empty())
        .collect()
}

/// Cosine similarity truncated to the shorter of the two vectors. Returns
/// `0.0` if either (truncated) vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Max cosine similarity over the Cartesian product of `queries` and
/// `candidates`. Used for colbert-style max-sim scoring across
/// multi-vectors.
pub fn max_cosine_similarity(queries: &[Vec<f32>], candidates: &[Vec<f32>]) -> f32 {
    let mut best = 0.0f32;
    for q in queries {
        for c in candidates {
            let sim = cosine_similarity(q, c);
            if sim > best {
                best = sim;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_is_zero_for_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_truncates_to_shorter_vector() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_defaults_missing_fields() {
        let now = Utc::now();
        let norm = normalize_metadata(None, now);
        assert_eq!(norm.importance, 0.0);
        assert_eq!(norm.source, "default");
        assert!(norm.summary.is_none());
        assert_eq!(norm.last_embedded, now);
        assert!(norm.graph_edges.is_empty());
    }

    #[test]
    fn normalize_clamps_importance_and_drops_invalid_edges() {
        let meta = serde_json::json!({
            "importance": 5.0,
            "graph_edges": [
                {"target": 0, "type": "follows"},
                {"target": 7, "type": "bogus"},
                {"target": 7, "type": "explains"},
            ]
        });
        let norm = normalize_metadata(Some(&meta), Utc::now());
        assert_eq!(norm.importance, 1.0);
        assert_eq!(norm.graph_edges.len(), 1);
        assert_eq!(norm.graph_edges[0].target, 7);
    }

    #[test]
    fn round_trip_is_idempotent() {
        let meta = serde_json::json!({"importance": 0.4, "source": "slack"});
        let first = normalize_metadata(Some(&meta), Utc::now());
        let decoded: Value = serde_json::from_str(&first.json).unwrap();
        let second = normalize_metadata(Some(&decoded), Utc::now());
        assert_eq!(first.importance, second.importance);
        assert_eq!(first.source, second.source);
    }
}

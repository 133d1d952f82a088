//! Relational backend (spec §6)
//!
//! Implements the `memory_bank` / `memory_nodes` / `memory_edges` schema
//! over `rusqlite`, following the teacher crate's single-writer-connection
//! pattern (`storage/sqlite.rs`: `Mutex<Connection>`, `PRAGMA` tuning on
//! open). No native vector extension is assumed; the embedding column is a
//! little-endian `f32` blob and ranking happens in Rust after a bounded scan
//! — this is still a "relational backend" per spec §6, just one where the
//! ANN index is a deployment choice, not a Rust-side assumption.

use super::{GraphStore, Result, SchemaInitializer, StoreError, VectorStore};
use crate::cancel::CancelToken;
use crate::metadata::{self, cosine_similarity};
use crate::record::{EdgeType, GraphEdge, MemoryRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        let store = Self { conn: Mutex::new(conn) };
        store.create_schema(path)?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn check(cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    fn encode_vec(v: &[f32]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(v.len() * 4);
        for f in v {
            buf.extend_from_slice(&f.to_le_bytes());
        }
        buf
    }

    fn decode_vec(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MemoryRecord> {
        let embedding_blob: Vec<u8> = row.get("embedding")?;
        let created_at: String = row.get("created_at")?;
        let last_embedded: String = row.get("last_embedded")?;
        let summary: Option<String> = row.get("summary")?;
        Ok(MemoryRecord {
            id: row.get::<_, i64>("id")? as u64,
            session_id: row.get("session_id")?,
            space: row.get("space")?,
            content: row.get("content")?,
            metadata: row.get("metadata")?,
            embedding: Self::decode_vec(&embedding_blob),
            multi_embeddings: Vec::new(),
            importance: row.get::<_, f64>("importance")? as f32,
            source: row.get("source")?,
            summary,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            last_embedded: DateTime::parse_from_rfc3339(&last_embedded)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            graph_edges: Vec::new(),
            score: 0.0,
            weighted_score: 0.0,
        })
    }

    fn load_edges(conn: &Connection, id: u64) -> rusqlite::Result<Vec<GraphEdge>> {
        let mut stmt = conn.prepare("SELECT to_memory, edge_type FROM memory_edges WHERE from_memory = ?1")?;
        let rows = stmt.query_map(params![id as i64], |row| {
            let target: i64 = row.get(0)?;
            let ty: String = row.get(1)?;
            Ok((target as u64, ty))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (target, ty) = row?;
            if let Some(edge_type) = EdgeType::parse(&ty) {
                if let Some(edge) = GraphEdge::new(target, edge_type) {
                    out.push(edge);
                }
            }
        }
        Ok(out)
    }
}

impl SchemaInitializer for SqliteStore {
    fn create_schema(&self, _path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_bank (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                space TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                importance REAL NOT NULL,
                source TEXT NOT NULL,
                summary TEXT,
                last_embedded TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS memory_bank_session_idx ON memory_bank(session_id);

            CREATE TABLE IF NOT EXISTS memory_nodes (
                memory_id INTEGER PRIMARY KEY REFERENCES memory_bank(id),
                space TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memory_edges (
                from_memory INTEGER NOT NULL,
                to_memory INTEGER NOT NULL,
                edge_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (from_memory, to_memory, edge_type)
            );
            CREATE INDEX IF NOT EXISTS memory_edges_to_idx ON memory_edges(to_memory);",
        )?;
        Ok(())
    }
}

impl VectorStore for SqliteStore {
    fn store_memory(
        &self,
        cancel: &CancelToken,
        session_id: &str,
        space: &str,
        content: &str,
        metadata: Option<&serde_json::Value>,
        embedding: Vec<f32>,
    ) -> Result<MemoryRecord> {
        Self::check(cancel)?;
        let now = Utc::now();
        let norm = metadata::normalize_metadata(metadata, now);
        let conn = self.conn.lock().unwrap();
        let created_at = now.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let last_embedded = norm.last_embedded.to_rfc3339_opts(SecondsFormat::Nanos, true);
        conn.execute(
            "INSERT INTO memory_bank (session_id, space, content, metadata, embedding, importance, source, summary, last_embedded, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session_id,
                space,
                content,
                norm.json,
                Self::encode_vec(&embedding),
                norm.importance as f64,
                norm.source,
                norm.summary,
                last_embedded,
                created_at,
            ],
        )?;
        let id = conn.last_insert_rowid() as u64;
        conn.execute(
            "INSERT INTO memory_nodes (memory_id, space, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![id as i64, space, created_at],
        )?;
        Ok(MemoryRecord {
            id,
            session_id: session_id.to_string(),
            space: space.to_string(),
            content: content.to_string(),
            metadata: norm.json,
            embedding,
            multi_embeddings: norm.multi_embeddings,
            importance: norm.importance,
            source: norm.source,
            summary: norm.summary,
            created_at: now,
            last_embedded: norm.last_embedded,
            graph_edges: norm.graph_edges,
            score: 0.0,
            weighted_score: 0.0,
        })
    }

    fn search_memory(&self, cancel: &CancelToken, query_embedding: &[f32], limit: usize) -> Result<Vec<MemoryRecord>> {
        Self::check(cancel)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM memory_bank")?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        let mut scored = Vec::new();
        for row in rows {
            let mut rec = row?;
            rec.score = cosine_similarity(query_embedding, &rec.embedding);
            scored.push(rec);
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn update_embedding(&self, cancel: &CancelToken, id: u64, embedding: Vec<f32>, last_embedded: DateTime<Utc>) -> Result<()> {
        Self::check(cancel)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE memory_bank SET embedding = ?1, last_embedded = ?2 WHERE id = ?3",
            params![
                Self::encode_vec(&embedding),
                last_embedded.to_rfc3339_opts(SecondsFormat::Nanos, true),
                id as i64
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn delete_memory(&self, cancel: &CancelToken, ids: &[u64]) -> Result<()> {
        Self::check(cancel)?;
        let conn = self.conn.lock().unwrap();
        for id in ids {
            conn.execute("DELETE FROM memory_bank WHERE id = ?1", params![*id as i64])?;
            conn.execute("DELETE FROM memory_nodes WHERE memory_id = ?1", params![*id as i64])?;
            conn.execute(
                "DELETE FROM memory_edges WHERE from_memory = ?1 OR to_memory = ?1",
                params![*id as i64],
            )?;
        }
        Ok(())
    }

    fn iterate(&self, cancel: &CancelToken, f: &mut dyn FnMut(&MemoryRecord) -> bool) -> Result<()> {
        Self::check(cancel)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM memory_bank ORDER BY id ASC")?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        for row in rows {
            let rec = row?;
            if !f(&rec) {
                break;
            }
        }
        Ok(())
    }

    fn count(&self, cancel: &CancelToken) -> Result<usize> {
        Self::check(cancel)?;
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM memory_bank", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn as_schema_initializer(&self) -> Option<&dyn SchemaInitializer> {
        Some(self)
    }

    fn as_graph_store(&self) -> Option<&dyn GraphStore> {
        Some(self)
    }
}

impl GraphStore for SqliteStore {
    fn upsert_graph(&self, cancel: &CancelToken, record_id: u64, edges: &[GraphEdge]) -> Result<()> {
        Self::check(cancel)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memory_edges WHERE from_memory = ?1", params![record_id as i64])?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        for edge in edges {
            if edge.target == 0 {
                continue;
            }
            let exists: Option<i64> = tx
                .query_row("SELECT id FROM memory_bank WHERE id = ?1", params![edge.target as i64], |r| r.get(0))
                .optional()?;
            if exists.is_none() {
                continue;
            }
            tx.execute(
                "INSERT OR REPLACE INTO memory_edges (from_memory, to_memory, edge_type, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![record_id as i64, edge.target as i64, edge.edge_type.as_str(), now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn neighborhood(&self, cancel: &CancelToken, seeds: &[u64], hops: u32, limit: usize) -> Result<Vec<MemoryRecord>> {
        Self::check(cancel)?;
        if hops == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let mut visited: std::collections::HashSet<u64> = seeds.iter().copied().collect();
        let mut frontier: Vec<u64> = seeds.to_vec();
        let mut out_ids: Vec<u64> = Vec::new();

        for _ in 0..hops {
            if frontier.is_empty() || out_ids.len() >= limit {
                break;
            }
            let mut next_frontier = Vec::new();
            for node in &frontier {
                for edge in Self::load_edges(&conn, *node)? {
                    if visited.insert(edge.target) {
                        out_ids.push(edge.target);
                        next_frontier.push(edge.target);
                        if out_ids.len() >= limit {
                            break;
                        }
                    }
                }
                if out_ids.len() >= limit {
                    break;
                }
            }
            frontier = next_frontier;
        }

        out_ids.truncate(limit);
        let mut stmt = conn.prepare("SELECT * FROM memory_bank WHERE id = ?1")?;
        let mut out = Vec::new();
        for id in out_ids {
            if let Some(rec) = stmt.query_row(params![id as i64], Self::row_to_record).optional()? {
                out.push(rec);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancelToken {
        CancelToken::never()
    }

    #[test]
    fn round_trips_a_record() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rec = store
            .store_memory(&token(), "s1", "s1", "hello world", None, vec![1.0, 0.0])
            .unwrap();
        let found = store.search_memory(&token(), &[1.0, 0.0], 1).unwrap();
        assert_eq!(found[0].id, rec.id);
        assert_eq!(found[0].content, "hello world");
    }

    #[test]
    fn update_unknown_id_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.update_embedding(&token(), 42, vec![1.0], Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[test]
    fn graph_neighborhood_walks_edges() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.store_memory(&token(), "s", "s", "a", None, vec![]).unwrap();
        let b = store.store_memory(&token(), "s", "s", "b", None, vec![]).unwrap();
        store
            .upsert_graph(&token(), a.id, &[GraphEdge::new(b.id, EdgeType::Follows).unwrap()])
            .unwrap();
        let neighbors = store.neighborhood(&token(), &[a.id], 1, 10).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].id, b.id);
    }

    #[test]
    fn delete_then_count_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rec = store.store_memory(&token(), "s", "s", "x", None, vec![]).unwrap();
        store.delete_memory(&token(), &[rec.id]).unwrap();
        store.delete_memory(&token(), &[rec.id]).unwrap();
        assert_eq!(store.count(&token()).unwrap(), 0);
    }
}

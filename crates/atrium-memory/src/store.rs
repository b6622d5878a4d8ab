use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use atrium_core::error::{AtriumError, Result};
use atrium_core::traits::KnowledgeBase;
use atrium_core::types::{Evidence, RetrievalRequest};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS passages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        uri TEXT NOT NULL,
        content TEXT NOT NULL
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS passages_fts USING fts5(
        title,
        content,
        uri UNINDEXED,
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS passages_ai AFTER INSERT ON passages BEGIN
        INSERT INTO passages_fts(rowid, title, content, uri)
        VALUES (new.id, new.title, new.content, new.uri);
    END;
";

/// Upper bound on terms in one search expression.
const MAX_TERMS: usize = 48;

/// A manual passage returned by a search.
#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub id: i64,
    pub title: String,
    pub uri: String,
    pub content: String,
    /// Relevance; higher is better.
    pub score: f64,
}

/// SQLite-backed store of building-manual passages with FTS5 search.
pub struct KnowledgeStore {
    conn: Mutex<Connection>,
    max_results: usize,
}

fn db_err(e: rusqlite::Error) -> AtriumError {
    AtriumError::Database(e.to_string())
}

impl KnowledgeStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path, max_results: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AtriumError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "Knowledge store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            max_results,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory(max_results: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_results,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AtriumError::Database(e.to_string()))
    }

    /// Insert a single passage and return its id.
    pub fn add_passage(&self, title: &str, uri: &str, content: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO passages (title, uri, content) VALUES (?1, ?2, ?3)",
            params![title, uri, content],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Split a document into paragraph passages (blank-line separated) and
    /// insert them in one transaction. Returns the number of passages stored.
    pub fn ingest_document(&self, title: &str, uri: &str, text: &str) -> Result<usize> {
        let paragraphs = split_paragraphs(text);
        if paragraphs.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO passages (title, uri, content) VALUES (?1, ?2, ?3)")
                .map_err(db_err)?;
            for paragraph in &paragraphs {
                stmt.execute(params![title, uri, paragraph]).map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;

        debug!(title, uri, passages = paragraphs.len(), "Document ingested");
        Ok(paragraphs.len())
    }

    /// Number of stored passages.
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM passages", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(n as usize)
    }

    /// Full-text search over free text. Any term may match; results are
    /// ordered by relevance. Text without searchable terms yields no results.
    pub fn search(&self, text: &str, limit: usize) -> Result<Vec<Passage>> {
        let terms = search_terms(text);
        self.run_search(&terms, limit)
    }

    fn run_search(&self, terms: &[String], limit: usize) -> Result<Vec<Passage>> {
        let Some(expr) = match_expression(terms) else {
            return Ok(Vec::new());
        };

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT rowid, title, uri, content, rank
                 FROM passages_fts
                 WHERE passages_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![expr, limit as i64], |row| {
                let rank: f64 = row.get(4)?;
                Ok(Passage {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    uri: row.get(2)?,
                    content: row.get(3)?,
                    score: -rank,
                })
            })
            .map_err(db_err)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(db_err)?);
        }
        Ok(results)
    }
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(|p| p.lines().map(str::trim).collect::<Vec<_>>().join(" "))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Lowercased word terms of `text`, in first-seen order, without duplicates.
fn search_terms(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Quoted OR expression, so user text can never inject FTS5 syntax.
fn match_expression(terms: &[String]) -> Option<String> {
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .take(MAX_TERMS)
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// String leaves of a JSON value.
fn collect_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn retrieval_text(request: &RetrievalRequest) -> String {
    let mut parts = vec![request.query.clone()];
    for evidence in &request.evidence {
        if let Evidence::Data { data, .. } = evidence {
            collect_strings(data, &mut parts);
        }
    }
    if let Some(guidance) = &request.guidance {
        parts.push(guidance.clone());
    }
    parts.join(" ")
}

fn format_passages(passages: &[Passage]) -> String {
    let mut out = String::from("Reference manual information:\n");
    for (i, p) in passages.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} ({}) score {:.2}\n{}\n",
            i + 1,
            p.title,
            p.uri,
            p.score,
            p.content
        ));
    }
    out
}

impl KnowledgeBase for KnowledgeStore {
    fn retrieve(&self, request: RetrievalRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let text = retrieval_text(&request);
            // Query terms first so they survive the term cap
            let terms = search_terms(&text);
            let passages = self
                .run_search(&terms, self.max_results)
                .map_err(|e| AtriumError::Knowledge(e.to_string()))?;

            debug!(terms = terms.len(), hits = passages.len(), "Knowledge retrieval");
            if passages.is_empty() {
                return Ok(String::new());
            }
            Ok(format_passages(&passages))
        })
    }
}

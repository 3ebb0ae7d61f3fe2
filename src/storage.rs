use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::hypothesis::ValidationRecord;
use crate::lifecycle::LivePuzzle;
use crate::logging::{log, obj, v_num, Domain, Level};

/// SQLite archive for retired puzzles and validation history. Rows carry a
/// few indexed columns plus the full record as JSON.
pub struct ArchiveStore {
    conn: Connection,
}

impl ArchiveStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening archive {}", path))?;
        let mut store = Self { conn };
        store.init()?;
        Ok(store)
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS retired_puzzles (
                puzzle_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                archived_at INTEGER NOT NULL,
                attempts INTEGER NOT NULL,
                completions INTEGER NOT NULL,
                average_accuracy REAL NOT NULL,
                body TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS validations (
                ts INTEGER NOT NULL,
                hypothesis_id TEXT NOT NULL,
                accuracy REAL NOT NULL,
                outcome TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn archive_puzzles(&mut self, at: DateTime<Utc>, puzzles: &[LivePuzzle]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        for lp in puzzles {
            let body = serde_json::to_string(lp)?;
            tx.execute(
                "INSERT OR REPLACE INTO retired_puzzles
                 (puzzle_id, symbol, status, archived_at, attempts, completions, average_accuracy, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    lp.puzzle.id,
                    lp.event.symbol,
                    lp.status.as_str(),
                    at.timestamp_millis(),
                    lp.attempts as i64,
                    lp.completions as i64,
                    lp.average_accuracy,
                    body
                ],
            )?;
        }
        tx.commit()?;
        log(
            Level::Info,
            Domain::Storage,
            "puzzles_archived",
            obj(&[("count", v_num(puzzles.len() as f64))]),
        );
        Ok(puzzles.len())
    }

    pub fn record_validations<'a>(&mut self, records: impl IntoIterator<Item = &'a ValidationRecord>) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut n = 0;
        for r in records {
            tx.execute(
                "INSERT INTO validations (ts, hypothesis_id, accuracy, outcome) VALUES (?1, ?2, ?3, ?4)",
                params![r.at.timestamp_millis(), r.hypothesis_id, r.accuracy, r.outcome],
            )?;
            n += 1;
        }
        tx.commit()?;
        Ok(n)
    }

    pub fn load_archived(&self) -> Result<Vec<LivePuzzle>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM retired_puzzles ORDER BY archived_at, puzzle_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in rows {
            out.push(serde_json::from_str(&body?).context("decoding archived puzzle")?);
        }
        Ok(out)
    }

    pub fn archived_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM retired_puzzles", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn validation_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM validations", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validations_round_trip_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let mut store = ArchiveStore::open(path.to_str().unwrap()).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let records = vec![
            ValidationRecord { at, hypothesis_id: "h1".into(), accuracy: 0.7, outcome: "rise".into() },
            ValidationRecord { at, hypothesis_id: "h2".into(), accuracy: 0.3, outcome: "fall".into() },
        ];
        assert_eq!(store.record_validations(&records).unwrap(), 2);
        assert_eq!(store.validation_count().unwrap(), 2);
        assert_eq!(store.archived_count().unwrap(), 0);
        assert!(store.load_archived().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");
        let p = path.to_str().unwrap();
        drop(ArchiveStore::open(p).unwrap());
        let store = ArchiveStore::open(p).unwrap();
        assert_eq!(store.validation_count().unwrap(), 0);
    }
}

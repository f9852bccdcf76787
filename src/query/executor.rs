//! Textual query execution
//!
//! Parses a statement and runs it against a [`Database`]. The time window
//! always covers the last 24 hours of wall-clock time, with timestamps
//! interpreted as seconds since the Unix epoch.

use crate::query::ast::{AggregateFunc, Statement};
use crate::query::error::QueryResult;
use crate::query::parser::parse_statement;
use crate::storage::{Database, TimePoint};
use chrono::Utc;

/// Width of the implicit query window, in seconds
const DEFAULT_WINDOW_SECS: u64 = 24 * 3600;

/// Result of executing a textual query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Raw points from a `SELECT metric FROM metric` statement
    Points(Vec<TimePoint>),
    /// Single aggregate value; `0.0` when no points matched
    Value(f64),
}

/// Parse and execute a textual query over the last 24 hours
pub fn execute(db: &Database, input: &str) -> QueryResult<QueryOutput> {
    let statement = parse_statement(input)?;
    let (start, end) = default_window();

    match statement {
        Statement::Select { metric } => Ok(QueryOutput::Points(db.query(
            &metric.name,
            start,
            end,
            &metric.tags,
        ))),
        Statement::Aggregate { func, metric } => {
            let value = match func {
                AggregateFunc::Avg => db.avg(&metric.name, start, end, &metric.tags),
                AggregateFunc::Sum => db.sum(&metric.name, start, end, &metric.tags),
                AggregateFunc::Min => db.min(&metric.name, start, end, &metric.tags),
                AggregateFunc::Max => db.max(&metric.name, start, end, &metric.tags),
                AggregateFunc::Count => db.count(&metric.name, start, end, &metric.tags) as f64,
            };
            Ok(QueryOutput::Value(value))
        }
    }
}

fn default_window() -> (u64, u64) {
    let end = Utc::now().timestamp().max(0) as u64;
    (end.saturating_sub(DEFAULT_WINDOW_SECS), end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryError;
    use crate::storage::{DatabaseConfig, WalSyncMode};
    use std::time::Duration;
    use tempfile::tempdir;

    fn open_db(dir: &std::path::Path) -> Database {
        Database::open_with_config(
            "query_test",
            DatabaseConfig {
                base_dir: dir.to_path_buf(),
                flush_interval: Duration::from_millis(20),
                wal_sync: WalSyncMode::None,
            },
        )
        .unwrap()
    }

    fn now() -> u64 {
        Utc::now().timestamp() as u64
    }

    #[test]
    fn test_execute_aggregates() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        let base = now() - 100;
        for (offset, value) in [(10, 10.0), (20, 20.0), (30, 30.0), (40, 40.0)] {
            db.write(TimePoint::new("m", base + offset, value)).unwrap();
        }
        db.flush().unwrap();

        assert_eq!(
            execute(&db, "SELECT avg(m) FROM m").unwrap(),
            QueryOutput::Value(25.0)
        );
        assert_eq!(
            execute(&db, "SELECT sum(m) FROM m").unwrap(),
            QueryOutput::Value(100.0)
        );
        assert_eq!(
            execute(&db, "SELECT min(m) FROM m").unwrap(),
            QueryOutput::Value(10.0)
        );
        assert_eq!(
            execute(&db, "SELECT max(m) FROM m").unwrap(),
            QueryOutput::Value(40.0)
        );
        assert_eq!(
            execute(&db, "SELECT count(m) FROM m").unwrap(),
            QueryOutput::Value(4.0)
        );
    }

    #[test]
    fn test_execute_raw_select() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        let base = now() - 50;
        db.write(TimePoint::new("raw", base, 1.0)).unwrap();
        db.write(TimePoint::new("raw", base + 1, 2.0)).unwrap();
        db.flush().unwrap();

        match execute(&db, "SELECT raw FROM raw").unwrap() {
            QueryOutput::Points(points) => {
                assert_eq!(points.len(), 2);
                assert_eq!(points[0].value, 1.0);
            }
            other => panic!("expected points, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_window_excludes_old_points() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        // Two days ago: outside the 24-hour window
        db.write(TimePoint::new("old", now() - 2 * 24 * 3600, 99.0))
            .unwrap();
        db.write(TimePoint::new("old", now() - 60, 1.0)).unwrap();
        db.flush().unwrap();

        match execute(&db, "SELECT old FROM old").unwrap() {
            QueryOutput::Points(points) => {
                assert_eq!(points.len(), 1);
                assert_eq!(points[0].value, 1.0);
            }
            other => panic!("expected points, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_with_tag_selector() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        let base = now() - 50;
        db.write(TimePoint::new("t", base, 5.0).tag("host", "a")).unwrap();
        db.write(TimePoint::new("t", base + 1, 7.0).tag("host", "b")).unwrap();
        db.flush().unwrap();

        assert_eq!(
            execute(&db, "SELECT sum(t) FROM t{host=\"a\"}").unwrap(),
            QueryOutput::Value(5.0)
        );
    }

    #[test]
    fn test_execute_unknown_metric() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        assert_eq!(
            execute(&db, "SELECT sum(ghost) FROM ghost").unwrap(),
            QueryOutput::Value(0.0)
        );
        assert_eq!(
            execute(&db, "SELECT ghost FROM ghost").unwrap(),
            QueryOutput::Points(Vec::new())
        );
    }

    #[test]
    fn test_execute_syntax_error() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        assert!(matches!(
            execute(&db, "EXPLAIN SELECT m FROM m"),
            Err(QueryError::Syntax(_))
        ));
    }
}

//! Transactional schema migration runner.
//!
//! Migrations are SQL scripts applied in lexicographic filename order. Each
//! script runs inside a single transaction together with its ledger insert,
//! so the schema is always at some prefix of the ordered migration list. A
//! failing script rolls back and stops the run; later scripts are never
//! attempted.

use engram_types::error::{EngramError, EngramResult};
use engram_types::time::TimeSource;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::timefmt::format_ts;

/// One schema-evolution script.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Ledger key; scripts apply in lexicographic order of this name.
    pub filename: &'static str,
    /// The DDL/DML to execute.
    pub sql: &'static str,
}

/// The built-in migration set, in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        filename: "0001_correlations.sql",
        sql: include_str!("migrations/0001_correlations.sql"),
    },
    Migration {
        filename: "0002_graph_nodes.sql",
        sql: include_str!("migrations/0002_graph_nodes.sql"),
    },
    Migration {
        filename: "0003_secrets.sql",
        sql: include_str!("migrations/0003_secrets.sql"),
    },
    Migration {
        filename: "0004_retention.sql",
        sql: include_str!("migrations/0004_retention.sql"),
    },
];

/// Apply every pending migration, returning the filenames applied this run.
///
/// Idempotent: already-ledgered scripts are skipped. The first failure stops
/// the run with `EngramError::Migration`; the failing script's transaction
/// is rolled back and earlier scripts stay committed.
pub fn run_migrations(
    conn: &mut Connection,
    time: &dyn TimeSource,
    migrations: &[Migration],
) -> EngramResult<Vec<String>> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            filename TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(|e| EngramError::Storage(e.to_string()))?;

    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by_key(|m| m.filename);

    let mut applied = Vec::new();
    for migration in ordered {
        if is_applied(conn, migration.filename)? {
            debug!(migration = migration.filename, "Already applied, skipping");
            continue;
        }

        let tx = conn
            .transaction()
            .map_err(|e| EngramError::Storage(e.to_string()))?;
        let result = tx.execute_batch(migration.sql).and_then(|()| {
            tx.execute(
                "INSERT INTO schema_migrations (filename, applied_at) VALUES (?1, ?2)",
                rusqlite::params![migration.filename, format_ts(time.now())],
            )
            .map(|_| ())
        });
        match result {
            Ok(()) => {
                tx.commit()
                    .map_err(|e| EngramError::Storage(e.to_string()))?;
                info!(migration = migration.filename, "Applied schema migration");
                applied.push(migration.filename.to_string());
            }
            Err(e) => {
                // Dropping the transaction rolls it back.
                drop(tx);
                return Err(EngramError::Migration {
                    filename: migration.filename.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(applied)
}

/// List the filenames recorded in the ledger, in filename order.
pub fn applied_migrations(conn: &Connection) -> EngramResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT filename FROM schema_migrations ORDER BY filename")
        .map_err(|e| EngramError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| EngramError::Storage(e.to_string()))?;
    let mut names = Vec::new();
    for row in rows {
        names.push(row.map_err(|e| EngramError::Storage(e.to_string()))?);
    }
    Ok(names)
}

fn is_applied(conn: &Connection, filename: &str) -> EngramResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE filename = ?1",
            rusqlite::params![filename],
            |row| row.get(0),
        )
        .map_err(|e| EngramError::Storage(e.to_string()))?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_types::time::SystemClock;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                rusqlite::params![name],
                |row| row.get(0),
            )
            .unwrap();
        count > 0
    }

    #[test]
    fn test_builtin_migrations_create_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        let applied = run_migrations(&mut conn, &SystemClock, MIGRATIONS).unwrap();
        assert_eq!(applied.len(), MIGRATIONS.len());
        assert!(table_exists(&conn, "correlations"));
        assert!(table_exists(&conn, "graph_nodes"));
        assert!(table_exists(&conn, "secrets"));
        assert!(table_exists(&conn, "schema_migrations"));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, &SystemClock, MIGRATIONS).unwrap();
        let second = run_migrations(&mut conn, &SystemClock, MIGRATIONS).unwrap();
        assert!(second.is_empty());
        assert_eq!(applied_migrations(&conn).unwrap().len(), MIGRATIONS.len());
    }

    #[test]
    fn test_failing_migration_stops_at_prefix() {
        let set = [
            Migration {
                filename: "0001_ok.sql",
                sql: "CREATE TABLE one (id TEXT PRIMARY KEY);",
            },
            Migration {
                filename: "0002_broken.sql",
                sql: "CREATE TABLE two (id TEXT PRIMARY KEY); THIS IS NOT SQL;",
            },
            Migration {
                filename: "0003_ok.sql",
                sql: "CREATE TABLE three (id TEXT PRIMARY KEY);",
            },
        ];
        let mut conn = Connection::open_in_memory().unwrap();
        let err = run_migrations(&mut conn, &SystemClock, &set).unwrap_err();
        assert!(matches!(
            err,
            EngramError::Migration { ref filename, .. } if filename == "0002_broken.sql"
        ));

        // Exactly the prefix before the failure is committed.
        assert_eq!(applied_migrations(&conn).unwrap(), vec!["0001_ok.sql"]);
        assert!(table_exists(&conn, "one"));
        // The failing script's partial effects rolled back, and the later
        // script was never attempted.
        assert!(!table_exists(&conn, "two"));
        assert!(!table_exists(&conn, "three"));
    }

    #[test]
    fn test_out_of_order_input_applies_lexicographically() {
        let set = [
            Migration {
                filename: "0002_second.sql",
                sql: "ALTER TABLE first ADD COLUMN extra TEXT;",
            },
            Migration {
                filename: "0001_first.sql",
                sql: "CREATE TABLE first (id TEXT PRIMARY KEY);",
            },
        ];
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, &SystemClock, &set).unwrap();
        assert_eq!(
            applied_migrations(&conn).unwrap(),
            vec!["0001_first.sql", "0002_second.sql"]
        );
    }
}

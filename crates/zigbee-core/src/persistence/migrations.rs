//! Forward-only schema migrations
//!
//! The schema version lives in `PRAGMA user_version`. Each step is a
//! bundled SQL script that creates the next generation of `_v<n>`-suffixed
//! tables, copies rows forward, drops the previous generation and rebuilds
//! indices. v2 and v9 were never released; the chain skips them.

use rusqlite::Connection;

use super::StoreError;

/// The schema version this build reads and writes
pub const SCHEMA_VERSION: i64 = 11;

const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("sql/migration_to_v1.sql")),
    (3, include_str!("sql/migration_to_v3.sql")),
    (4, include_str!("sql/migration_to_v4.sql")),
    (5, include_str!("sql/migration_to_v5.sql")),
    (6, include_str!("sql/migration_to_v6.sql")),
    (7, include_str!("sql/migration_to_v7.sql")),
    (8, include_str!("sql/migration_to_v8.sql")),
    (10, include_str!("sql/migration_to_v10.sql")),
    (11, include_str!("sql/migration_to_v11.sql")),
];

/// Bring a database up to [`SCHEMA_VERSION`]
///
/// Databases written by a newer build are refused: downgrades must not
/// touch a schema they do not understand.
pub fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::IncompatibleVersion {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        tracing::info!("Migrating database schema to v{}", version);
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }
    Ok(())
}

use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            date TEXT PRIMARY KEY NOT NULL,
            rtf_data BLOB NOT NULL,
            created_at REAL NOT NULL,
            updated_at REAL NOT NULL
        );
        "#,
    )
    .context("applying schema migrations")?;
    Ok(())
}

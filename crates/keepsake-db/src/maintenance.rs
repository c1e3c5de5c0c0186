//! One-off repair procedures for existing databases. These run from the
//! `keepsake-maintenance` binary, never from the request-serving path.

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

const TABLES: [&str; 3] = ["users", "memories", "memory_images"];

/// Realign `sqlite_sequence` with the current MAX(id) of each table.
/// Needed after rows were copied in from another database with explicit ids.
pub fn reset_sequences(conn: &Connection) -> Result<()> {
    for table in TABLES {
        conn.execute(
            &format!(
                "UPDATE sqlite_sequence
                 SET seq = COALESCE((SELECT MAX(id) FROM {table}), 0)
                 WHERE name = ?1"
            ),
            [table],
        )?;
    }
    info!("Sequences realigned");
    Ok(())
}

/// Backfill `created_at` on memories imported before the column carried a
/// default. Returns the number of rows touched.
pub fn backfill_created_at(conn: &Connection) -> Result<usize> {
    let touched = conn.execute(
        "UPDATE memories SET created_at = datetime('now') WHERE created_at IS NULL",
        [],
    )?;
    info!("Backfilled created_at on {} rows", touched);
    Ok(touched)
}

/// Move legacy inline `memories.image_url` values into `memory_images` rows
/// and drop the legacy column. No-op when the column is already gone.
/// Returns the number of images migrated.
pub fn migrate_inline_images(conn: &Connection) -> Result<usize> {
    if !has_column(conn, "memories", "image_url")? {
        info!("No legacy image_url column, nothing to migrate");
        return Ok(0);
    }

    let migrated = conn.execute(
        "INSERT INTO memory_images (memory_id, url)
         SELECT id, image_url FROM memories
         WHERE image_url IS NOT NULL AND image_url != ''",
        [],
    )?;
    conn.execute("ALTER TABLE memories DROP COLUMN image_url", [])?;

    info!("Migrated {} inline images to memory_images", migrated);
    Ok(migrated)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

//! One-off database repair tasks, run by hand:
//!
//!   keepsake-maintenance migrate-inline-images [db-path]
//!   keepsake-maintenance reset-sequences [db-path]
//!   keepsake-maintenance backfill-created-at [db-path]
//!
//! The db path falls back to KEEPSAKE_DB_PATH, then ./keepsake.db.

use std::path::Path;

use anyhow::{Result, bail};
use tracing::info;

use keepsake_db::{Database, maintenance};

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().init();

    let mut args = std::env::args().skip(1);
    let task = match args.next() {
        Some(task) => task,
        None => bail!("usage: keepsake-maintenance <task> [db-path]"),
    };
    let db_path = args
        .next()
        .or_else(|| std::env::var("KEEPSAKE_DB_PATH").ok())
        .unwrap_or_else(|| "keepsake.db".into());

    let db = Database::open(Path::new(&db_path))?;

    db.with_conn(|conn| {
        match task.as_str() {
            "migrate-inline-images" => {
                let migrated = maintenance::migrate_inline_images(conn)?;
                info!("Done: {} inline images migrated", migrated);
            }
            "reset-sequences" => {
                maintenance::reset_sequences(conn)?;
                info!("Done: sequences reset");
            }
            "backfill-created-at" => {
                let touched = maintenance::backfill_created_at(conn)?;
                info!("Done: {} rows backfilled", touched);
            }
            other => bail!("unknown task: {}", other),
        }
        Ok(())
    })
}

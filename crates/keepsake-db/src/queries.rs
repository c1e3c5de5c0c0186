use crate::Database;
use crate::models::{MemoryImageRow, MemoryRow, UserRow};
use anyhow::{Result, anyhow};
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                (username, password_hash),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    // -- Memories --

    pub fn insert_memory(&self, owner_id: i64, title: &str, note: Option<&str>) -> Result<MemoryRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO memories (title, note, owner_id) VALUES (?1, ?2, ?3)",
                rusqlite::params![title, note, owner_id],
            )?;
            let id = conn.last_insert_rowid();
            query_memory(conn, owner_id, id)?
                .ok_or_else(|| anyhow!("memory {} missing after insert", id))
        })
    }

    pub fn get_memory(&self, owner_id: i64, memory_id: i64) -> Result<Option<MemoryRow>> {
        self.with_conn(|conn| query_memory(conn, owner_id, memory_id))
    }

    /// Caller's memories ordered by id ascending — insertion order, which keeps
    /// skip/limit pagination stable.
    pub fn list_memories(&self, owner_id: i64, skip: u32, limit: u32) -> Result<Vec<MemoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, note, owner_id, created_at
                 FROM memories
                 WHERE owner_id = ?1
                 ORDER BY id
                 LIMIT ?2 OFFSET ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![owner_id, limit, skip], map_memory_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Partial update: a None field keeps the stored value. `created_at` is
    /// never touched. Returns false when the row is absent or not owned.
    pub fn update_memory_fields(
        &self,
        owner_id: i64,
        memory_id: i64,
        title: Option<&str>,
        note: Option<&str>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE memories
                 SET title = COALESCE(?3, title), note = COALESCE(?4, note)
                 WHERE id = ?1 AND owner_id = ?2",
                rusqlite::params![memory_id, owner_id, title, note],
            )?;
            Ok(changed > 0)
        })
    }

    /// Removes a memory and all of its child image rows in one transaction,
    /// so no orphaned images can survive a partial failure.
    pub fn delete_memory(&self, owner_id: i64, memory_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let owned: Option<i64> = tx
                .query_row(
                    "SELECT id FROM memories WHERE id = ?1 AND owner_id = ?2",
                    rusqlite::params![memory_id, owner_id],
                    |row| row.get(0),
                )
                .optional()?;

            if owned.is_none() {
                return Ok(false);
            }

            tx.execute("DELETE FROM memory_images WHERE memory_id = ?1", [memory_id])?;
            tx.execute("DELETE FROM memories WHERE id = ?1", [memory_id])?;
            tx.commit()?;

            Ok(true)
        })
    }

    // -- Memory images --

    pub fn insert_image(&self, memory_id: i64, url: &str) -> Result<MemoryImageRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO memory_images (memory_id, url) VALUES (?1, ?2)",
                rusqlite::params![memory_id, url],
            )?;
            Ok(MemoryImageRow {
                id: conn.last_insert_rowid(),
                memory_id,
                url: url.to_string(),
            })
        })
    }

    /// Batch-fetch images for a set of memory ids (avoids N+1 when listing).
    pub fn get_images_for_memories(&self, memory_ids: &[i64]) -> Result<Vec<MemoryImageRow>> {
        if memory_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=memory_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, memory_id, url FROM memory_images WHERE memory_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = memory_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(MemoryImageRow {
                        id: row.get(0)?,
                        memory_id: row.get(1)?,
                        url: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Owner of the memory an image is attached to, via image → memory join.
    /// The authorization predicate for per-image deletion.
    pub fn image_owner(&self, image_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let owner: Option<i64> = conn
                .query_row(
                    "SELECT m.owner_id
                     FROM memory_images i
                     JOIN memories m ON i.memory_id = m.id
                     WHERE i.id = ?1",
                    [image_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(owner)
        })
    }

    pub fn delete_image(&self, image_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute("DELETE FROM memory_images WHERE id = ?1", [image_id])?;
            Ok(changed > 0)
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_memory(conn: &Connection, owner_id: i64, memory_id: i64) -> Result<Option<MemoryRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, note, owner_id, created_at
         FROM memories
         WHERE id = ?1 AND owner_id = ?2",
    )?;

    let row = stmt
        .query_row(rusqlite::params![memory_id, owner_id], map_memory_row)
        .optional()?;

    Ok(row)
}

fn map_memory_row(row: &rusqlite::Row<'_>) -> std::result::Result<MemoryRow, rusqlite::Error> {
    Ok(MemoryRow {
        id: row.get(0)?,
        title: row.get(1)?,
        note: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

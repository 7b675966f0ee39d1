//! SQLite link cache backend.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::backends::{CacheBackend, CacheEntry, CacheKey};

pub struct SqliteCacheBackend {
    conn: Connection,
}

impl SqliteCacheBackend {
    pub fn open(db_path: &Path) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    format!("could not create cache directory {}: {err}", parent.display())
                })?;
            }
        }
        Connection::open(db_path)
            .and_then(Self::from_connection)
            .map_err(|err| format!("could not open cache {}: {err}", db_path.display()))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        let backend = Self { conn };
        backend.initialize_schema()?;
        backend.migrate()?;
        Ok(backend)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS fetched_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                song TEXT NOT NULL,
                artist TEXT NOT NULL,
                youtube_link TEXT NOT NULL
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_fetched_links_song_artist
                ON fetched_links (song, artist)",
            [],
        )?;
        Ok(())
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        // Attribution columns were added after the first release.
        let mut stmt = self.conn.prepare("PRAGMA table_info(fetched_links)")?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;

        for (column, ddl) in [
            (
                "username",
                "ALTER TABLE fetched_links ADD COLUMN username TEXT NOT NULL DEFAULT ''",
            ),
            (
                "fetched_at",
                "ALTER TABLE fetched_links ADD COLUMN fetched_at TEXT NOT NULL DEFAULT ''",
            ),
        ] {
            if !columns.iter().any(|existing| existing == column) {
                self.conn.execute(ddl, [])?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn row_count(&self, key: &CacheKey) -> Result<i64, rusqlite::Error> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM fetched_links WHERE song = ?1 AND artist = ?2",
            params![key.song, key.artist],
            |row| row.get(0),
        )
    }
}

impl CacheBackend for SqliteCacheBackend {
    fn lookup(&self, key: &CacheKey) -> Result<Option<String>, String> {
        self.conn
            .query_row(
                "SELECT youtube_link FROM fetched_links
                    WHERE song = ?1 AND artist = ?2
                    ORDER BY id ASC LIMIT 1",
                params![key.song, key.artist],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| format!("SQLite cache lookup failed: {err}"))
    }

    fn insert(&self, entry: &CacheEntry) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT INTO fetched_links (song, artist, youtube_link, username, fetched_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.key.song,
                    entry.key.artist,
                    entry.link,
                    entry.username,
                    entry.fetched_at
                ],
            )
            .map(|_| ())
            .map_err(|err| format!("SQLite cache insert failed: {err}"))
    }
}

//! Schema-evolving catalog persistence.
//!
//! One table per entity kind, each carrying the identity columns, the
//! nullable per-provider link set, and the two bookkeeping timestamps.
//! Schema changes are strictly additive: `ensure_schema` only ever adds
//! missing columns, and the explicit `repair_table` path is the sole way a
//! table is rebuilt.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use rusqlite::{params, Connection};

use crate::model::{EntityKind, EntityRow, LinkSet, SelectionPolicy, StoreError, LINK_FIELDS};

const BOOKKEEPING_FIELDS: [&str; 2] = ["last_updated", "links_updated"];

pub struct CatalogStore {
    conn: Connection,
}

fn column_type(field: &str) -> &'static str {
    match field {
        "formed_year" | "release_count" | "last_updated" | "links_updated" => "INTEGER",
        _ => "TEXT",
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

impl CatalogStore {
    /// Opens (creating if needed) the catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|error| {
                    StoreError::Schema(format!(
                        "could not create data directory {}: {error}",
                        parent.display()
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// In-memory store used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Creates missing tables and additively adds any missing columns.
    /// Never drops, renames, or retypes. Running twice is a no-op.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        for kind in EntityKind::ALL {
            self.ensure_table(kind)?;
        }
        Ok(())
    }

    fn ensure_table(&self, kind: EntityKind) -> Result<(), StoreError> {
        let table = kind.table();
        let mut columns = vec![
            "id INTEGER PRIMARY KEY".to_string(),
            "name TEXT NOT NULL".to_string(),
        ];
        if let Some(parent) = kind.parent_column() {
            columns.push(format!("{parent} INTEGER"));
        }
        for field in LINK_FIELDS.iter().chain(BOOKKEEPING_FIELDS.iter()) {
            columns.push(format!("{field} {}", column_type(field)));
        }
        self.conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", ")),
            [],
        )?;

        let existing = self.table_columns(table)?;
        for field in LINK_FIELDS.iter().chain(BOOKKEEPING_FIELDS.iter()) {
            if !existing.iter().any(|column| column == field) {
                info!("Schema: adding {table}.{field}");
                self.conn.execute(
                    &format!("ALTER TABLE {table} ADD COLUMN {field} {}", column_type(field)),
                    [],
                )?;
            }
        }

        // Canonical IDs are unique per kind; a partial-free unique index
        // still admits any number of NULLs.
        self.conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_canonical_id \
                 ON {table}(canonical_id)"
            ),
            [],
        )?;
        Ok(())
    }

    fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Inserts a catalog entity, returning its id. Entity creation belongs
    /// to the upstream ingester; this is exposed for imports and tests.
    pub fn insert_entity(
        &self,
        kind: EntityKind,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        match kind.parent_column() {
            Some(parent) => {
                self.conn.execute(
                    &format!("INSERT INTO {} (name, {parent}) VALUES (?1, ?2)", kind.table()),
                    params![name, parent_id],
                )?;
            }
            None => {
                self.conn.execute(
                    &format!("INSERT INTO {} (name) VALUES (?1)", kind.table()),
                    params![name],
                )?;
            }
        }
        Ok(self.conn.last_insert_rowid())
    }

    fn select_sql(kind: EntityKind, filter: &str) -> String {
        let table = kind.table();
        let parent_select = match kind {
            EntityKind::Album => "p.name",
            EntityKind::Track => "p.name",
            EntityKind::Artist | EntityKind::Label => "NULL",
        };
        let join = match kind {
            EntityKind::Album => " LEFT JOIN artists p ON p.id = e.artist_id",
            EntityKind::Track => " LEFT JOIN albums p ON p.id = e.album_id",
            EntityKind::Artist | EntityKind::Label => "",
        };
        let link_columns: Vec<String> = LINK_FIELDS
            .iter()
            .map(|field| format!("e.{field}"))
            .collect();
        format!(
            "SELECT e.id, e.name, {parent_select}, {} FROM {table} e{join}{filter} ORDER BY e.id",
            link_columns.join(", ")
        )
    }

    fn row_to_entity(kind: EntityKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRow> {
        Ok(EntityRow {
            id: row.get(0)?,
            kind,
            name: row.get(1)?,
            parent_name: row.get(2)?,
            links: LinkSet {
                canonical_id: row.get(3)?,
                musicbrainz_url: row.get(4)?,
                origin: row.get(5)?,
                theaudiodb_url: row.get(6)?,
                biography: row.get(7)?,
                formed_year: row.get(8)?,
                discogs_url: row.get(9)?,
                credits: row.get(10)?,
                release_count: row.get(11)?,
                lastfm_url: row.get(12)?,
                tags: row.get(13)?,
                similar: row.get(14)?,
                rym_url: row.get(15)?,
            },
        })
    }

    /// Returns the entities a run should process under the given policy.
    /// `enabled_fields` is the link-field vocabulary of currently enabled
    /// providers; `MissingOnly` selects entities with any of them null.
    pub fn select_entities(
        &self,
        kind: EntityKind,
        policy: SelectionPolicy,
        staleness_days: u32,
        enabled_fields: &[&str],
    ) -> Result<Vec<EntityRow>, StoreError> {
        let cutoff = now_unix_ms() - i64::from(staleness_days) * 86_400_000;
        let filter = match policy {
            SelectionPolicy::Force => String::new(),
            SelectionPolicy::MissingOnly => {
                if enabled_fields.is_empty() {
                    return Ok(Vec::new());
                }
                let nulls: Vec<String> = enabled_fields
                    .iter()
                    .map(|field| format!("e.{field} IS NULL"))
                    .collect();
                format!(" WHERE {}", nulls.join(" OR "))
            }
            SelectionPolicy::Recent => format!(
                " WHERE e.last_updated IS NOT NULL AND e.last_updated >= {cutoff}"
            ),
            SelectionPolicy::Stale => {
                format!(" WHERE e.last_updated IS NULL OR e.last_updated < {cutoff}")
            }
        };

        let sql = Self::select_sql(kind, &filter);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Self::row_to_entity(kind, row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Reloads one entity's current link set.
    pub fn load_entity(&self, kind: EntityKind, id: i64) -> Result<Option<EntityRow>, StoreError> {
        let sql = Self::select_sql(kind, &format!(" WHERE e.id = {id}"));
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map([], |row| Self::row_to_entity(kind, row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.pop())
    }

    /// Persists the merged link set for one entity in a single transaction
    /// — the one write per entity per reconciliation pass.
    ///
    /// `links_updated` is always bumped (the provider pass completed);
    /// `last_updated` only moves when a field actually changed, so
    /// re-applying identical data causes no timestamp churn beyond
    /// `links_updated`.
    pub fn write_links(
        &mut self,
        kind: EntityKind,
        id: i64,
        links: &LinkSet,
        fields_changed: bool,
    ) -> Result<(), StoreError> {
        let table = kind.table();
        let now = now_unix_ms();
        let tx = self.conn.transaction()?;
        let last_updated_clause = if fields_changed {
            ", last_updated = ?14"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE {table} SET canonical_id = ?1, musicbrainz_url = ?2, origin = ?3, \
             theaudiodb_url = ?4, biography = ?5, formed_year = ?6, discogs_url = ?7, \
             credits = ?8, release_count = ?9, lastfm_url = ?10, tags = ?11, similar = ?12, \
             rym_url = ?13, links_updated = ?14{last_updated_clause} WHERE id = ?15"
        );
        let updated = tx.execute(
            &sql,
            params![
                links.canonical_id,
                links.musicbrainz_url,
                links.origin,
                links.theaudiodb_url,
                links.biography,
                links.formed_year,
                links.discogs_url,
                links.credits,
                links.release_count,
                links.lastfm_url,
                links.tags,
                links.similar,
                links.rym_url,
                now,
                id,
            ],
        )?;
        tx.commit()?;
        if updated == 0 {
            warn!("write_links: no {table} row with id {id}");
        }
        Ok(())
    }

    /// Reads both bookkeeping timestamps for one entity.
    pub fn timestamps(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> Result<(Option<i64>, Option<i64>), StoreError> {
        let row = self.conn.query_row(
            &format!(
                "SELECT last_updated, links_updated FROM {} WHERE id = ?1",
                kind.table()
            ),
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(row)
    }

    pub fn entity_count(&self, kind: EntityKind) -> Result<i64, StoreError> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", kind.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Operator-invoked table rebuild for an incompatible legacy shape.
    ///
    /// Builds a fresh table with the expected columns, copies every column
    /// the legacy table shares with it, verifies row and non-null counts,
    /// and only then swaps the tables. Duplicate canonical IDs, which the
    /// unique index would refuse, are cleared on all but the lowest-id row.
    /// Never run implicitly.
    pub fn repair_table(&mut self, kind: EntityKind) -> Result<(), StoreError> {
        let table = kind.table();
        let legacy_columns = self.table_columns(table)?;
        if legacy_columns.is_empty() {
            return Err(StoreError::Schema(format!("table {table} does not exist")));
        }

        let mut expected: Vec<&str> = vec!["id", "name"];
        if let Some(parent) = kind.parent_column() {
            expected.push(parent);
        }
        expected.extend(LINK_FIELDS.iter());
        expected.extend(BOOKKEEPING_FIELDS.iter());
        let shared: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|column| legacy_columns.iter().any(|legacy| legacy == column))
            .collect();
        if !shared.contains(&"id") || !shared.contains(&"name") {
            return Err(StoreError::Schema(format!(
                "table {table} is missing identity columns and cannot be repaired"
            )));
        }

        let tx = self.conn.transaction()?;
        let rebuilt = format!("{table}__rebuilt");
        let mut column_defs = vec![
            "id INTEGER PRIMARY KEY".to_string(),
            "name TEXT NOT NULL".to_string(),
        ];
        if let Some(parent) = kind.parent_column() {
            column_defs.push(format!("{parent} INTEGER"));
        }
        for field in LINK_FIELDS.iter().chain(BOOKKEEPING_FIELDS.iter()) {
            column_defs.push(format!("{field} {}", column_type(field)));
        }
        tx.execute(&format!("DROP TABLE IF EXISTS {rebuilt}"), [])?;
        tx.execute(
            &format!("CREATE TABLE {rebuilt} ({})", column_defs.join(", ")),
            [],
        )?;

        let column_list = shared.join(", ");
        tx.execute(
            &format!("INSERT INTO {rebuilt} ({column_list}) SELECT {column_list} FROM {table}"),
            [],
        )?;

        // Integrity check before the swap: row counts and per-column
        // non-null counts must carry over exactly.
        let legacy_rows: i64 =
            tx.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        let rebuilt_rows: i64 =
            tx.query_row(&format!("SELECT COUNT(*) FROM {rebuilt}"), [], |row| row.get(0))?;
        if legacy_rows != rebuilt_rows {
            return Err(StoreError::Schema(format!(
                "repair of {table} lost rows ({legacy_rows} -> {rebuilt_rows})"
            )));
        }
        for column in &shared {
            let legacy_non_null: i64 = tx.query_row(
                &format!("SELECT COUNT({column}) FROM {table}"),
                [],
                |row| row.get(0),
            )?;
            let rebuilt_non_null: i64 = tx.query_row(
                &format!("SELECT COUNT({column}) FROM {rebuilt}"),
                [],
                |row| row.get(0),
            )?;
            if legacy_non_null != rebuilt_non_null {
                return Err(StoreError::Schema(format!(
                    "repair of {table} lost values in {column}"
                )));
            }
        }

        // The unique index below refuses duplicate canonical IDs, so keep
        // the value on the lowest-id row of each group and clear the rest.
        let deduped = tx.execute(
            &format!(
                "UPDATE {rebuilt} SET canonical_id = NULL \
                 WHERE canonical_id IS NOT NULL \
                 AND id NOT IN (SELECT MIN(id) FROM {rebuilt} \
                                WHERE canonical_id IS NOT NULL \
                                GROUP BY canonical_id)"
            ),
            [],
        )?;
        if deduped > 0 {
            warn!("Repair of {table}: cleared canonical_id on {deduped} duplicate rows");
        }

        tx.execute(&format!("DROP TABLE {table}"), [])?;
        tx.execute(&format!("ALTER TABLE {rebuilt} RENAME TO {table}"), [])?;
        tx.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_canonical_id \
                 ON {table}(canonical_id)"
            ),
            [],
        )?;
        tx.commit()?;
        info!("Repaired table {table}: {legacy_rows} rows carried over");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::CatalogStore;
    use crate::model::{EntityKind, LinkSet, SelectionPolicy, StoreError};

    fn store_with_schema() -> CatalogStore {
        let store = CatalogStore::open_in_memory().expect("in-memory store");
        store.ensure_schema().expect("schema");
        store
    }

    fn links_with_canonical(id: &str) -> LinkSet {
        LinkSet {
            canonical_id: Some(id.to_string()),
            musicbrainz_url: Some(format!("https://musicbrainz.org/artist/{id}")),
            ..LinkSet::default()
        }
    }

    #[test]
    fn test_ensure_schema_twice_is_a_noop_and_preserves_values() {
        let mut store = store_with_schema();
        let id = store
            .insert_entity(EntityKind::Artist, "Radiohead", None)
            .expect("insert");
        store
            .write_links(EntityKind::Artist, id, &links_with_canonical("mbid-1"), true)
            .expect("write");

        let before = store.table_columns("artists").expect("columns");
        store.ensure_schema().expect("second ensure");
        let after = store.table_columns("artists").expect("columns");
        assert_eq!(before, after);

        let row = store
            .load_entity(EntityKind::Artist, id)
            .expect("load")
            .expect("row");
        assert_eq!(row.links.canonical_id.as_deref(), Some("mbid-1"));
    }

    #[test]
    fn test_ensure_schema_adds_columns_to_legacy_table() {
        let store = CatalogStore::open_in_memory().expect("in-memory store");
        store
            .conn
            .execute(
                "CREATE TABLE artists (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                [],
            )
            .expect("legacy table");
        store
            .conn
            .execute("INSERT INTO artists (name) VALUES ('Low')", [])
            .expect("legacy row");

        store.ensure_schema().expect("additive migration");
        let columns = store.table_columns("artists").expect("columns");
        assert!(columns.iter().any(|column| column == "canonical_id"));
        assert!(columns.iter().any(|column| column == "links_updated"));

        let row = store
            .load_entity(EntityKind::Artist, 1)
            .expect("load")
            .expect("row");
        assert_eq!(row.name, "Low");
        assert_eq!(row.links, LinkSet::default());
    }

    #[test]
    fn test_write_links_is_idempotent_without_timestamp_churn() {
        let mut store = store_with_schema();
        let id = store
            .insert_entity(EntityKind::Artist, "Radiohead", None)
            .expect("insert");
        let links = links_with_canonical("mbid-1");

        store
            .write_links(EntityKind::Artist, id, &links, true)
            .expect("first write");
        let (first_last, first_links) = store.timestamps(EntityKind::Artist, id).expect("ts");
        assert!(first_last.is_some());
        assert!(first_links.is_some());

        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .write_links(EntityKind::Artist, id, &links, false)
            .expect("identical write");
        let (second_last, second_links) = store.timestamps(EntityKind::Artist, id).expect("ts");
        assert_eq!(first_last, second_last);
        assert!(second_links >= first_links);
        assert_eq!(store.entity_count(EntityKind::Artist).expect("count"), 1);
    }

    #[test]
    fn test_canonical_id_is_unique_per_kind() {
        let mut store = store_with_schema();
        let first = store
            .insert_entity(EntityKind::Artist, "Orbital", None)
            .expect("insert");
        let second = store
            .insert_entity(EntityKind::Artist, "Orbital (tribute)", None)
            .expect("insert");
        store
            .write_links(EntityKind::Artist, first, &links_with_canonical("mbid-9"), true)
            .expect("first canonical write");
        let duplicate =
            store.write_links(EntityKind::Artist, second, &links_with_canonical("mbid-9"), true);
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_missing_only_skips_fully_populated_entities() {
        let mut store = store_with_schema();
        let full = store
            .insert_entity(EntityKind::Artist, "Complete", None)
            .expect("insert");
        let partial = store
            .insert_entity(EntityKind::Artist, "Partial", None)
            .expect("insert");
        store
            .write_links(EntityKind::Artist, full, &links_with_canonical("mbid-a"), true)
            .expect("write");

        let enabled = ["canonical_id", "musicbrainz_url"];
        let selected = store
            .select_entities(EntityKind::Artist, SelectionPolicy::MissingOnly, 30, &enabled)
            .expect("select");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, partial);
        for row in &selected {
            assert!(enabled.iter().any(|field| !row.links.is_set(field)));
        }

        let forced = store
            .select_entities(EntityKind::Artist, SelectionPolicy::Force, 30, &enabled)
            .expect("select");
        assert_eq!(forced.len(), 2);
    }

    #[test]
    fn test_recent_and_stale_split_on_last_updated() {
        let mut store = store_with_schema();
        let fresh = store
            .insert_entity(EntityKind::Artist, "Fresh", None)
            .expect("insert");
        let never = store
            .insert_entity(EntityKind::Artist, "Never", None)
            .expect("insert");
        store
            .write_links(EntityKind::Artist, fresh, &links_with_canonical("mbid-f"), true)
            .expect("write");

        let recent = store
            .select_entities(EntityKind::Artist, SelectionPolicy::Recent, 30, &[])
            .expect("select");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, fresh);

        let stale = store
            .select_entities(EntityKind::Artist, SelectionPolicy::Stale, 30, &[])
            .expect("select");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, never);
    }

    #[test]
    fn test_album_rows_carry_parent_artist_name() {
        let store = store_with_schema();
        let artist = store
            .insert_entity(EntityKind::Artist, "Radiohead", None)
            .expect("insert artist");
        store
            .insert_entity(EntityKind::Album, "OK Computer", Some(artist))
            .expect("insert album");

        let albums = store
            .select_entities(EntityKind::Album, SelectionPolicy::Force, 30, &[])
            .expect("select");
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].parent_name.as_deref(), Some("Radiohead"));
    }

    #[test]
    fn test_repair_rebuilds_incompatible_table_and_keeps_data() {
        let mut store = CatalogStore::open_in_memory().expect("in-memory store");
        // Legacy shape: canonical_id stored as INTEGER plus a column this
        // schema never had.
        store
            .conn
            .execute(
                "CREATE TABLE artists (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
                 canonical_id INTEGER, obsolete_rank INTEGER)",
                [],
            )
            .expect("legacy table");
        store
            .conn
            .execute(
                "INSERT INTO artists (name, canonical_id, obsolete_rank) VALUES ('Can', 42, 7)",
                [],
            )
            .expect("legacy row");

        store.repair_table(EntityKind::Artist).expect("repair");
        let columns = store.table_columns("artists").expect("columns");
        assert!(!columns.iter().any(|column| column == "obsolete_rank"));
        assert!(columns.iter().any(|column| column == "links_updated"));

        store.ensure_schema().expect("schema after repair");
        let row = store
            .load_entity(EntityKind::Artist, 1)
            .expect("load")
            .expect("row");
        assert_eq!(row.name, "Can");
        assert_eq!(row.links.canonical_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_repair_recovers_table_with_duplicate_canonical_ids() {
        let mut store = CatalogStore::open_in_memory().expect("in-memory store");
        store
            .conn
            .execute(
                "CREATE TABLE artists (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
                 canonical_id TEXT)",
                [],
            )
            .expect("legacy table");
        store
            .conn
            .execute(
                "INSERT INTO artists (name, canonical_id) \
                 VALUES ('Orbital', 'mbid-dup'), ('Orbital (import)', 'mbid-dup')",
                [],
            )
            .expect("legacy rows");

        // The duplicates make the unique canonical_id index impossible, so
        // the schema pass cannot bring this table up on its own.
        assert!(store.ensure_schema().is_err());

        store.repair_table(EntityKind::Artist).expect("repair");
        store.ensure_schema().expect("schema after repair");

        let first = store
            .load_entity(EntityKind::Artist, 1)
            .expect("load")
            .expect("row");
        let second = store
            .load_entity(EntityKind::Artist, 2)
            .expect("load")
            .expect("row");
        assert_eq!(first.links.canonical_id.as_deref(), Some("mbid-dup"));
        assert!(second.links.canonical_id.is_none());
        assert_eq!(
            store.entity_count(EntityKind::Artist).expect("count"),
            2
        );
    }

    #[test]
    fn test_repair_refuses_table_without_identity_columns() {
        let mut store = CatalogStore::open_in_memory().expect("in-memory store");
        store
            .conn
            .execute("CREATE TABLE labels (code TEXT)", [])
            .expect("legacy table");
        let result = store.repair_table(EntityKind::Label);
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }
}

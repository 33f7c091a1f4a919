use crate::{new_id, now_ms, GameConfig};
use anyhow::Context;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use skyhaven_protocol::{Building, BuildingType, GridPos, ResourceAmount, Size};
use std::path::{Path, PathBuf};

/// Island row as the store keeps it, without its buildings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IslandRecord {
    pub id: String,
    pub name: String,
    pub level: u32,
    pub grid: Size,
    pub resources: ResourceAmount,
}

/// Durable home of island state. The session writes through it after every
/// accepted in-memory mutation and reads from it on load and reconcile.
pub trait IslandStore: Send + Sync {
    fn fetch_or_create_island(&self, defaults: &GameConfig) -> anyhow::Result<IslandRecord>;
    fn fetch_buildings(&self, island_id: &str) -> anyhow::Result<Vec<Building>>;
    fn insert_building(&self, island_id: &str, building: &Building) -> anyhow::Result<()>;
    fn delete_building(&self, building_id: &str) -> anyhow::Result<()>;
    fn update_building_level(&self, building_id: &str, level: u32) -> anyhow::Result<()>;
    fn update_island_resources(
        &self,
        island_id: &str,
        resources: &ResourceAmount,
    ) -> anyhow::Result<()>;
    fn update_island_name(&self, island_id: &str, name: &str) -> anyhow::Result<()>;

    /// Stores a new building together with the balance left after paying for it.
    /// Stores that can should apply both or neither.
    fn record_construction(
        &self,
        island_id: &str,
        building: &Building,
        resources: &ResourceAmount,
    ) -> anyhow::Result<()> {
        self.insert_building(island_id, building)?;
        self.update_island_resources(island_id, resources)
    }

    /// Stores a new building level together with the balance left after paying for it.
    fn record_upgrade(
        &self,
        island_id: &str,
        building_id: &str,
        level: u32,
        resources: &ResourceAmount,
    ) -> anyhow::Result<()> {
        self.update_building_level(building_id, level)?;
        self.update_island_resources(island_id, resources)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn open(&self) -> anyhow::Result<Connection> {
        let path = self.db_path.clone();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create db dir: {}", dir.display()))?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open sqlite db: {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        migrate(&conn)?;
        Ok(conn)
    }

}

impl IslandStore for SqliteStore {
    fn fetch_or_create_island(&self, defaults: &GameConfig) -> anyhow::Result<IslandRecord> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                "SELECT id, name, level, grid_width, grid_height, steam, ore, aether
                 FROM islands ORDER BY created_at_ms ASC LIMIT 1",
                [],
                |row| {
                    Ok(IslandRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        level: row.get(2)?,
                        grid: Size::new(row.get(3)?, row.get(4)?),
                        resources: ResourceAmount::new(row.get(5)?, row.get(6)?, row.get(7)?),
                    })
                },
            )
            .optional()
            .context("fetch island")?;
        if let Some(record) = existing {
            return Ok(record);
        }

        let record = IslandRecord {
            id: new_id("isl"),
            name: defaults.island_name.clone(),
            level: 1,
            grid: defaults.grid,
            resources: defaults.initial_resources,
        };
        let ts = now_ms();
        let r = record.resources;
        tx.execute(
            "INSERT INTO islands (id, name, level, grid_width, grid_height, steam, ore, aether, created_at_ms, updated_at_ms, rev)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 1)",
            (
                &record.id,
                &record.name,
                record.level,
                record.grid.width,
                record.grid.height,
                r.steam,
                r.ore,
                r.aether,
                ts,
            ),
        )
        .context("create island")?;
        append_event_tx(
            &tx,
            "island.created",
            Some(&record.id),
            serde_json::json!({ "id": record.id, "name": record.name }),
        )?;
        tx.commit()?;
        Ok(record)
    }

    fn fetch_buildings(&self, island_id: &str) -> anyhow::Result<Vec<Building>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, level, x, y, w, h FROM buildings WHERE island_id = ?1 ORDER BY created_at_ms ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([island_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                GridPos::new(row.get(3)?, row.get(4)?),
                Size::new(row.get(5)?, row.get(6)?),
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, kind, level, position, size) = row?;
            let kind: BuildingType = kind
                .parse()
                .with_context(|| format!("building {id} in island {island_id}"))?;
            out.push(Building {
                id,
                kind,
                level,
                position,
                size,
            });
        }
        Ok(out)
    }

    fn insert_building(&self, island_id: &str, building: &Building) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        insert_building_tx(&tx, island_id, building)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_building(&self, building_id: &str) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let n = tx.execute("DELETE FROM buildings WHERE id = ?1", [building_id])?;
        anyhow::ensure!(n > 0, "delete building {building_id}: no such row");
        append_event_tx(
            &tx,
            "building.deleted",
            Some(building_id),
            serde_json::json!({ "id": building_id }),
        )?;
        tx.commit()?;
        Ok(())
    }

    fn update_building_level(&self, building_id: &str, level: u32) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        update_building_level_tx(&tx, building_id, level)?;
        tx.commit()?;
        Ok(())
    }

    fn update_island_resources(
        &self,
        island_id: &str,
        resources: &ResourceAmount,
    ) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        update_island_resources_tx(&tx, island_id, resources)?;
        tx.commit()?;
        Ok(())
    }

    fn update_island_name(&self, island_id: &str, name: &str) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let n = tx.execute(
            "UPDATE islands SET name = ?2, updated_at_ms = ?3, rev = rev + 1 WHERE id = ?1",
            (island_id, name, now_ms()),
        )?;
        anyhow::ensure!(n > 0, "rename island {island_id}: no such row");
        append_event_tx(
            &tx,
            "island.renamed",
            Some(island_id),
            serde_json::json!({ "id": island_id, "name": name }),
        )?;
        tx.commit()?;
        Ok(())
    }

    fn record_construction(
        &self,
        island_id: &str,
        building: &Building,
        resources: &ResourceAmount,
    ) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        insert_building_tx(&tx, island_id, building)?;
        update_island_resources_tx(&tx, island_id, resources)?;
        tx.commit()?;
        Ok(())
    }

    fn record_upgrade(
        &self,
        island_id: &str,
        building_id: &str,
        level: u32,
        resources: &ResourceAmount,
    ) -> anyhow::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        update_building_level_tx(&tx, building_id, level)?;
        update_island_resources_tx(&tx, island_id, resources)?;
        tx.commit()?;
        Ok(())
    }
}

fn insert_building_tx(
    tx: &rusqlite::Transaction<'_>,
    island_id: &str,
    building: &Building,
) -> anyhow::Result<()> {
    let ts = now_ms();
    tx.execute(
        "INSERT INTO buildings (id, island_id, kind, level, x, y, w, h, created_at_ms, updated_at_ms, rev)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 1)",
        (
            &building.id,
            island_id,
            building.kind.as_str(),
            building.level,
            building.position.x,
            building.position.y,
            building.size.width,
            building.size.height,
            ts,
        ),
    )
    .with_context(|| format!("insert building {}", building.id))?;
    append_event_tx(
        tx,
        "building.inserted",
        Some(&building.id),
        serde_json::json!({
            "id": building.id,
            "island_id": island_id,
            "kind": building.kind,
            "x": building.position.x,
            "y": building.position.y,
        }),
    )?;
    Ok(())
}

fn update_building_level_tx(
    tx: &rusqlite::Transaction<'_>,
    building_id: &str,
    level: u32,
) -> anyhow::Result<()> {
    let n = tx.execute(
        "UPDATE buildings SET level = ?2, updated_at_ms = ?3, rev = rev + 1 WHERE id = ?1",
        (building_id, level, now_ms()),
    )?;
    anyhow::ensure!(n > 0, "update building {building_id}: no such row");
    append_event_tx(
        tx,
        "building.level",
        Some(building_id),
        serde_json::json!({ "id": building_id, "level": level }),
    )?;
    Ok(())
}

fn update_island_resources_tx(
    tx: &rusqlite::Transaction<'_>,
    island_id: &str,
    resources: &ResourceAmount,
) -> anyhow::Result<()> {
    let n = tx.execute(
        "UPDATE islands SET steam = ?2, ore = ?3, aether = ?4, updated_at_ms = ?5, rev = rev + 1 WHERE id = ?1",
        (
            island_id,
            resources.steam,
            resources.ore,
            resources.aether,
            now_ms(),
        ),
    )?;
    anyhow::ensure!(n > 0, "update island {island_id}: no such row");
    append_event_tx(
        tx,
        "island.resources",
        Some(island_id),
        serde_json::json!(resources),
    )?;
    Ok(())
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let v: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if v < 1 {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS islands (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  level INTEGER NOT NULL DEFAULT 1,
  grid_width INTEGER NOT NULL,
  grid_height INTEGER NOT NULL,
  steam INTEGER NOT NULL DEFAULT 0,
  ore INTEGER NOT NULL DEFAULT 0,
  aether INTEGER NOT NULL DEFAULT 0,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL,
  rev INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS buildings (
  id TEXT PRIMARY KEY,
  island_id TEXT NOT NULL REFERENCES islands(id) ON DELETE CASCADE,
  kind TEXT NOT NULL,
  level INTEGER NOT NULL DEFAULT 1,
  x INTEGER NOT NULL,
  y INTEGER NOT NULL,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL,
  rev INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_buildings_island ON buildings(island_id);

-- Append-only write log.
CREATE TABLE IF NOT EXISTS event_log (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  ts_ms INTEGER NOT NULL,
  kind TEXT NOT NULL,
  entity_id TEXT,
  payload_json TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_event_log_ts ON event_log(ts_ms);
"#,
        )?;

        conn.pragma_update(None, "user_version", 1_i64)?;
    }

    // Footprints used to be derived from the catalog on load; they are stored now.
    ensure_column(conn, "buildings", "w", "INTEGER NOT NULL DEFAULT 1")?;
    ensure_column(conn, "buildings", "h", "INTEGER NOT NULL DEFAULT 1")?;

    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, col: &str, decl: &str) -> anyhow::Result<()> {
    let sql = format!("ALTER TABLE {table} ADD COLUMN {col} {decl}");
    match conn.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(e) => {
            if e.to_string().to_lowercase().contains("duplicate column") {
                return Ok(());
            }
            Err(e).with_context(|| format!("ensure column {table}.{col}"))
        }
    }
}

fn append_event_tx(
    tx: &rusqlite::Transaction<'_>,
    kind: &str,
    entity_id: Option<&str>,
    payload: serde_json::Value,
) -> anyhow::Result<i64> {
    let ts = now_ms();
    let payload_json = payload.to_string();
    tx.execute(
        "INSERT INTO event_log (ts_ms, kind, entity_id, payload_json) VALUES (?1, ?2, ?3, ?4)",
        (ts, kind, entity_id, payload_json),
    )?;
    Ok(tx.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> SqliteStore {
        let p = std::env::temp_dir().join(format!(
            "skyhaven-store-test-{}.db",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        let store = SqliteStore::new(p);
        let _ = store.open().expect("open db");
        store
    }

    #[test]
    fn creates_island_once() {
        let store = temp_store();
        let cfg = GameConfig::default();
        let a = store.fetch_or_create_island(&cfg).unwrap();
        let b = store.fetch_or_create_island(&cfg).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name, "Novice Isle");
        assert_eq!(a.grid, Size::new(10, 10));
        assert_eq!(a.resources, ResourceAmount::new(500, 250, 50));
        let logged: i64 = store
            .open()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(logged, 1);
    }

    #[test]
    fn building_rows_round_trip() {
        let store = temp_store();
        let island = store.fetch_or_create_island(&GameConfig::default()).unwrap();
        let dock = Building {
            id: "bld-1".into(),
            kind: BuildingType::SkyDock,
            level: 1,
            position: GridPos::new(5, 5),
            size: Size::new(2, 1),
        };
        store.insert_building(&island.id, &dock).unwrap();
        store.update_building_level(&dock.id, 3).unwrap();

        let rows = store.fetch_buildings(&island.id).unwrap();
        assert_eq!(rows, vec![Building { level: 3, ..dock.clone() }]);

        store.delete_building(&dock.id).unwrap();
        assert!(store.fetch_buildings(&island.id).unwrap().is_empty());
        assert!(store.delete_building(&dock.id).is_err());
    }

    #[test]
    fn island_updates_persist() {
        let store = temp_store();
        let island = store.fetch_or_create_island(&GameConfig::default()).unwrap();
        store
            .update_island_resources(&island.id, &ResourceAmount::new(1, 2, 3))
            .unwrap();
        store.update_island_name(&island.id, "Cloudreach").unwrap();

        let again = store.fetch_or_create_island(&GameConfig::default()).unwrap();
        assert_eq!(again.name, "Cloudreach");
        assert_eq!(again.resources, ResourceAmount::new(1, 2, 3));
        assert!(store.update_island_name("isl-missing", "x").is_err());
    }

    #[test]
    fn construction_is_all_or_nothing() {
        let store = temp_store();
        let island = store.fetch_or_create_island(&GameConfig::default()).unwrap();
        let conn = store.open().unwrap();
        conn.execute_batch(
            "CREATE TRIGGER freeze_resources BEFORE UPDATE OF steam ON islands
             BEGIN SELECT RAISE(ABORT, 'resources frozen'); END;",
        )
        .unwrap();

        let mine = Building {
            id: "bld-1".into(),
            kind: BuildingType::OreMine,
            level: 1,
            position: GridPos::new(5, 5),
            size: Size::new(1, 1),
        };
        assert!(store
            .record_construction(&island.id, &mine, &ResourceAmount::new(400, 250, 50))
            .is_err());
        assert!(store.fetch_buildings(&island.id).unwrap().is_empty());

        conn.execute_batch("DROP TRIGGER freeze_resources").unwrap();
        store
            .record_construction(&island.id, &mine, &ResourceAmount::new(400, 250, 50))
            .unwrap();
        conn.execute_batch(
            "CREATE TRIGGER freeze_resources BEFORE UPDATE OF steam ON islands
             BEGIN SELECT RAISE(ABORT, 'resources frozen'); END;",
        )
        .unwrap();
        assert!(store
            .record_upgrade(&island.id, &mine.id, 2, &ResourceAmount::new(200, 250, 50))
            .is_err());

        let rows = store.fetch_buildings(&island.id).unwrap();
        assert_eq!(rows[0].level, 1);
        let again = store.fetch_or_create_island(&GameConfig::default()).unwrap();
        assert_eq!(again.resources, ResourceAmount::new(400, 250, 50));
    }

    #[test]
    fn buildings_created_in_the_same_millisecond_keep_insert_order() {
        let store = temp_store();
        let island = store.fetch_or_create_island(&GameConfig::default()).unwrap();
        let conn = store.open().unwrap();
        for (id, x) in [("bld-z", 5), ("bld-a", 6), ("bld-m", 4)] {
            conn.execute(
                "INSERT INTO buildings (id, island_id, kind, level, x, y, w, h, created_at_ms, updated_at_ms, rev)
                 VALUES (?1, ?2, 'ore_mine', 1, ?3, 5, 1, 1, 1000, 1000, 1)",
                (id, &island.id, x),
            )
            .unwrap();
        }
        let ids: Vec<String> = store
            .fetch_buildings(&island.id)
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, ["bld-z", "bld-a", "bld-m"]);
    }

    #[test]
    fn unknown_kind_in_db_is_an_error() {
        let store = temp_store();
        let island = store.fetch_or_create_island(&GameConfig::default()).unwrap();
        let conn = store.open().unwrap();
        conn.execute(
            "INSERT INTO buildings (id, island_id, kind, level, x, y, w, h, created_at_ms, updated_at_ms, rev)
             VALUES ('b1', ?1, 'zeppelin_hangar', 1, 0, 0, 1, 1, 1, 1, 1)",
            [&island.id],
        )
        .unwrap();
        assert!(store.fetch_buildings(&island.id).is_err());
    }
}

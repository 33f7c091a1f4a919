use crate::placement;
use crate::{Catalog, GameConfig, GameError, Island, IslandStore};
use skyhaven_protocol::{
    events, BuildingType, GridPos, IslandSnapshot, IslandUpdate, ResourceAmount,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const UPDATE_CHANNEL_CAPACITY: usize = 64;
const MAX_NAME_CHARS: usize = 64;

/// The single owner of one island's live state.
///
/// Every mutation takes the state lock, validates, mutates, writes back to the
/// store and notifies subscribers before releasing it, so a production tick can
/// never interleave with a construct or upgrade. The lock is never held across
/// an `.await`.
pub struct GameSession {
    catalog: Arc<Catalog>,
    store: Arc<dyn IslandStore>,
    config: GameConfig,
    state: Mutex<SessionState>,
    updates: broadcast::Sender<IslandUpdate>,
}

struct SessionState {
    island: Island,
    rev: u64,
}

impl GameSession {
    /// Fetches (or creates) the island from `store` and takes ownership of it.
    pub fn load(
        catalog: Arc<Catalog>,
        store: Arc<dyn IslandStore>,
        config: &GameConfig,
    ) -> anyhow::Result<Self> {
        let island = fetch_island(store.as_ref(), config)?;
        info!(
            island_id = %island.id,
            name = %island.name,
            buildings = island.registry.len(),
            "island.loaded"
        );
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Ok(Self {
            catalog,
            store,
            config: config.clone(),
            state: Mutex::new(SessionState { island, rev: 0 }),
            updates,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IslandUpdate> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> IslandSnapshot {
        self.lock().island.snapshot()
    }

    /// Number of notifications emitted so far.
    pub fn rev(&self) -> u64 {
        self.lock().rev
    }

    pub fn construct(
        &self,
        kind: BuildingType,
        position: GridPos,
    ) -> Result<IslandSnapshot, GameError> {
        let mut state = self.lock();
        let island = &mut state.island;
        let building = island
            .registry
            .construct(
                &self.catalog,
                &mut island.ledger,
                island.grid,
                kind,
                position,
            )
            .inspect_err(|e| rejected("construct", e))?;
        info!(building_id = %building.id, %kind, %position, "building.constructed");

        let balance = island.ledger.balance();
        let write = self
            .store
            .record_construction(&island.id, &building, &balance);
        self.commit(&mut state, events::BUILDING_CONSTRUCTED, write)
    }

    pub fn upgrade(&self, building_id: &str) -> Result<IslandSnapshot, GameError> {
        let mut state = self.lock();
        let island = &mut state.island;
        let building = island
            .registry
            .upgrade(&self.catalog, &mut island.ledger, building_id)
            .inspect_err(|e| rejected("upgrade", e))?;
        info!(building_id, level = building.level, "building.upgraded");

        let balance = island.ledger.balance();
        let write = self
            .store
            .record_upgrade(&island.id, &building.id, building.level, &balance);
        self.commit(&mut state, events::BUILDING_UPGRADED, write)
    }

    pub fn demolish(&self, building_id: &str) -> Result<IslandSnapshot, GameError> {
        let mut state = self.lock();
        let building = state
            .island
            .registry
            .demolish(building_id)
            .inspect_err(|e| rejected("demolish", e))?;
        info!(building_id, kind = %building.kind, "building.demolished");

        let write = self.store.delete_building(&building.id);
        self.commit(&mut state, events::BUILDING_DEMOLISHED, write)
    }

    pub fn rename_island(&self, name: &str) -> Result<IslandSnapshot, GameError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
            let err = GameError::InvalidName(format!(
                "name must be 1 to {MAX_NAME_CHARS} characters"
            ));
            rejected("rename", &err);
            return Err(err);
        }

        let mut state = self.lock();
        state.island.name = name.to_string();
        info!(island_id = %state.island.id, name, "island.renamed");

        let write = self.store.update_island_name(&state.island.id, name);
        self.commit(&mut state, events::ISLAND_RENAMED, write)
    }

    /// One production step: adds every building's output to the ledger.
    pub fn tick(&self) -> Result<IslandSnapshot, GameError> {
        let mut state = self.lock();
        let island = &mut state.island;
        let produced = island.registry.production_total(&self.catalog);
        let balance = island.ledger.apply(produced);
        debug!(%produced, %balance, "production.tick");

        let write = if produced.is_zero() {
            Ok(())
        } else {
            self.store.update_island_resources(&island.id, &balance)
        };
        self.commit(&mut state, events::PRODUCTION_TICK, write)
    }

    /// Replaces in-memory state with the store's view. Used after a failed write-back.
    pub fn reconcile(&self) -> Result<IslandSnapshot, GameError> {
        let mut state = self.lock();
        let island = match fetch_island(self.store.as_ref(), &self.config) {
            Ok(island) => island,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "island.reconcile_failed");
                return Err(GameError::persistence(state.island.snapshot(), err));
            }
        };
        info!(
            island_id = %island.id,
            buildings = island.registry.len(),
            "island.reconciled"
        );
        state.island = island;
        self.commit(&mut state, events::ISLAND_RECONCILED, Ok(()))
    }

    /// Placement preview; same rules as `construct`, without the affordability check.
    pub fn can_place(&self, kind: BuildingType, position: GridPos) -> Result<(), GameError> {
        let state = self.lock();
        let island = &state.island;
        placement::validate(&self.catalog, island.grid, &island.registry, kind, position)
    }

    pub fn candidate_positions(&self, kind: BuildingType) -> Result<Vec<GridPos>, GameError> {
        let state = self.lock();
        let island = &state.island;
        placement::candidate_positions(&self.catalog, island.grid, &island.registry, kind)
    }

    pub fn upgrade_cost(&self, building_id: &str) -> Result<ResourceAmount, GameError> {
        self.lock()
            .island
            .registry
            .upgrade_cost(&self.catalog, building_id)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // Mutations validate before touching state, so a poisoned island is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit(
        &self,
        state: &mut SessionState,
        event: &str,
        write: anyhow::Result<()>,
    ) -> Result<IslandSnapshot, GameError> {
        state.rev += 1;
        let snapshot = state.island.snapshot();
        // No subscribers is fine.
        let _ = self
            .updates
            .send(IslandUpdate::new(event, state.rev, snapshot.clone()));

        match write {
            Ok(()) => Ok(snapshot),
            Err(err) => {
                warn!(event, error = %format!("{err:#}"), "store.write_back_failed");
                Err(GameError::persistence(snapshot, err))
            }
        }
    }
}

fn fetch_island(store: &dyn IslandStore, config: &GameConfig) -> anyhow::Result<Island> {
    let record = store.fetch_or_create_island(config)?;
    let buildings = store.fetch_buildings(&record.id)?;
    Ok(Island::from_record(record, buildings))
}

fn rejected(op: &str, err: &GameError) {
    debug!(op, reason = err.error_code(), %err, "operation.rejected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IslandRecord, SqliteStore};
    use skyhaven_protocol::{Building, Size};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::broadcast::error::TryRecvError;

    fn temp_store() -> SqliteStore {
        let p = std::env::temp_dir().join(format!(
            "skyhaven-session-test-{}.db",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        SqliteStore::new(p)
    }

    /// Wraps a real store and fails every call while `failing` is set.
    struct FlakyStore {
        inner: SqliteStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> anyhow::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("store offline");
            }
            Ok(())
        }
    }

    impl IslandStore for FlakyStore {
        fn fetch_or_create_island(&self, defaults: &GameConfig) -> anyhow::Result<IslandRecord> {
            self.check()?;
            self.inner.fetch_or_create_island(defaults)
        }
        fn fetch_buildings(&self, island_id: &str) -> anyhow::Result<Vec<Building>> {
            self.check()?;
            self.inner.fetch_buildings(island_id)
        }
        fn insert_building(&self, island_id: &str, building: &Building) -> anyhow::Result<()> {
            self.check()?;
            self.inner.insert_building(island_id, building)
        }
        fn delete_building(&self, building_id: &str) -> anyhow::Result<()> {
            self.check()?;
            self.inner.delete_building(building_id)
        }
        fn update_building_level(&self, building_id: &str, level: u32) -> anyhow::Result<()> {
            self.check()?;
            self.inner.update_building_level(building_id, level)
        }
        fn update_island_resources(
            &self,
            island_id: &str,
            resources: &ResourceAmount,
        ) -> anyhow::Result<()> {
            self.check()?;
            self.inner.update_island_resources(island_id, resources)
        }
        fn update_island_name(&self, island_id: &str, name: &str) -> anyhow::Result<()> {
            self.check()?;
            self.inner.update_island_name(island_id, name)
        }
    }

    fn session_with(store: Arc<dyn IslandStore>) -> GameSession {
        let catalog = Arc::new(Catalog::builtin().unwrap());
        GameSession::load(catalog, store, &GameConfig::default()).unwrap()
    }

    fn new_session() -> GameSession {
        session_with(Arc::new(temp_store()))
    }

    fn id_at(snap: &IslandSnapshot, x: i64, y: i64) -> String {
        snap.buildings
            .iter()
            .find(|b| b.position == GridPos::new(x, y))
            .map(|b| b.id.clone())
            .expect("building at position")
    }

    #[test]
    fn fresh_island_uses_defaults() {
        let session = new_session();
        let snap = session.snapshot();
        assert_eq!(snap.island_name, "Novice Isle");
        assert_eq!(snap.island_level, 1);
        assert_eq!(snap.grid_size, Size::new(10, 10));
        assert!(snap.buildings.is_empty());
        assert_eq!(snap.resources, ResourceAmount::new(500, 250, 50));
    }

    #[test]
    fn settlement_grows_from_origin() {
        let session = new_session();

        let err = session
            .construct(BuildingType::SteamGenerator, GridPos::new(0, 0))
            .unwrap_err();
        assert!(matches!(err, GameError::NotAdjacent { .. }));

        session
            .construct(BuildingType::SteamGenerator, GridPos::new(5, 5))
            .unwrap();
        let snap = session
            .construct(BuildingType::OreMine, GridPos::new(5, 4))
            .unwrap();
        assert_eq!(snap.buildings.len(), 2);

        let err = session
            .construct(BuildingType::SteamGenerator, GridPos::new(8, 8))
            .unwrap_err();
        assert!(matches!(err, GameError::NotAdjacent { .. }));

        let err = session
            .construct(BuildingType::SteamGenerator, GridPos::new(5, 4))
            .unwrap_err();
        assert!(matches!(err, GameError::Overlaps { .. }));

        let err = session
            .construct(BuildingType::Barracks, GridPos::new(9, 5))
            .unwrap_err();
        assert!(matches!(err, GameError::OutOfBounds { .. }));
    }

    #[test]
    fn tick_adds_level_scaled_production() {
        let session = new_session();
        let snap = session
            .construct(BuildingType::SteamGenerator, GridPos::new(5, 5))
            .unwrap();
        let generator = id_at(&snap, 5, 5);
        session
            .construct(BuildingType::OreMine, GridPos::new(6, 5))
            .unwrap();
        let before = session.upgrade(&generator).unwrap().resources;
        assert_eq!(before, ResourceAmount::new(400, 100, 50));

        let after = session.tick().unwrap().resources;
        assert_eq!(after - before, ResourceAmount::new(20, 8, 0));
    }

    #[test]
    fn tick_on_empty_island_changes_nothing_but_notifies() {
        let session = new_session();
        let mut rx = session.subscribe();
        let snap = session.tick().unwrap();
        assert_eq!(snap.resources, ResourceAmount::new(500, 250, 50));
        assert_eq!(rx.try_recv().unwrap().event, events::PRODUCTION_TICK);
    }

    #[test]
    fn accepted_mutations_notify_and_rejections_do_not() {
        let session = new_session();
        let mut rx = session.subscribe();

        let snap = session
            .construct(BuildingType::OreMine, GridPos::new(5, 5))
            .unwrap();
        let update = rx.try_recv().unwrap();
        assert_eq!(update.event, events::BUILDING_CONSTRUCTED);
        assert_eq!(update.rev, 1);
        assert_eq!(update.snapshot, snap);

        assert!(session.upgrade("bld-missing").is_err());
        assert!(session.demolish("bld-missing").is_err());
        assert!(session.rename_island("   ").is_err());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(session.rev(), 1);

        session.rename_island("  Cloudreach ").unwrap();
        let update = rx.try_recv().unwrap();
        assert_eq!(update.event, events::ISLAND_RENAMED);
        assert_eq!(update.snapshot.island_name, "Cloudreach");
        assert_eq!(update.rev, 2);
    }

    #[test]
    fn demolish_does_not_refund() {
        let session = new_session();
        let start = session.snapshot();
        let built = session
            .construct(BuildingType::SteamGenerator, GridPos::new(5, 5))
            .unwrap();
        let id = id_at(&built, 5, 5);
        let after = session.demolish(&id).unwrap();

        assert!(after.buildings.is_empty());
        // Construction cost is gone for good; this is the intended economy.
        assert_ne!(after.resources, start.resources);
        assert_eq!(
            start.resources - after.resources,
            ResourceAmount::new(0, 50, 0)
        );

        // The origin cell is free again.
        session
            .construct(BuildingType::OreMine, GridPos::new(5, 5))
            .unwrap();
    }

    #[test]
    fn snapshot_is_idempotent() {
        let session = new_session();
        session
            .construct(BuildingType::Barracks, GridPos::new(5, 5))
            .unwrap();
        assert_eq!(session.snapshot(), session.snapshot());
    }

    #[test]
    fn reload_restores_state_from_store() {
        let store: Arc<dyn IslandStore> = Arc::new(temp_store());
        let first = session_with(store.clone());
        first
            .construct(BuildingType::SteamGenerator, GridPos::new(5, 5))
            .unwrap();
        let snap = first
            .construct(BuildingType::OreMine, GridPos::new(4, 5))
            .unwrap();
        first.upgrade(&id_at(&snap, 4, 5)).unwrap();
        first
            .construct(BuildingType::Barracks, GridPos::new(6, 5))
            .unwrap();
        let snap = first.tick().unwrap();
        assert_eq!(snap.resources, ResourceAmount::new(110, 66, 45));

        let second = session_with(store);
        assert_eq!(second.snapshot(), first.snapshot());
        assert_eq!(
            id_at(&second.snapshot(), 6, 5),
            id_at(&snap, 6, 5),
        );
    }

    #[test]
    fn failed_write_back_keeps_memory_and_reconcile_restores_store_view() {
        let flaky = Arc::new(FlakyStore {
            inner: temp_store(),
            failing: AtomicBool::new(false),
        });
        let session = session_with(flaky.clone());
        let mut rx = session.subscribe();

        flaky.failing.store(true, Ordering::SeqCst);
        let err = session
            .construct(BuildingType::SteamGenerator, GridPos::new(5, 5))
            .unwrap_err();
        let GameError::PersistenceFailed { snapshot, .. } = err else {
            panic!("expected PersistenceFailed");
        };
        assert_eq!(snapshot.buildings.len(), 1);
        assert_eq!(session.snapshot(), *snapshot);
        assert_eq!(rx.try_recv().unwrap().event, events::BUILDING_CONSTRUCTED);

        // Still offline: reconcile reports the failure and leaves memory alone.
        assert!(matches!(
            session.reconcile(),
            Err(GameError::PersistenceFailed { .. })
        ));
        assert_eq!(session.snapshot().buildings.len(), 1);

        flaky.failing.store(false, Ordering::SeqCst);
        let restored = session.reconcile().unwrap();
        assert!(restored.buildings.is_empty());
        assert_eq!(restored.resources, ResourceAmount::new(500, 250, 50));
        assert_eq!(rx.try_recv().unwrap().event, events::ISLAND_RECONCILED);
    }

    #[test]
    fn half_written_construction_is_not_reloaded() {
        let store = Arc::new(temp_store());
        let session = session_with(store.clone());
        store
            .open()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER freeze_resources BEFORE UPDATE OF ore ON islands
                 BEGIN SELECT RAISE(ABORT, 'resources frozen'); END;",
            )
            .unwrap();

        let err = session
            .construct(BuildingType::SteamGenerator, GridPos::new(5, 5))
            .unwrap_err();
        assert!(matches!(err, GameError::PersistenceFailed { .. }));

        // Neither the building nor its cost reached the store.
        let restored = session.reconcile().unwrap();
        assert!(restored.buildings.is_empty());
        assert_eq!(restored.resources, ResourceAmount::new(500, 250, 50));
    }

    #[test]
    fn concurrent_upgrades_never_double_spend() {
        let session = new_session();
        let snap = session
            .construct(BuildingType::OreMine, GridPos::new(5, 5))
            .unwrap();
        let mine = id_at(&snap, 5, 5);

        // 400 steam left: level 2 costs 200, level 3 would cost 300.
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..5 {
                        let _ = session.upgrade(&mine);
                        let _ = session.tick();
                    }
                });
            }
        });

        let snap = session.snapshot();
        assert!(snap.resources.is_non_negative());
        let level = snap.buildings[0].level;
        assert!(level >= 2);
        // Every tick pays out ore only; steam only ever goes down by upgrade costs.
        let spent: i64 = (2..=level).map(|l| 100 * i64::from(l)).sum();
        assert_eq!(snap.resources.steam, 400 - spent);
    }

    #[test]
    fn previews_match_construct() {
        let session = new_session();
        assert!(session
            .can_place(BuildingType::OreMine, GridPos::new(5, 5))
            .is_ok());
        assert!(matches!(
            session.can_place(BuildingType::OreMine, GridPos::new(1, 1)),
            Err(GameError::NotAdjacent { .. })
        ));
        assert_eq!(
            session.candidate_positions(BuildingType::Workshop).unwrap(),
            vec![GridPos::new(5, 5)]
        );

        let snap = session
            .construct(BuildingType::OreMine, GridPos::new(5, 5))
            .unwrap();
        assert_eq!(
            session.upgrade_cost(&id_at(&snap, 5, 5)).unwrap(),
            ResourceAmount::new(200, 0, 0)
        );
    }
}

use crate::store::IslandRecord;
use crate::{BuildingRegistry, Ledger};
use skyhaven_protocol::{Building, IslandSnapshot, Size};

/// One player's island: identity, grid, buildings and balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Island {
    pub id: String,
    pub name: String,
    pub level: u32,
    pub grid: Size,
    pub registry: BuildingRegistry,
    pub ledger: Ledger,
}

impl Island {
    pub fn from_record(record: IslandRecord, buildings: Vec<Building>) -> Self {
        Self {
            id: record.id,
            name: record.name,
            level: record.level,
            grid: record.grid,
            registry: BuildingRegistry::from_buildings(buildings),
            ledger: Ledger::new(record.resources),
        }
    }

    pub fn snapshot(&self) -> IslandSnapshot {
        IslandSnapshot {
            island_id: self.id.clone(),
            island_name: self.name.clone(),
            island_level: self.level,
            grid_size: self.grid,
            buildings: self.registry.to_vec(),
            resources: self.ledger.balance(),
        }
    }
}

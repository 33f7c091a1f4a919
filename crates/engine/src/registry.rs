use crate::placement;
use crate::{new_id, Catalog, GameError, Ledger};
use skyhaven_protocol::{Building, BuildingType, GridPos, ResourceAmount, Size};

/// The buildings standing on one island. Order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildingRegistry {
    buildings: Vec<Building>,
}

impl BuildingRegistry {
    pub fn from_buildings(buildings: Vec<Building>) -> Self {
        Self { buildings }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Building> {
        self.buildings.iter()
    }

    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Building> {
        self.buildings.iter().find(|b| b.id == id)
    }

    pub fn to_vec(&self) -> Vec<Building> {
        self.buildings.clone()
    }

    /// Pays for and places a new level-1 building. Nothing changes on rejection.
    pub fn construct(
        &mut self,
        catalog: &Catalog,
        ledger: &mut Ledger,
        grid: Size,
        kind: BuildingType,
        position: GridPos,
    ) -> Result<Building, GameError> {
        let info = catalog.lookup(kind)?;
        if !ledger.affordable(&info.cost) {
            return Err(GameError::insufficient(info.cost, ledger.balance()));
        }
        placement::validate(catalog, grid, self, kind, position)?;

        ledger.spend(&info.cost)?;
        let building = Building {
            id: new_id("bld"),
            kind,
            level: 1,
            position,
            size: info.size,
        };
        self.buildings.push(building.clone());
        Ok(building)
    }

    /// Price of taking `id` to its next level: base cost times the target level.
    pub fn upgrade_cost(&self, catalog: &Catalog, id: &str) -> Result<ResourceAmount, GameError> {
        let building = self.get(id).ok_or_else(|| not_found(id))?;
        let info = catalog.lookup(building.kind)?;
        Ok(info.cost * (i64::from(building.level) + 1))
    }

    pub fn upgrade(
        &mut self,
        catalog: &Catalog,
        ledger: &mut Ledger,
        id: &str,
    ) -> Result<Building, GameError> {
        let cost = self.upgrade_cost(catalog, id)?;
        ledger.spend(&cost)?;
        let building = self
            .buildings
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| not_found(id))?;
        building.level += 1;
        Ok(building.clone())
    }

    /// Removes the building outright. Demolition never refunds resources.
    pub fn demolish(&mut self, id: &str) -> Result<Building, GameError> {
        let idx = self
            .buildings
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| not_found(id))?;
        Ok(self.buildings.remove(idx))
    }

    /// Sum of per-level production times level across all buildings.
    pub fn production_total(&self, catalog: &Catalog) -> ResourceAmount {
        self.buildings
            .iter()
            .filter_map(|b| {
                let per_level = catalog.lookup(b.kind).ok()?.production?;
                Some(per_level * i64::from(b.level))
            })
            .fold(ResourceAmount::ZERO, |acc, p| acc + p)
    }
}

fn not_found(id: &str) -> GameError {
    GameError::NotFound {
        building_id: id.to_string(),
    }
}

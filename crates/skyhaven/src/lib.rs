//! Umbrella crate for Skyhaven.
//!
//! Re-exports the island engine and the wire types so an embedding
//! application can depend on `skyhaven` alone.

pub use skyhaven_engine as engine;
pub use skyhaven_protocol as protocol;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexports_resolve() {
        let catalog = engine::Catalog::builtin().unwrap();
        assert_eq!(catalog.len(), protocol::BuildingType::ALL.len());
    }
}

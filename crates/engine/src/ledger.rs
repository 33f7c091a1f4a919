use crate::GameError;
use skyhaven_protocol::ResourceAmount;

/// Current resource balances of one island.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ledger {
    balance: ResourceAmount,
}

impl Ledger {
    pub fn new(balance: ResourceAmount) -> Self {
        Self { balance }
    }

    pub fn balance(&self) -> ResourceAmount {
        self.balance
    }

    pub fn affordable(&self, cost: &ResourceAmount) -> bool {
        self.balance.covers(cost)
    }

    /// Adds a signed delta. Callers spending resources must check `affordable` first.
    pub fn apply(&mut self, delta: ResourceAmount) -> ResourceAmount {
        self.balance += delta;
        self.balance
    }

    /// Check and deduct in one step; leaves the balance untouched on failure.
    pub fn spend(&mut self, cost: &ResourceAmount) -> Result<ResourceAmount, GameError> {
        if !self.affordable(cost) {
            return Err(GameError::insufficient(*cost, self.balance));
        }
        Ok(self.apply(-*cost))
    }
}

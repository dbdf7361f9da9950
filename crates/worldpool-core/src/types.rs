//! Shared domain types used across Worldpool crates.
//!
//! Quantities are tracked per [`ResourceType`] in a [`ResourceTable`], a
//! fixed-size array indexed by the enum ordinal. The resource-type set is
//! closed; adding a kind means extending the enum and `ALL`.

use serde::{Deserialize, Serialize};

/// Unique identifier for a pool-owning account.
pub type OwnerId = String;

/// Unique identifier for a world (tenant simulation instance).
pub type WorldId = String;

/// Kind of pooled compute resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// CPU units.
    Cpu,
    /// Memory units.
    Memory,
    /// Request-rate units (requests per second).
    RequestRate,
    /// Storage units.
    Storage,
}

impl ResourceType {
    /// Every resource kind, in ordinal order.
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Cpu,
        ResourceType::Memory,
        ResourceType::RequestRate,
        ResourceType::Storage,
    ];

    /// Ordinal position, used to index [`ResourceTable`].
    pub const fn ordinal(self) -> usize {
        match self {
            ResourceType::Cpu => 0,
            ResourceType::Memory => 1,
            ResourceType::RequestRate => 2,
            ResourceType::Storage => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Cpu => "cpu",
            ResourceType::Memory => "memory",
            ResourceType::RequestRate => "request_rate",
            ResourceType::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative priority of a world when competing for pooled or shared capacity.
///
/// Ordering is by urgency: `High` sorts before `Equal`, which sorts before
/// `Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePriority {
    High,
    #[default]
    Equal,
    Low,
}

/// Per-resource-type quantity table.
///
/// Backed by a fixed array indexed by [`ResourceType::ordinal`]. Values are
/// non-negative; callers validate amounts before writing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceTable([f64; ResourceType::ALL.len()]);

impl ResourceTable {
    /// An all-zero table.
    pub fn zeroed() -> Self {
        Self::default()
    }

    pub fn get(&self, rtype: ResourceType) -> f64 {
        self.0[rtype.ordinal()]
    }

    pub fn set(&mut self, rtype: ResourceType, amount: f64) {
        self.0[rtype.ordinal()] = amount;
    }

    pub fn add(&mut self, rtype: ResourceType, amount: f64) {
        self.0[rtype.ordinal()] += amount;
    }

    /// Subtract, flooring at zero.
    pub fn sub_floor(&mut self, rtype: ResourceType, amount: f64) {
        let slot = &mut self.0[rtype.ordinal()];
        *slot = (*slot - amount).max(0.0);
    }

    /// Clear every entry back to zero.
    pub fn clear(&mut self) {
        self.0 = [0.0; ResourceType::ALL.len()];
    }

    /// Iterate `(type, quantity)` pairs in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceType, f64)> + '_ {
        ResourceType::ALL.iter().map(|&t| (t, self.get(t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_match_all_order() {
        for (i, t) in ResourceType::ALL.iter().enumerate() {
            assert_eq!(t.ordinal(), i);
        }
    }

    #[test]
    fn table_get_set_add() {
        let mut table = ResourceTable::zeroed();
        assert_eq!(table.get(ResourceType::Cpu), 0.0);

        table.set(ResourceType::Cpu, 4.0);
        table.add(ResourceType::Cpu, 2.0);
        assert_eq!(table.get(ResourceType::Cpu), 6.0);
        // Other slots untouched.
        assert_eq!(table.get(ResourceType::Memory), 0.0);
    }

    #[test]
    fn sub_floor_never_goes_negative() {
        let mut table = ResourceTable::zeroed();
        table.set(ResourceType::Storage, 5.0);
        table.sub_floor(ResourceType::Storage, 8.0);
        assert_eq!(table.get(ResourceType::Storage), 0.0);
    }

    #[test]
    fn priority_orders_high_first() {
        let mut priorities = vec![
            ResourcePriority::Low,
            ResourcePriority::High,
            ResourcePriority::Equal,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                ResourcePriority::High,
                ResourcePriority::Equal,
                ResourcePriority::Low
            ]
        );
    }

    #[test]
    fn table_round_trips_through_json() {
        let mut table = ResourceTable::zeroed();
        table.set(ResourceType::Memory, 1024.0);
        let json = serde_json::to_string(&table).unwrap();
        let back: ResourceTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}

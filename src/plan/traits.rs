//! Operator traits: orthogonal properties attached to plan nodes.
//!
//! Traits propagate from inputs unless an operator overrides them. A node
//! downstream of any node bearing [`PlanTrait::NotPartitionable`] is itself
//! non-partitionable.

use std::collections::BTreeMap;
use std::fmt;

use crate::types::ColumnDef;

/// The kind of a trait; keys the trait map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TraitType {
    Order,
    Limit,
    NotPartitionable,
}

/// Sort direction of one ordered column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Ascending => write!(f, "ASC"),
            SortDirection::Descending => write!(f, "DESC"),
        }
    }
}

/// An ordering over a list of columns.
pub type OrderSpec = Vec<(ColumnDef, SortDirection)>;

/// A trait value attached to an operator node.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanTrait {
    /// The node's output is ordered as specified.
    Order(OrderSpec),
    /// The node emits at most `limit` records.
    Limit(u64),
    /// The node (and everything downstream) must not be partitioned.
    NotPartitionable,
}

impl PlanTrait {
    /// The trait type keying this trait.
    pub fn trait_type(&self) -> TraitType {
        match self {
            PlanTrait::Order(_) => TraitType::Order,
            PlanTrait::Limit(_) => TraitType::Limit,
            PlanTrait::NotPartitionable => TraitType::NotPartitionable,
        }
    }
}

/// The traits carried by one operator node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraitMap {
    entries: BTreeMap<TraitType, PlanTrait>,
}

impl TraitMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a trait, replacing any existing trait of the same type.
    pub fn insert(&mut self, t: PlanTrait) {
        self.entries.insert(t.trait_type(), t);
    }

    /// Remove a trait by type.
    pub fn remove(&mut self, t: TraitType) {
        self.entries.remove(&t);
    }

    pub fn contains(&self, t: TraitType) -> bool {
        self.entries.contains_key(&t)
    }

    /// The ordering this node guarantees, if any.
    pub fn order(&self) -> Option<&OrderSpec> {
        match self.entries.get(&TraitType::Order) {
            Some(PlanTrait::Order(spec)) => Some(spec),
            _ => None,
        }
    }

    /// The record limit this node guarantees, if any.
    pub fn limit(&self) -> Option<u64> {
        match self.entries.get(&TraitType::Limit) {
            Some(PlanTrait::Limit(limit)) => Some(*limit),
            _ => None,
        }
    }

    /// Whether this node must not be partitioned.
    pub fn not_partitionable(&self) -> bool {
        self.contains(TraitType::NotPartitionable)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlanTrait> {
        self.entries.values()
    }
}

impl FromIterator<PlanTrait> for TraitMap {
    fn from_iter<I: IntoIterator<Item = PlanTrait>>(iter: I) -> Self {
        let mut map = TraitMap::new();
        for t in iter {
            map.insert(t);
        }
        map
    }
}

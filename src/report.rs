use crate::model::{Conflict, Entity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Counts grouped by entity type and status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySummary {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub conflicts: usize,
}

/// Frozen result of one discovery run. Built once by the assembler and
/// never mutated afterwards; the diff engine and serializers read it as a
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyReport {
    pub timestamp: DateTime<Utc>,
    /// Time-ordered identifier, `scan-YYYYMMDD-HHMMSS`
    pub scan_id: String,
    pub subnets: Vec<String>,
    pub entities: Vec<Entity>,
    pub conflicts: Vec<Conflict>,
    pub summary: TopologySummary,
}

impl TopologyReport {
    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn entity_at_ip(&self, ip: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.ip == ip)
    }
}

/// Deduplicate the universe by id (first occurrence wins), compute the
/// summary counters, and freeze everything into a report
pub fn assemble(
    subnets: Vec<String>,
    universe: Vec<Entity>,
    conflicts: Vec<Conflict>,
) -> TopologyReport {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut entities: Vec<Entity> = Vec::with_capacity(universe.len());
    for entity in universe {
        if seen.insert(entity.id.clone()) {
            entities.push(entity);
        }
    }

    let mut summary = TopologySummary {
        total: entities.len(),
        conflicts: conflicts.len(),
        ..TopologySummary::default()
    };
    for entity in &entities {
        *summary
            .by_type
            .entry(entity.entity_type.to_string())
            .or_insert(0) += 1;
        *summary
            .by_status
            .entry(entity.status.to_string())
            .or_insert(0) += 1;
    }

    let timestamp = Utc::now();
    TopologyReport {
        scan_id: timestamp.format("scan-%Y%m%d-%H%M%S").to_string(),
        timestamp,
        subnets,
        entities,
        conflicts,
        summary,
    }
}

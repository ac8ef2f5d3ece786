use crate::diff::DiffReport;
use crate::model::{Conflict, Entity};
use crate::report::TopologyReport;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use std::collections::BTreeSet;

/// Render the frozen report as tables on stdout: the entity tree, the
/// conflict list, and the summary counters
pub fn print_report(report: &TopologyReport) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Name", "Type", "IP", "Status", "Ports", "ID"]);

    for (entity, depth) in tree_order(&report.entities) {
        let indent = "  ".repeat(depth);
        let name = if entity.name.is_empty() {
            "—".to_string()
        } else {
            entity.name.clone()
        };
        let ports = if entity.open_ports.is_empty() {
            "—".to_string()
        } else {
            entity
                .open_ports
                .iter()
                .map(|port| port.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        table.add_row(vec![
            Cell::new(format!("{}{}", indent, name)),
            Cell::new(entity.entity_type.to_string()),
            Cell::new(if entity.ip.is_empty() {
                "—"
            } else {
                entity.ip.as_str()
            }),
            Cell::new(entity.status.to_string()),
            Cell::new(ports),
            Cell::new(&entity.id),
        ]);
    }
    println!("{}", table);

    if !report.conflicts.is_empty() {
        print_conflicts(&report.conflicts);
    }

    println!("\nScan {} over {}", report.scan_id, report.subnets.join(", "));
    println!("=============================================");
    println!("Entities: {}", report.summary.total);
    for (entity_type, count) in &report.summary.by_type {
        println!("  {:<18} {}", entity_type, count);
    }
    println!("By status:");
    for (status, count) in &report.summary.by_status {
        println!("  {:<18} {}", status, count);
    }
    println!("Conflicts: {}", report.summary.conflicts);
}

fn print_conflicts(conflicts: &[Conflict]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Kind", "IP", "Entities", "Description"]);
    for conflict in conflicts {
        table.add_row(vec![
            Cell::new(conflict.kind.to_string()),
            Cell::new(if conflict.ip.is_empty() {
                "—"
            } else {
                conflict.ip.as_str()
            }),
            Cell::new(conflict.involved.join(", ")),
            Cell::new(&conflict.description),
        ]);
    }
    println!("\nConflicts:");
    println!("{}", table);
}

/// Changes versus the previous snapshot
pub fn print_diff(diff: &DiffReport) {
    println!(
        "\nChanges since {} ({} total):",
        diff.baseline_scan_id,
        diff.changes.len()
    );
    if diff.is_empty() {
        println!("  none");
        return;
    }
    for change in &diff.changes {
        println!("  [{:?}] {} - {}", change.kind, change.fingerprint, change.details);
    }
}

/// Depth-first order, roots before children, insertion order preserved
/// among siblings
fn tree_order(entities: &[Entity]) -> Vec<(&Entity, usize)> {
    let ids: BTreeSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    let mut ordered = Vec::with_capacity(entities.len());
    let mut visited: BTreeSet<&str> = BTreeSet::new();

    fn visit<'a>(
        entities: &'a [Entity],
        parent: &str,
        depth: usize,
        ordered: &mut Vec<(&'a Entity, usize)>,
        visited: &mut BTreeSet<&'a str>,
    ) {
        for entity in entities {
            if entity.parent_id.as_deref() == Some(parent) && visited.insert(&entity.id) {
                ordered.push((entity, depth));
                visit(entities, &entity.id, depth + 1, ordered, visited);
            }
        }
    }

    for entity in entities {
        let is_root = match entity.parent_id.as_deref() {
            None | Some("") => true,
            // Orphaned parent references render at top level too
            Some(parent) => !ids.contains(parent),
        };
        if is_root && visited.insert(&entity.id) {
            ordered.push((entity, 0));
            visit(entities, &entity.id, 1, &mut ordered, &mut visited);
        }
    }

    ordered
}

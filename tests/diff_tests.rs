use labtopo::diff::{diff, fingerprint, ChangeKind};
use labtopo::model::{keys, Entity, EntityStatus, EntityType};
use labtopo::report::assemble;
use labtopo::TopologyReport;

fn report_with(entities: Vec<Entity>) -> TopologyReport {
    assemble(vec!["192.168.1.0/24".to_string()], entities, Vec::new())
}

fn tracked_container(docker_id: &str, name: &str, ip: &str) -> Entity {
    let mut entity = Entity::new(format!("docker-{}", &docker_id[..12]), EntityType::Container);
    entity.name = name.to_string();
    entity.ip = ip.to_string();
    entity.status = EntityStatus::Reachable;
    entity.set_meta(keys::DOCKER_ID, docker_id);
    entity
}

#[test]
fn ip_change_is_one_modification() {
    let baseline = report_with(vec![tracked_container(
        "abc123abc123abc1",
        "media",
        "192.168.1.80",
    )]);
    let current = report_with(vec![tracked_container(
        "abc123abc123abc1",
        "media",
        "192.168.1.81",
    )]);

    let changes = diff(&baseline, &current);
    assert_eq!(changes.changes.len(), 1);

    let change = &changes.changes[0];
    assert_eq!(change.kind, ChangeKind::ModifiedIp);
    assert_eq!(change.details, "IP changed: 192.168.1.80 → 192.168.1.81");
    assert_eq!(changes.of_kind(ChangeKind::Added).count(), 0);
    assert_eq!(changes.of_kind(ChangeKind::Removed).count(), 0);
}

#[test]
fn rename_with_docker_id_is_not_add_remove() {
    let baseline = report_with(vec![tracked_container(
        "abc123abc123abc1",
        "old-name",
        "192.168.1.80",
    )]);
    let current = report_with(vec![tracked_container(
        "abc123abc123abc1",
        "new-name",
        "192.168.1.80",
    )]);

    let changes = diff(&baseline, &current);
    assert_eq!(changes.of_kind(ChangeKind::Added).count(), 0);
    assert_eq!(changes.of_kind(ChangeKind::Removed).count(), 0);
    assert_eq!(changes.changes.len(), 1);
    assert_eq!(changes.changes[0].kind, ChangeKind::ModifiedName);
}

#[test]
fn first_differing_field_names_the_kind() {
    let mut old = tracked_container("abc123abc123abc1", "media", "192.168.1.80");
    old.status = EntityStatus::Reachable;
    let mut new = tracked_container("abc123abc123abc1", "renamed", "192.168.1.81");
    new.status = EntityStatus::Unreachable;

    let changes = diff(&report_with(vec![old]), &report_with(vec![new]));
    assert_eq!(changes.changes.len(), 1);
    // ip is checked before status and name
    assert_eq!(changes.changes[0].kind, ChangeKind::ModifiedIp);
    assert!(changes.changes[0].details.contains("IP changed"));
    assert!(changes.changes[0].details.contains("Status changed"));
    assert!(changes.changes[0].details.contains("Name changed"));
}

#[test]
fn added_and_removed_entities_reported() {
    let baseline = report_with(vec![tracked_container(
        "abc123abc123abc1",
        "media",
        "192.168.1.80",
    )]);
    let current = report_with(vec![tracked_container(
        "fed456fed456fed4",
        "fresh",
        "192.168.1.90",
    )]);

    let changes = diff(&baseline, &current);
    assert_eq!(changes.of_kind(ChangeKind::Added).count(), 1);
    assert_eq!(changes.of_kind(ChangeKind::Removed).count(), 1);
}

#[test]
fn exposed_ports_compared_as_sets() {
    let mut old = tracked_container("abc123abc123abc1", "media", "192.168.1.80");
    old.set_meta(
        keys::EXPOSED_PORTS,
        vec!["443/tcp".to_string(), "80/tcp".to_string()],
    );
    let mut new = tracked_container("abc123abc123abc1", "media", "192.168.1.80");
    new.set_meta(
        keys::EXPOSED_PORTS,
        vec!["80/tcp".to_string(), "443/tcp".to_string()],
    );

    let changes = diff(&report_with(vec![old]), &report_with(vec![new]));
    assert!(changes.is_empty(), "{:?}", changes.changes);
}

#[test]
fn fingerprint_priority_chain() {
    let mut entity = Entity::new("x", EntityType::Container);
    entity.ip = "192.168.1.5".to_string();
    assert_eq!(fingerprint(&entity), "ip:192.168.1.5");

    entity.name = "jellyfin".to_string();
    assert_eq!(fingerprint(&entity), "Container:jellyfin");

    entity.set_meta(keys::PORTAINER_STACK_ID, "9");
    assert_eq!(fingerprint(&entity), "portainer-stack:9");

    entity.set_meta(keys::PROXMOX_VMID, "100");
    assert_eq!(fingerprint(&entity), "proxmox:100");

    entity.set_meta(keys::DOCKER_ID, "abc123");
    assert_eq!(fingerprint(&entity), "docker:abc123");
}

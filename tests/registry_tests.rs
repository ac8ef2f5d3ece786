use labtopo::adapters::{PlatformAdapter, ScanSuccess};
use labtopo::model::EntityType;
use labtopo::registry::AdapterRegistry;
use std::sync::Arc;
use test_utils::{create_test_context, create_test_host, MockAdapter};

mod test_utils;

fn ok_adapter(name: &'static str, priority: u8) -> MockAdapter {
    MockAdapter::new(name, priority, Box::new(|_, _| Ok(ScanSuccess::default())))
}

#[tokio::test]
async fn type_match_bypasses_criteria() {
    let ctx = create_test_context(&[]);
    let mut registry = AdapterRegistry::new();
    registry
        .register(Arc::new(
            ok_adapter("Docker", 20)
                .with_ports(&[2375])
                .handling(vec![EntityType::DockerHost]),
        ))
        .unwrap();

    // No matching ports, but the type map selects the adapter anyway
    let mut entity = create_test_host("192.168.1.80", &[]);
    entity.entity_type = EntityType::DockerHost;

    let plan = registry.find_applicable(&entity, &ctx).await;
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].name(), "Docker");
}

#[tokio::test]
async fn port_criteria_require_intersection() {
    let ctx = create_test_context(&[]);
    let mut registry = AdapterRegistry::new();
    registry
        .register(Arc::new(ok_adapter("Docker", 20).with_ports(&[2375, 2376])))
        .unwrap();

    let with_port = create_test_host("192.168.1.80", &[22, 2375]);
    assert_eq!(registry.find_applicable(&with_port, &ctx).await.len(), 1);

    let without = create_test_host("192.168.1.81", &[22]);
    assert!(registry.find_applicable(&without, &ctx).await.is_empty());
}

#[tokio::test]
async fn header_criteria_match_substring_case_insensitively() {
    let ctx = create_test_context(&[]);
    let mut registry = AdapterRegistry::new();
    registry
        .register(Arc::new(MockAdapter::new(
            "Unraid",
            35,
            Box::new(|_, _| Ok(ScanSuccess::default())),
        )))
        .unwrap();
    let mut unraid_registry = AdapterRegistry::new();
    unraid_registry
        .register(Arc::new(
            MockAdapter::new("Unraid", 35, Box::new(|_, _| Ok(ScanSuccess::default())))
                .with_header("Content-Security-Policy", "unraid"),
        ))
        .unwrap();

    let mut entity = create_test_host("192.168.1.9", &[80, 443]);
    entity.http_headers.insert(
        "content-security-policy".to_string(),
        "default-src 'self' UNRAID.net".to_string(),
    );

    assert_eq!(
        unraid_registry.find_applicable(&entity, &ctx).await.len(),
        1
    );

    // An adapter with no criteria at all only runs on type match
    let plain = create_test_host("192.168.1.10", &[80]);
    assert!(registry.find_applicable(&plain, &ctx).await.is_empty());
}

#[tokio::test]
async fn plan_orders_hard_dependencies_first() {
    let ctx = create_test_context(&[]);
    let mut registry = AdapterRegistry::new();
    // Lower priority but depends on the higher-priority adapter
    registry
        .register(Arc::new(
            ok_adapter("Enricher", 10)
                .with_ports(&[9000])
                .with_deps(vec!["Base"]),
        ))
        .unwrap();
    registry
        .register(Arc::new(ok_adapter("Base", 40).with_ports(&[9000])))
        .unwrap();

    let entity = create_test_host("192.168.1.80", &[9000]);
    let plan = registry.find_applicable(&entity, &ctx).await;
    let names: Vec<&str> = plan.iter().map(|a| a.name()).collect();
    assert_eq!(names, vec!["Base", "Enricher"]);
}

#[tokio::test]
async fn unanswered_url_pattern_rejects_adapter() {
    let ctx = create_test_context(&[]);
    let mut registry = AdapterRegistry::new();
    registry
        .register(Arc::new(MockAdapter::new(
            "WebApp",
            50,
            Box::new(|_, _| Ok(ScanSuccess::default())),
        )))
        .unwrap();
    let mut url_registry = AdapterRegistry::new();
    url_registry
        .register(Arc::new(
            MockAdapter::new("WebApp", 50, Box::new(|_, _| Ok(ScanSuccess::default())))
                .with_url_pattern("/api/health"),
        ))
        .unwrap();

    // Nothing is listening at this address, so the probe cannot get a 2xx
    let entity = create_test_host("127.0.0.1", &[80]);
    assert!(url_registry.find_applicable(&entity, &ctx).await.is_empty());
}

use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("dkeeper".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    WATCH_EVENTS_DELIVERED.with_label_values(&["node_created"]).inc();
    let metrics = &registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"dkeeper_watch_events_delivered"),
        "Missing dkeeper_watch_events_delivered"
    );
}

#[test]
fn test_encode_contains_counter() {
    let registry = create_test_registry();
    SESSIONS_REAPED.inc();

    let body = encode(&registry);
    assert!(body.contains("dkeeper_sessions_reaped"));
}

use super::*;
use std::sync::Arc;
use std::thread;

fn identity(entity_id: i32) -> AgentIdentity {
    AgentIdentity {
        uuid: Uuid::new_v4(),
        entity_id: Some(entity_id),
    }
}

#[test]
fn test_bind_and_lookup() {
    let registry = CompanionRegistry::new();
    let id = identity(1);

    assert!(registry.bind("lumen", id).is_none());
    assert_eq!(registry.lookup("lumen"), Some(id));
    assert!(registry.lookup("quill").is_none());
}

#[test]
fn test_rebind_replaces_previous_identity() {
    let registry = CompanionRegistry::new();
    let first = identity(1);
    let second = identity(2);

    registry.bind("lumen", first);
    let replaced = registry.bind("lumen", second);

    assert_eq!(replaced, Some(first));
    assert_eq!(registry.lookup("lumen"), Some(second));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_unbind_is_idempotent() {
    let registry = CompanionRegistry::new();
    let id = identity(1);
    registry.bind("lumen", id);

    assert_eq!(registry.unbind("lumen"), Some(id));
    assert!(registry.unbind("lumen").is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_all_names() {
    let registry = CompanionRegistry::new();
    registry.bind("a", identity(1));
    registry.bind("b", identity(2));
    registry.bind("c", identity(3));

    let mut names = registry.all_names();
    names.sort();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn test_record_round_trip_drops_entity_ids() {
    let registry = CompanionRegistry::new();
    let a = identity(1);
    let b = identity(2);
    registry.bind("a", a);
    registry.bind("b", b);

    let record = registry.to_record();
    assert_eq!(record.len(), 2);
    assert_eq!(record["a"], a.uuid);

    let restored = CompanionRegistry::from_record(record);
    assert_eq!(restored.lookup("a"), Some(AgentIdentity::durable(a.uuid)));
    assert_eq!(restored.lookup("b").unwrap().uuid, b.uuid);
    assert!(restored.lookup("b").unwrap().entity_id.is_none());
}

#[test]
fn test_empty_record() {
    let restored = CompanionRegistry::from_record(CompanionRecord::new());
    assert!(restored.is_empty());
    assert!(restored.to_record().is_empty());
}

#[test]
fn test_concurrent_access() {
    let registry = Arc::new(CompanionRegistry::new());
    let mut handles = vec![];

    // Spawn 10 threads, each binding and reading its own name
    for i in 0..10 {
        let registry = Arc::clone(&registry);
        handles.push(thread::spawn(move || {
            let name = format!("companion_{}", i);
            registry.bind(&name, identity(i));
            assert!(registry.lookup(&name).is_some());
            let _ = registry.all_names();
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len(), 10);
}

//! Integration tests for the audit capture engine.
//!
//! These tests drive the engine the way an entity framework and a request
//! handling layer would: registered entity types, lifecycle events, scoped
//! ambient context and concurrent execution contexts.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use chronicle_audit::{
    context, AuditOptions, AuditQuery, AuditStore, Auditor, InMemoryStore, LifecycleEvent,
    StaticRequestScope, TracingStore,
};
use chronicle_core::{
    Action, Actor, AuditConfig, AuditId, AuditRecord, Auditable, Change, EntityRef, Error,
    StorageError,
};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Clone)]
struct User {
    id: u64,
    name: String,
    username: String,
}

impl User {
    fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            username: name.to_lowercase(),
        }
    }
}

impl Auditable for User {
    fn entity_type(&self) -> &str {
        "User"
    }

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attributes = Map::new();
        attributes.insert("id".to_string(), json!(self.id));
        attributes.insert("name".to_string(), json!(self.name));
        attributes.insert("username".to_string(), json!(self.username));
        attributes.insert("lock_version".to_string(), json!(0));
        attributes.insert("updated_at".to_string(), json!("2024-01-01T00:00:00Z"));
        attributes
    }
}

#[derive(Debug, Clone)]
struct Company {
    id: u64,
    name: String,
    owner_id: u64,
}

impl Auditable for Company {
    fn entity_type(&self) -> &str {
        "Company"
    }

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut attributes = Map::new();
        attributes.insert("id".to_string(), json!(self.id));
        attributes.insert("name".to_string(), json!(self.name));
        attributes.insert("owner_id".to_string(), json!(self.owner_id));
        attributes
    }

    fn associated(&self) -> Option<EntityRef> {
        Some(EntityRef::new("User", self.owner_id.to_string()))
    }
}

/// A subtype of `User` with its own type name.
#[derive(Debug, Clone)]
struct Admin(User);

impl Auditable for Admin {
    fn entity_type(&self) -> &str {
        "Admin"
    }

    fn entity_id(&self) -> String {
        self.0.entity_id()
    }

    fn attributes(&self) -> Map<String, Value> {
        self.0.attributes()
    }
}

/// Keeps every record handed back through the `after_audit` hook.
#[derive(Debug, Default)]
struct Watched {
    audited: Mutex<Vec<AuditRecord>>,
}

impl Auditable for Watched {
    fn entity_type(&self) -> &str {
        "Watched"
    }

    fn entity_id(&self) -> String {
        "1".to_string()
    }

    fn attributes(&self) -> Map<String, Value> {
        raw(json!({"id": 1, "state": "on"}))
    }

    fn after_audit(&self, record: &AuditRecord) {
        self.audited.lock().push(record.clone());
    }
}

#[derive(Debug)]
struct FailingStore;

impl AuditStore for FailingStore {
    fn create(&self, _record: &AuditRecord) -> Result<AuditId, StorageError> {
        Err(StorageError::Backend("connection reset".to_string()))
    }

    fn find(&self, _query: &AuditQuery) -> Result<Vec<AuditRecord>, StorageError> {
        Err(StorageError::Backend("connection reset".to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

fn raw(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn setup() -> (Arc<Auditor>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let auditor = Auditor::builder().with_store(store.clone()).build();
    auditor.register("User", AuditOptions::new());
    auditor.register("Company", AuditOptions::new());
    auditor.declare_type("Admin", "User");
    (Arc::new(auditor), store)
}

// =============================================================================
// Capture Tests
// =============================================================================

#[test]
fn test_update_attributed_to_ambient_actor_and_transaction() {
    let (auditor, store) = setup();
    let user = User::new(1, "Bart");

    let record = context::as_actor("alice", || {
        context::as_transaction("tx-1", || {
            auditor.capture(LifecycleEvent::update(
                &user,
                raw(json!({"name": ["Brandon", "Bart"], "updated_at": ["t0", "t1"]})),
            ))
        })
    })
    .expect("capture should succeed")
    .expect("update should be recorded");

    assert_eq!(record.action(), Action::Update);
    assert_eq!(record.subject(), &EntityRef::new("User", "1"));
    assert_eq!(
        record.changes.get("name"),
        Some(&Change::Pair(json!("Brandon"), json!("Bart")))
    );
    assert!(!record.changes.contains("updated_at"));
    assert_eq!(record.username(), Some("alice"));
    assert_eq!(record.transaction_id.as_deref(), Some("tx-1"));

    assert_eq!(store.len(), 1);
    assert!(context::actor().is_none());
    assert!(context::transaction_id().is_none());
}

#[test]
fn test_create_attributed_to_ambient_actor_and_transaction() {
    let (auditor, store) = setup();

    context::as_actor("alice", || {
        context::as_transaction("tx-1", || {
            auditor.capture(LifecycleEvent::create(&User::new(1, "Bart")))
        })
    })
    .unwrap();

    let records = store.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.action(), Action::Create);
    assert_eq!(record.new_attributes()["name"], json!("Bart"));
    assert_eq!(record.username(), Some("alice"));
    assert_eq!(record.transaction_id.as_deref(), Some("tx-1"));
}

#[test]
fn test_lifecycle_chain_is_queryable_in_order() {
    let (auditor, _store) = setup();
    let mut user = User::new(7, "Brandon");

    auditor.capture(LifecycleEvent::create(&user)).unwrap();
    user.name = "Changed".to_string();
    auditor
        .capture(LifecycleEvent::update(
            &user,
            raw(json!({"name": ["Brandon", "Changed"]})),
        ))
        .unwrap();
    auditor.capture(LifecycleEvent::destroy(&user)).unwrap();

    let audits = auditor.audits_for(&user.entity_ref()).unwrap();
    let actions: Vec<_> = audits.iter().map(AuditRecord::action).collect();
    assert_eq!(actions, vec![Action::Create, Action::Update, Action::Destroy]);

    assert_eq!(audits[1].old_attributes()["name"], audits[0].new_attributes()["name"]);
    assert_eq!(audits[2].old_attributes()["name"], audits[1].new_attributes()["name"]);
    assert_eq!(audits[2].old_attributes()["name"], json!("Changed"));

    let created = &audits[0];
    assert_eq!(
        created.new_attributes(),
        raw(json!({"name": "Brandon", "username": "brandon"}))
    );
    assert!(audits.iter().all(|a| a.id.is_some()));
    assert!(audits.iter().all(|a| a.request_id.is_some()));

    let destroys = auditor
        .store()
        .find(&AuditQuery::destroys().for_subject(user.entity_ref()))
        .unwrap();
    assert_eq!(destroys.len(), 1);
}

#[test]
fn test_comment_alone_is_worth_recording() {
    let (auditor, store) = setup();
    let user = User::new(1, "Bart");

    let nothing = auditor
        .capture(LifecycleEvent::update(&user, raw(json!({"name": ["Bart", "Bart"]}))))
        .unwrap();
    assert!(nothing.is_none());

    let commented = auditor
        .capture(LifecycleEvent::update(&user, Map::new()).with_comment("Reviewed"))
        .unwrap()
        .unwrap();
    assert_eq!(commented.comment.as_deref(), Some("Reviewed"));
    assert!(commented.changes.is_empty());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_associated_audits() {
    let (auditor, _store) = setup();
    let owner = User::new(1, "Owner");
    let company = Company {
        id: 3,
        name: "Acme".to_string(),
        owner_id: 1,
    };

    auditor.capture(LifecycleEvent::create(&owner)).unwrap();
    auditor.capture(LifecycleEvent::create(&company)).unwrap();

    let associated = auditor.associated_audits(&owner.entity_ref()).unwrap();
    assert_eq!(associated.len(), 1);
    assert_eq!(associated[0].subject(), &EntityRef::new("Company", "3"));
    assert_eq!(associated[0].associated, Some(owner.entity_ref()));
}

#[test]
fn test_only_and_except_options() {
    let (auditor, store) = setup();
    auditor.register(
        "Company",
        AuditOptions::new()
            .only([Action::Create, Action::Destroy])
            .except(["owner_id"]),
    );
    let company = Company {
        id: 3,
        name: "Acme".to_string(),
        owner_id: 1,
    };

    let created = auditor.capture(LifecycleEvent::create(&company)).unwrap().unwrap();
    assert_eq!(created.changes.attributes().collect::<Vec<_>>(), vec!["name"]);

    assert!(!auditor.should_capture("Company", Action::Update));
    let updated = auditor
        .capture(LifecycleEvent::update(&company, raw(json!({"name": ["Acme", "Acme Inc"]}))))
        .unwrap();
    assert!(updated.is_none());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_subtypes_are_audited() {
    let (auditor, _store) = setup();
    auditor.declare_type("SuperAdmin", "Admin");

    assert!(auditor.audited_types().contains("Admin"));
    assert!(auditor.audited_types().contains("SuperAdmin"));

    let admin = Admin(User::new(2, "Root"));
    let record = auditor.capture(LifecycleEvent::create(&admin)).unwrap().unwrap();
    assert_eq!(record.subject().entity_type, "Admin");
}

#[test]
fn test_restoring_reclassifies_creates() {
    let store = Arc::new(InMemoryStore::new());
    let config = AuditConfig::from_yaml_str("restoring: true\n").unwrap();
    let auditor = Auditor::builder()
        .with_store(store.clone())
        .with_config(config)
        .build();
    auditor.register("User", AuditOptions::new());

    let record = auditor
        .capture(LifecycleEvent::create(&User::new(1, "Back")))
        .unwrap()
        .unwrap();

    assert_eq!(record.action(), Action::Restore);
    auditor.configure(|config| config.restoring = false);
    let record = auditor
        .capture(LifecycleEvent::create(&User::new(2, "New")))
        .unwrap()
        .unwrap();
    assert_eq!(record.action(), Action::Create);
}

#[test]
fn test_configured_ignore_list() {
    let store = Arc::new(InMemoryStore::new());
    let auditor = Auditor::builder().with_store(store).build();
    auditor.register("User", AuditOptions::new());
    auditor.configure(|config| config.ignored_attributes.push("username".to_string()));

    let record = auditor
        .capture(LifecycleEvent::create(&User::new(1, "Bart")))
        .unwrap()
        .unwrap();

    assert_eq!(record.changes.attributes().collect::<Vec<_>>(), vec!["name"]);
}

#[test]
fn test_after_audit_receives_stored_record() {
    let (auditor, _store) = setup();
    auditor.register("Watched", AuditOptions::new());
    let watched = Watched::default();

    let record = auditor
        .capture(LifecycleEvent::create(&watched))
        .unwrap()
        .unwrap();

    let audited = watched.audited.lock();
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].id, record.id);
    assert!(audited[0].id.is_some());
}

#[test]
fn test_after_audit_skipped_without_record() {
    let (auditor, _store) = setup();
    auditor.register("Watched", AuditOptions::new());
    let watched = Watched::default();

    let skipped = auditor
        .capture(LifecycleEvent::update(&watched, raw(json!({"state": ["on", "on"]}))))
        .unwrap();

    assert!(skipped.is_none());
    assert!(watched.audited.lock().is_empty());
}

#[test]
fn test_after_audit_skipped_when_store_fails() {
    let auditor = Auditor::builder().with_store(Arc::new(FailingStore)).build();
    auditor.register("Watched", AuditOptions::new());
    let watched = Watched::default();

    assert!(auditor.capture(LifecycleEvent::create(&watched)).is_err());
    assert!(watched.audited.lock().is_empty());
}

// =============================================================================
// Suppression Tests
// =============================================================================

#[test]
fn test_without_auditing_only_affects_named_type() {
    let (auditor, store) = setup();
    let user = User::new(1, "Bart");
    let admin = Admin(User::new(2, "Root"));
    let company = Company {
        id: 3,
        name: "Acme".to_string(),
        owner_id: 1,
    };

    auditor.without_auditing("User", || {
        assert!(auditor.capture(LifecycleEvent::create(&user)).unwrap().is_none());
        assert!(auditor.capture(LifecycleEvent::create(&admin)).unwrap().is_none());
        assert!(auditor.capture(LifecycleEvent::create(&company)).unwrap().is_some());
    });

    assert_eq!(store.len(), 1);
    assert!(auditor.capture(LifecycleEvent::create(&user)).unwrap().is_some());
}

#[test]
fn test_without_auditing_is_confined_to_its_thread() {
    let (auditor, store) = setup();

    auditor.without_auditing("User", || {
        let other = Arc::clone(&auditor);
        std::thread::spawn(move || {
            other
                .capture(LifecycleEvent::create(&User::new(9, "Elsewhere")))
                .unwrap()
        })
        .join()
        .unwrap()
        .expect("other threads keep auditing");
    });

    assert_eq!(store.len(), 1);
}

#[test]
fn test_without_auditing_restores_after_panic() {
    let (auditor, _store) = setup();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        auditor.without_auditing("User", || panic!("boom"));
    }));

    assert!(result.is_err());
    assert!(auditor.should_capture("User", Action::Create));
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_threads_keep_their_own_actor() {
    let (auditor, store) = setup();

    let handles: Vec<_> = [("alice", 1_u64), ("bob", 2_u64)]
        .into_iter()
        .map(|(name, id)| {
            let auditor = Arc::clone(&auditor);
            std::thread::spawn(move || {
                context::as_actor(name, || {
                    for _ in 0..20 {
                        std::thread::sleep(Duration::from_millis(1));
                        auditor
                            .capture(LifecycleEvent::create(&User::new(id, name)))
                            .unwrap();
                    }
                });
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let records = store.records();
    assert_eq!(records.len(), 40);
    for record in records {
        let expected = if record.subject().id == "1" { "alice" } else { "bob" };
        assert_eq!(record.username(), Some(expected));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_tasks_keep_their_own_actor() {
    let (auditor, store) = setup();

    let tasks: Vec<_> = [("alice", 1_u64, 15_u64), ("bob", 2_u64, 5_u64)]
        .into_iter()
        .map(|(name, id, delay)| {
            let auditor = Arc::clone(&auditor);
            tokio::spawn(context::as_actor_async(name, async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                auditor
                    .capture(LifecycleEvent::create(&User::new(id, name)))
                    .unwrap()
                    .unwrap()
            }))
        })
        .collect();

    for task in tasks {
        let record = task.await.unwrap();
        let expected = if record.subject().id == "1" { "alice" } else { "bob" };
        assert_eq!(record.username(), Some(expected));
    }
    assert_eq!(store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_scopes_leave_caller_untouched() {
    let (auditor, store) = setup();

    context::as_actor_async("bob", async {
        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            context::as_actor_async("alice", tokio::time::sleep(Duration::from_secs(5))),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(context::actor(), Some(Actor::name("bob")));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            auditor.without_auditing_async("User", tokio::time::sleep(Duration::from_secs(5))),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(auditor.should_capture("User", Action::Create));

        let record = auditor
            .capture(LifecycleEvent::create(&User::new(1, "Bart")))
            .unwrap()
            .unwrap();
        assert_eq!(record.username(), Some("bob"));
    })
    .await;

    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_without_auditing_async_is_confined_to_its_task() {
    let (auditor, store) = setup();

    let quiet = tokio::spawn(auditor.without_auditing_async("User", {
        let auditor = Arc::clone(&auditor);
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            auditor
                .capture(LifecycleEvent::create(&User::new(1, "Quiet")))
                .unwrap()
        }
    }));
    let loud = tokio::spawn({
        let auditor = Arc::clone(&auditor);
        async move {
            auditor
                .capture(LifecycleEvent::create(&User::new(2, "Loud")))
                .unwrap()
        }
    });

    assert!(quiet.await.unwrap().is_none());
    assert!(loud.await.unwrap().is_some());
    assert_eq!(store.len(), 1);
}

// =============================================================================
// Request Interception Tests
// =============================================================================

fn request() -> Arc<StaticRequestScope> {
    Arc::new(
        StaticRequestScope::new()
            .with_accessor("current_user", Actor::principal("User", "5"))
            .with_accessor("transaction_id", "req-tx")
            .with_accessor("organization_id", 42_i64)
            .with_remote_address("1.2.3.4")
            .with_request_id("req-abc"),
    )
}

#[test]
fn test_request_scope_fills_unset_fields() {
    let (auditor, _store) = setup();
    let interceptor = auditor.interceptor().expect("interception is on by default");

    let record = interceptor
        .around(request(), || {
            auditor.capture(LifecycleEvent::create(&User::new(1, "Bart")))
        })
        .unwrap()
        .unwrap();

    assert_eq!(record.principal(), Some(&EntityRef::new("User", "5")));
    assert_eq!(record.transaction_id.as_deref(), Some("req-tx"));
    assert_eq!(record.organization_id.as_deref(), Some("42"));
    assert_eq!(record.remote_address.as_deref(), Some("1.2.3.4"));
    assert_eq!(record.request_id.as_deref(), Some("req-abc"));
}

#[test]
fn test_explicit_and_ambient_values_beat_request_scope() {
    let (auditor, _store) = setup();
    let interceptor = auditor.interceptor().unwrap();

    let record = interceptor
        .around(request(), || {
            context::as_transaction("ambient-tx", || {
                auditor.capture(LifecycleEvent::create(&User::new(1, "Bart")).with_actor("bob"))
            })
        })
        .unwrap()
        .unwrap();

    assert_eq!(record.username(), Some("bob"));
    assert_eq!(record.transaction_id.as_deref(), Some("ambient-tx"));
    assert_eq!(record.organization_id.as_deref(), Some("42"));
}

#[test]
fn test_interception_can_be_turned_off() {
    let store = Arc::new(InMemoryStore::new());
    let auditor = Auditor::builder()
        .with_store(store)
        .intercept_requests(false)
        .build();
    auditor.register("User", AuditOptions::new());

    assert!(auditor.interceptor().is_none());
    let record = context::as_actor("carol", || {
        auditor.capture(LifecycleEvent::create(&User::new(1, "Bart")))
    })
    .unwrap()
    .unwrap();
    assert!(record.remote_address.is_none());
    assert_eq!(record.username(), Some("carol"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_are_isolated() {
    let (auditor, _store) = setup();

    let tasks: Vec<_> = ["10.0.0.1", "10.0.0.2"]
        .into_iter()
        .enumerate()
        .map(|(i, address)| {
            let auditor = Arc::clone(&auditor);
            let scope = Arc::new(StaticRequestScope::new().with_remote_address(address));
            let interceptor = auditor.interceptor().unwrap().clone();
            tokio::spawn(interceptor.around_async(scope, async move {
                tokio::time::sleep(Duration::from_millis(10 - 5 * i as u64)).await;
                auditor
                    .capture(LifecycleEvent::create(&User::new(i as u64, "Bart")))
                    .unwrap()
                    .unwrap()
            }))
        })
        .collect();

    for (task, expected) in tasks.into_iter().zip(["10.0.0.1", "10.0.0.2"]) {
        let record = task.await.unwrap();
        assert_eq!(record.remote_address.as_deref(), Some(expected));
    }
}

// =============================================================================
// Storage Tests
// =============================================================================

#[test]
fn test_storage_failure_reaches_the_caller() {
    let auditor = Auditor::builder().with_store(Arc::new(FailingStore)).build();
    auditor.register("User", AuditOptions::new());

    let err = auditor
        .capture(LifecycleEvent::create(&User::new(1, "Bart")))
        .unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::Backend(_))));

    let err = auditor
        .audits_for(&EntityRef::new("User", "1"))
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
}

#[test]
fn test_tracing_store_keeps_records_queryable() {
    let auditor = Auditor::builder()
        .with_store(Arc::new(TracingStore::new(InMemoryStore::new())))
        .build();
    auditor.register("User", AuditOptions::new());
    let user = User::new(1, "Bart");

    auditor.capture(LifecycleEvent::create(&user)).unwrap();

    assert_eq!(auditor.store().name(), "tracing");
    assert_eq!(auditor.audits_for(&user.entity_ref()).unwrap().len(), 1);
}

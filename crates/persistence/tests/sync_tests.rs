//! Index propagation and the CQRS read path, observed through the in-process
//! index.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use common::{Profile, SampleModel, indexed_registry, indexed_sample_dao, sample_dao, settle};
use tessera_persistence::error::StorageResult;
use tessera_persistence::sync::{ChangeEvent, ChangeKind, ENTITY_MUTATED, EventHandler};
use tessera_persistence::types::{Filter, Patch, QueryOptions};
use tessera_persistence::{FallbackReason, ReadPath};

#[tokio::test]
async fn test_create_reaches_index() {
    let (dao, index) = indexed_sample_dao().await;
    let mut user = SampleModel::new("user1", "male", "china");
    dao.create(&mut user).await.unwrap();
    settle(&dao).await;

    let document = index
        .document(dao.index_name(), &user.model.uuid)
        .expect("indexed document");
    assert_eq!(document["name"], json!("user1"));
    assert_eq!(document["homeNation"], json!("china"));
    assert_eq!(document["id"], json!(user.model.id));
}

#[tokio::test]
async fn test_query_served_by_index() {
    let (dao, _index) = indexed_sample_dao().await;
    for name in ["user2", "user1", "user3"] {
        dao.create(&mut SampleModel::new(name, "male", "china"))
            .await
            .unwrap();
    }
    settle(&dao).await;

    let result = dao
        .query_traced(
            &Filter::new().eq("nation", "china"),
            &QueryOptions::new().order("name asc").limit(2),
        )
        .await
        .unwrap();

    assert_eq!(result.served_by, ReadPath::Index);
    let names: Vec<&str> = result.items.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["user1", "user2"]);
    assert!(result.items.iter().all(|u| !u.model.uuid.is_empty()));
}

#[tokio::test]
async fn test_update_propagates_supplied_fields() {
    let (dao, index) = indexed_sample_dao().await;
    let mut user = SampleModel::new("user1", "male", "china");
    user.city = "beijing".to_string();
    dao.create(&mut user).await.unwrap();
    settle(&dao).await;

    dao.update(
        Filter::new().eq("name", "user1"),
        &Patch::new().set("nation", "japan"),
    )
    .await
    .unwrap();
    settle(&dao).await;

    let document = index.document(dao.index_name(), &user.model.uuid).unwrap();
    assert_eq!(document["homeNation"], json!("japan"));
    assert_eq!(document["city"], json!("beijing"));
}

#[tokio::test]
async fn test_upsert_indexes_stored_row() {
    let (dao, index) = indexed_sample_dao().await;
    let mut first = SampleModel::new("user1", "male", "china");
    dao.create(&mut first).await.unwrap();
    settle(&dao).await;

    let mut second = SampleModel::new("user1", "male", "japan");
    dao.upsert(&mut second, &["name", "sex"], &["nation"])
        .await
        .unwrap();
    settle(&dao).await;

    assert_eq!(index.document_count(dao.index_name()), 1);
    let document = index.document(dao.index_name(), &first.model.uuid).unwrap();
    assert_eq!(document["homeNation"], json!("japan"));
    assert_eq!(document["id"], json!(first.model.id));
}

#[tokio::test]
async fn test_failed_create_publishes_nothing() {
    let (dao, index) = indexed_sample_dao().await;
    dao.create(&mut SampleModel::new("user1", "male", "china"))
        .await
        .unwrap();
    settle(&dao).await;
    let before = dao.notifier().stats().published;

    let err = dao
        .create(&mut SampleModel::new("user1", "male", "japan"))
        .await
        .unwrap_err();
    assert!(err.is_constraint_violation());
    settle(&dao).await;

    assert_eq!(dao.notifier().stats().published, before);
    assert_eq!(index.document_count(dao.index_name()), 1);
}

#[tokio::test]
async fn test_index_failure_does_not_fail_mutation() {
    let (dao, index) = indexed_sample_dao().await;
    index.set_unavailable(true);

    let mut user = SampleModel::new("user1", "male", "china");
    dao.create(&mut user).await.unwrap();
    settle(&dao).await;

    let stats = dao.notifier().stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.delivered, 0);

    // The relational store still has the row.
    let result = dao
        .query_traced(&Filter::new().eq("name", "user1"), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(result.items.len(), 1);
    assert!(matches!(
        result.served_by,
        ReadPath::Relational {
            fallback: Some(FallbackReason::IndexUnavailable(_))
        }
    ));
}

#[tokio::test]
async fn test_json_column_falls_back_to_relational() {
    let (registry, _index) = indexed_registry().await;
    let dao = registry.accessor::<Profile>("db1").await.unwrap();

    for (handle, rank) in [("b", 2), ("a", 1)] {
        let mut profile = Profile {
            handle: handle.to_string(),
            attributes: json!({"rank": rank}),
            ..Default::default()
        };
        dao.create(&mut profile).await.unwrap();
    }
    settle(&dao).await;

    let result = dao
        .query_traced(&Filter::new(), &QueryOptions::new().order("attributes asc"))
        .await
        .unwrap();
    assert_eq!(
        result.served_by,
        ReadPath::Relational {
            fallback: Some(FallbackReason::UnsupportedColumn("attributes".to_string()))
        }
    );
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.items[0].attributes, json!({"rank": 1}));

    let by_handle = dao
        .query_traced(&Filter::new().eq("handle", "b"), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(by_handle.served_by, ReadPath::Index);
    assert_eq!(by_handle.items[0].attributes, json!({"rank": 2}));
}

#[tokio::test]
async fn test_delete_removes_index_documents() {
    let (dao, index) = indexed_sample_dao().await;
    let mut keep = SampleModel::new("user2", "male", "china");
    dao.create(&mut SampleModel::new("user1", "male", "china"))
        .await
        .unwrap();
    dao.create(&mut SampleModel::new("user1", "female", "china"))
        .await
        .unwrap();
    dao.create(&mut keep).await.unwrap();
    settle(&dao).await;
    assert_eq!(index.document_count(dao.index_name()), 3);

    let filter = Filter::new().eq("name", "user1");
    assert_eq!(dao.delete(&filter).await.unwrap(), 2);
    settle(&dao).await;

    assert_eq!(index.document_count(dao.index_name()), 1);
    assert!(index.document(dao.index_name(), &keep.model.uuid).is_some());

    let result = dao.query_traced(&filter, &QueryOptions::new()).await.unwrap();
    assert_eq!(result.served_by, ReadPath::Index);
    assert!(result.items.is_empty());
}

#[tokio::test]
async fn test_unconditioned_delete_keeps_index_documents() {
    let (dao, index) = indexed_sample_dao().await;
    for name in ["user1", "user2"] {
        dao.create(&mut SampleModel::new(name, "male", "china"))
            .await
            .unwrap();
    }
    settle(&dao).await;

    assert!(dao.delete(&Filter::new()).await.is_err());
    assert!(dao
        .update(Filter::new(), &Patch::new().set("nation", "japan"))
        .await
        .is_err());
    settle(&dao).await;

    assert_eq!(index.document_count(dao.index_name()), 2);
    let stored = dao
        .query(&Filter::new().eq("nation", "china"), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_converge_to_a_written_value() {
    let (dao, index) = indexed_sample_dao().await;
    let mut user = SampleModel::new("user1", "male", "china");
    dao.create(&mut user).await.unwrap();
    settle(&dao).await;

    let nations: Vec<String> = (0..8).map(|i| format!("nation{}", i)).collect();
    let mut tasks = Vec::new();
    for nation in nations.clone() {
        let dao = dao.clone();
        tasks.push(tokio::spawn(async move {
            dao.update(
                Filter::new().eq("name", "user1"),
                &Patch::new().set("nation", nation.as_str()),
            )
            .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    settle(&dao).await;

    // Index order may differ from relational order; both hold one of the
    // written values.
    let written: HashSet<String> = nations.into_iter().collect();
    let document = index.document(dao.index_name(), &user.model.uuid).unwrap();
    let indexed = document["homeNation"].as_str().unwrap().to_string();
    assert!(written.contains(&indexed));

    let stored = dao
        .query(&Filter::new().eq("uuid", user.model.uuid.as_str()), &QueryOptions::new())
        .await
        .unwrap();
    // Read from the index, so equal to the indexed value.
    assert!(written.contains(&stored[0].nation));
    assert_eq!(dao.notifier().stats().failed, 0);
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ChangeEvent>>,
}

#[async_trait]
impl EventHandler<ChangeEvent> for Recorder {
    async fn handle(&self, event: &ChangeEvent) -> StorageResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_application_subscriber_sees_events() {
    let dao = sample_dao().await;
    let recorder = Arc::new(Recorder::default());
    let subscription = dao.notifier().subscribe(ENTITY_MUTATED, recorder.clone());

    let mut user = SampleModel::new("user1", "male", "china");
    dao.create(&mut user).await.unwrap();
    dao.update(
        Filter::new().eq("name", "user1"),
        &Patch::new().set("city", "shanghai"),
    )
    .await
    .unwrap();
    settle(&dao).await;

    {
        let events = recorder.events.lock();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.table == "sample_models" && e.is_effective()));
        assert!(events.iter().any(|e| matches!(
            &e.kind,
            ChangeKind::Upserted { id, .. } if *id == user.model.uuid
        )));
        assert!(events.iter().any(|e| matches!(
            &e.kind,
            ChangeKind::Patched { ids, fields } if ids == &vec![user.model.uuid.clone()]
                && fields["city"] == json!("shanghai")
        )));
    }

    assert!(dao.notifier().unsubscribe(&subscription));
    dao.delete(&Filter::new().eq("name", "user1")).await.unwrap();
    settle(&dao).await;
    assert_eq!(recorder.events.lock().len(), 2);
}

#[tokio::test]
async fn test_shutdown_drains_pending_events() {
    let (dao, index) = indexed_sample_dao().await;
    for i in 0..10 {
        dao.create(&mut SampleModel::new(&format!("user{}", i), "male", "china"))
            .await
            .unwrap();
    }
    dao.shutdown().await;

    assert_eq!(index.document_count(dao.index_name()), 10);
    assert!(dao.notifier().is_closed());
}

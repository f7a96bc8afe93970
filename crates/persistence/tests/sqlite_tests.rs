//! SQLite file-store integration tests.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use common::SampleModel;
use tessera_persistence::entity::{Column, Entity, Model};
use tessera_persistence::registry::Registry;
use tessera_persistence::store::StoreConfig;
use tessera_persistence::types::{Filter, Patch, QueryOptions};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Reading {
    #[serde(flatten)]
    model: Model,
    sensor: String,
    count: i64,
    value: f64,
    healthy: bool,
    taken_at: Option<DateTime<Utc>>,
}

impl Entity for Reading {
    fn table_name() -> &'static str {
        "readings"
    }

    fn columns() -> Vec<Column> {
        vec![
            Column::text("sensor").not_null(),
            Column::integer("count"),
            Column::real("value"),
            Column::boolean("healthy"),
            Column::timestamp("taken_at"),
        ]
    }

    fn model(&self) -> &Model {
        &self.model
    }

    fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }
}

async fn file_registry(path: &std::path::Path) -> Registry {
    let registry = Registry::new();
    let config = StoreConfig::sqlite(&path.to_string_lossy()).with_automigrate(true);
    registry.add_store("db1", &config).await.unwrap();
    registry
}

#[tokio::test]
async fn test_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let uuid = {
        let registry = file_registry(&path).await;
        let dao = registry.accessor::<SampleModel>("db1").await.unwrap();
        let mut user = SampleModel::new("user1", "male", "china");
        dao.create(&mut user).await.unwrap();
        user.model.uuid
    };

    let registry = file_registry(&path).await;
    let dao = registry.accessor::<SampleModel>("db1").await.unwrap();
    let found = dao
        .query(&Filter::new().eq("name", "user1"), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].model.uuid, uuid);
}

#[tokio::test]
async fn test_column_types_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let registry = file_registry(&dir.path().join("types.db")).await;
    let dao = registry.accessor::<Reading>("db1").await.unwrap();

    let taken_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
    let mut reading = Reading {
        sensor: "t-1".to_string(),
        count: 42,
        value: 2.5,
        healthy: true,
        taken_at: Some(taken_at),
        ..Default::default()
    };
    dao.create(&mut reading).await.unwrap();

    let found = dao
        .query(&Filter::new().eq("sensor", "t-1"), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0], reading);

    dao.update(
        Filter::new().eq("healthy", true),
        &Patch::new().set("healthy", false).set("count", 43),
    )
    .await
    .unwrap();

    let found = dao
        .query(&Filter::new().eq("healthy", false), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].count, 43);
    assert_eq!(found[0].value, 2.5);
}

#[tokio::test]
async fn test_order_by_numeric_column() {
    let dir = tempfile::tempdir().unwrap();
    let registry = file_registry(&dir.path().join("order.db")).await;
    let dao = registry.accessor::<Reading>("db1").await.unwrap();

    for (sensor, count) in [("a", 10), ("b", 9), ("c", 100)] {
        let mut reading = Reading {
            sensor: sensor.to_string(),
            count,
            ..Default::default()
        };
        dao.create(&mut reading).await.unwrap();
    }

    let found = dao
        .query(&Filter::new(), &QueryOptions::new().order("count desc"))
        .await
        .unwrap();
    let counts: Vec<i64> = found.iter().map(|r| r.count).collect();
    assert_eq!(counts, vec![100, 10, 9]);
}

#[tokio::test]
async fn test_missing_values_sort_last_in_both_directions() {
    let dir = tempfile::tempdir().unwrap();
    let registry = file_registry(&dir.path().join("nulls.db")).await;
    let dao = registry.accessor::<Reading>("db1").await.unwrap();

    let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    for (sensor, taken_at) in [("late", Some(late)), ("none", None), ("early", Some(early))] {
        let mut reading = Reading {
            sensor: sensor.to_string(),
            taken_at,
            ..Default::default()
        };
        dao.create(&mut reading).await.unwrap();
    }

    let sensors = |items: Vec<Reading>| items.into_iter().map(|r| r.sensor).collect::<Vec<_>>();

    let asc = dao
        .query(&Filter::new(), &QueryOptions::new().order("taken_at asc"))
        .await
        .unwrap();
    assert_eq!(sensors(asc), vec!["early", "late", "none"]);

    let desc = dao
        .query(&Filter::new(), &QueryOptions::new().order("taken_at desc"))
        .await
        .unwrap();
    assert_eq!(sensors(desc), vec!["late", "early", "none"]);
}

mod support;

use serde_json::json;
use strata_engine::{BootKeyValue, Value};
use support::simulation_test::{text_rows, SimulationBootArgs};

simulation_test!(key_value_crud_through_the_entity_view, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    engine
        .execute(
            "INSERT INTO key_value (key, value) VALUES ('theme', '\"dark\"')",
            &[],
        )
        .await
        .unwrap();

    let after_insert = engine
        .execute(
            "SELECT key, value, strata_untracked FROM key_value WHERE key = 'theme'",
            &[],
        )
        .await
        .unwrap();
    sim.assert_deterministic(text_rows(&after_insert));
    assert_eq!(after_insert.rows.len(), 1);
    assert_eq!(after_insert.rows[0][1], Value::Text("dark".to_string()));
    assert_eq!(after_insert.rows[0][2], Value::Integer(0));

    engine
        .execute(
            "UPDATE key_value SET value = '\"light\"' WHERE key = 'theme'",
            &[],
        )
        .await
        .unwrap();
    let after_update = engine
        .execute("SELECT value FROM key_value WHERE key = 'theme'", &[])
        .await
        .unwrap();
    assert_eq!(after_update.rows, vec![vec![Value::Text("light".to_string())]]);

    engine
        .execute("DELETE FROM key_value WHERE key = 'theme'", &[])
        .await
        .unwrap();
    let after_delete = engine
        .execute("SELECT key FROM key_value WHERE key = 'theme'", &[])
        .await
        .unwrap();
    assert!(after_delete.rows.is_empty());
});

simulation_test!(structured_values_are_stored_as_json, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    engine
        .execute(
            "INSERT INTO key_value (key, value) VALUES (?1, ?2)",
            &[
                Value::from("flags"),
                Value::from(json!({"beta": true, "limit": 3}).to_string()),
            ],
        )
        .await
        .unwrap();

    let stored = engine
        .execute(
            "SELECT json_extract(value, '$.limit'), strata_snapshot_content \
             FROM key_value WHERE key = 'flags'",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(stored.rows[0][0], Value::Integer(3));
    let snapshot: serde_json::Value =
        serde_json::from_str(stored.rows[0][1].as_text().expect("snapshot text")).unwrap();
    assert_eq!(snapshot, json!({"key": "flags", "value": {"beta": true, "limit": 3}}));
});

simulation_test!(boot_key_values_land_in_global_by_default, |sim| async move {
    let engine = sim
        .boot_simulated_engine(Some(SimulationBootArgs {
            key_values: vec![
                BootKeyValue {
                    key: "owner".to_string(),
                    value: json!("ada"),
                    version_id: None,
                },
                BootKeyValue {
                    key: "draft".to_string(),
                    value: json!(true),
                    version_id: Some("main".to_string()),
                },
            ],
            ..SimulationBootArgs::default()
        }))
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    let rows = engine
        .execute(
            "SELECT key, strata_version_id FROM key_value_all ORDER BY key, strata_version_id",
            &[],
        )
        .await
        .unwrap();

    sim.assert_deterministic(text_rows(&rows));
    // `owner` lives in global and is inherited by main.
    assert_eq!(
        text_rows(&rows),
        vec![
            vec![Some("draft".to_string()), Some("main".to_string())],
            vec![Some("owner".to_string()), Some("global".to_string())],
            vec![Some("owner".to_string()), Some("main".to_string())],
        ]
    );

    let inherited = engine
        .execute(
            "SELECT strata_inherited_from_version_id FROM key_value WHERE key = 'owner'",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(inherited.rows, vec![vec![Value::Text("global".to_string())]]);
});

simulation_test!(global_values_are_shadowed_by_local_writes, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    engine
        .execute(
            "INSERT INTO key_value_all (key, value, strata_version_id) \
             VALUES ('mode', '\"shared\"', 'global')",
            &[],
        )
        .await
        .unwrap();

    let inherited = engine
        .execute("SELECT value FROM key_value WHERE key = 'mode'", &[])
        .await
        .unwrap();
    assert_eq!(inherited.rows, vec![vec![Value::Text("shared".to_string())]]);

    engine
        .execute(
            "UPDATE key_value SET value = '\"local\"' WHERE key = 'mode'",
            &[],
        )
        .await
        .unwrap();

    let values = engine
        .execute(
            "SELECT strata_version_id, value FROM key_value_all \
             WHERE key = 'mode' ORDER BY strata_version_id",
            &[],
        )
        .await
        .unwrap();
    sim.assert_deterministic(text_rows(&values));
    assert_eq!(
        text_rows(&values),
        vec![
            vec![Some("global".to_string()), Some("shared".to_string())],
            vec![Some("main".to_string()), Some("local".to_string())],
        ]
    );

    let local = engine
        .execute(
            "SELECT strata_inherited_from_version_id FROM key_value WHERE key = 'mode'",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(local.rows, vec![vec![Value::Null]]);
});

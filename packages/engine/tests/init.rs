mod support;

use strata_engine::{ErrorCode, Value};
use support::simulation_test::text_rows;

simulation_test!(init_seeds_global_and_main_versions, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    let versions = engine
        .execute(
            "SELECT id, name, inherits_from_version_id FROM version ORDER BY id",
            &[],
        )
        .await
        .unwrap();

    sim.assert_deterministic(text_rows(&versions));
    assert_eq!(
        text_rows(&versions),
        vec![
            vec![Some("global".to_string()), Some("global".to_string()), None],
            vec![
                Some("main".to_string()),
                Some("main".to_string()),
                Some("global".to_string())
            ],
        ]
    );
    assert_eq!(engine.engine().active_version_id().unwrap(), "main");
});

simulation_test!(active_version_pointer_is_untracked_and_global, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    let pointer = engine
        .execute(
            "SELECT version_id, strata_untracked, strata_version_id FROM active_version_all",
            &[],
        )
        .await
        .unwrap();

    assert_eq!(pointer.rows.len(), 1);
    assert_eq!(pointer.rows[0][0], Value::Text("main".to_string()));
    assert_eq!(pointer.rows[0][1], Value::Integer(1));
    assert_eq!(pointer.rows[0][2], Value::Text("global".to_string()));
});

simulation_test!(init_is_idempotent_on_the_same_backend, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();
    engine.init().await.unwrap();

    let versions = engine
        .execute("SELECT count(*) FROM version", &[])
        .await
        .unwrap();
    assert_eq!(versions.rows[0][0], Value::Integer(2));
});

simulation_test!(execute_before_init_is_rejected, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");

    let error = engine
        .execute("SELECT 1", &[])
        .await
        .expect_err("engine without init should reject queries");
    assert!(error.is(ErrorCode::Unknown), "unexpected error: {error}");
    assert!(error.description.contains("init()"));
});

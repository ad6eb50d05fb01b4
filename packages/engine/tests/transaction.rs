mod support;

use futures_util::FutureExt;
use strata_engine::{ErrorCode, ExecuteOptions, StrataError, Value};
use support::simulation_test::text_rows;

simulation_test!(transaction_writes_are_visible_inside_and_committed_at_the_end, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    let mut tx = engine
        .engine()
        .begin_transaction(ExecuteOptions::default())
        .await
        .unwrap();
    tx.execute(
        "INSERT INTO key_value (key, value) VALUES ('draft', '\"wip\"')",
        &[],
    )
    .await
    .unwrap();

    let inside = tx
        .execute(
            "SELECT value, strata_commit_id FROM key_value WHERE key = 'draft'",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(
        inside.rows,
        vec![vec![
            Value::Text("wip".to_string()),
            Value::Text("pending".to_string())
        ]]
    );

    let error = engine
        .engine()
        .execute("SELECT 1", &[], ExecuteOptions::default())
        .await
        .expect_err("execute is rejected while a transaction is open");
    assert!(error.is(ErrorCode::Transaction), "unexpected error: {error}");

    let report = tx.commit().await.unwrap();
    engine.mark_written();
    assert_eq!(report.commits.len(), 1);
    assert_eq!(report.commits[0].version_id, "main");
    assert_eq!(report.change_count(), 1);

    let after = engine
        .execute(
            "SELECT value, strata_commit_id FROM key_value WHERE key = 'draft'",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(after.rows[0][0], Value::Text("wip".to_string()));
    assert_eq!(
        after.rows[0][1],
        Value::Text(report.commits[0].commit_id.clone())
    );
});

simulation_test!(rolled_back_transactions_leave_no_trace, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    let mut tx = engine
        .engine()
        .begin_transaction(ExecuteOptions::default())
        .await
        .unwrap();
    tx.execute(
        "INSERT INTO key_value (key, value) VALUES ('temp', '1')",
        &[],
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    let rows = engine
        .execute("SELECT key FROM key_value WHERE key = 'temp'", &[])
        .await
        .unwrap();
    assert!(rows.rows.is_empty());
});

simulation_test!(a_failing_statement_keeps_the_transaction_usable, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    let mut tx = engine
        .engine()
        .begin_transaction(ExecuteOptions::default())
        .await
        .unwrap();
    tx.execute("INSERT INTO key_value (key, value) VALUES ('a', '1')", &[])
        .await
        .unwrap();
    let error = tx
        .execute(
            "INSERT INTO key_value (key, value) VALUES ('b', '2'); \
             INSERT INTO key_value (key, value) VALUES ('a', '3')",
            &[],
        )
        .await
        .expect_err("duplicate key");
    assert!(error.is(ErrorCode::Integrity), "unexpected error: {error}");
    tx.commit().await.unwrap();
    engine.mark_written();

    let rows = engine
        .execute("SELECT key, value FROM key_value ORDER BY key", &[])
        .await
        .unwrap();
    sim.assert_deterministic(text_rows(&rows));
    assert_eq!(
        rows.rows,
        vec![vec![Value::Text("a".to_string()), Value::Integer(1)]]
    );
});

simulation_test!(transaction_closures_commit_on_ok_and_roll_back_on_err, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    let written = engine
        .engine()
        .transaction(ExecuteOptions::default(), |tx| {
            Box::pin(async move {
                tx.execute(
                    "INSERT INTO key_value (key, value) VALUES ('kept', 'true')",
                    &[],
                )
                .await?;
                Ok::<_, StrataError>(1)
            })
        })
        .await
        .unwrap();
    assert_eq!(written, 1);

    let error = engine
        .engine()
        .transaction(ExecuteOptions::default(), |tx| {
            Box::pin(async move {
                tx.execute(
                    "INSERT INTO key_value (key, value) VALUES ('dropped', 'true')",
                    &[],
                )
                .await?;
                Err::<(), StrataError>(StrataError::new(
                    ErrorCode::Unknown.as_str(),
                    "Aborted",
                    "caller aborted",
                ))
            })
        })
        .await
        .expect_err("closure error propagates");
    assert_eq!(error.description, "caller aborted");
    engine.mark_written();

    let rows = engine
        .execute("SELECT key FROM key_value ORDER BY key", &[])
        .await
        .unwrap();
    assert_eq!(rows.rows, vec![vec![Value::Text("kept".to_string())]]);
});

simulation_test!(panicking_transaction_closures_roll_back, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    let outcome = std::panic::AssertUnwindSafe(engine.engine().transaction(
        ExecuteOptions::default(),
        |tx| {
            Box::pin(async move {
                tx.execute(
                    "INSERT INTO key_value (key, value) VALUES ('doomed', 'true')",
                    &[],
                )
                .await?;
                if tx.execute("SELECT 1", &[]).await.is_ok() {
                    panic!("closure panicked mid-transaction");
                }
                Ok::<_, StrataError>(())
            })
        },
    ))
    .catch_unwind()
    .await;
    assert!(outcome.is_err(), "the panic resumes after rollback");
    engine.mark_written();

    let rows = engine
        .execute("SELECT key FROM key_value WHERE key = 'doomed'", &[])
        .await
        .unwrap();
    assert!(rows.rows.is_empty());

    let tx = engine
        .engine()
        .begin_transaction(ExecuteOptions::default())
        .await
        .unwrap();
    tx.rollback().await.unwrap();
});

simulation_test!(only_one_transaction_can_be_open, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    let tx = engine
        .engine()
        .begin_transaction(ExecuteOptions::default())
        .await
        .unwrap();
    let error = engine
        .engine()
        .begin_transaction(ExecuteOptions::default())
        .await
        .err()
        .expect("second transaction is rejected");
    assert!(error.is(ErrorCode::Transaction));
    tx.rollback().await.unwrap();

    let tx = engine
        .engine()
        .begin_transaction(ExecuteOptions::default())
        .await
        .unwrap();
    tx.commit().await.unwrap();
});

simulation_test!(writer_keys_are_recorded_per_entity, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    engine
        .execute_with_options(
            "INSERT INTO key_value (key, value) VALUES ('owned', '1')",
            &[],
            ExecuteOptions {
                writer_key: Some("editor-1".to_string()),
            },
        )
        .await
        .unwrap();

    let rows = engine
        .execute(
            "SELECT strata_writer_key FROM key_value WHERE key = 'owned'",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(rows.rows, vec![vec![Value::Text("editor-1".to_string())]]);
});

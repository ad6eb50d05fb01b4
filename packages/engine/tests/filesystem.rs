mod support;

use strata_engine::{ErrorCode, Value};
use support::simulation_test::{text_rows, SimulationEngine};

async fn mkdir(engine: &SimulationEngine, id: &str, parent: Option<&str>, name: &str) {
    engine
        .execute(
            "INSERT INTO directory (id, parent_id, name) VALUES (?1, ?2, ?3)",
            &[
                Value::from(id),
                Value::from(parent.map(str::to_string)),
                Value::from(name),
            ],
        )
        .await
        .unwrap();
}

simulation_test!(directories_and_files_form_a_tree, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    mkdir(&engine, "docs", None, "docs").await;
    mkdir(&engine, "guides", Some("docs"), "guides").await;
    engine
        .execute(
            "INSERT INTO file (id, directory_id, name) VALUES ('readme', 'guides', 'readme.md')",
            &[],
        )
        .await
        .unwrap();

    let directories = engine
        .execute(
            "SELECT id, parent_id, name, hidden FROM directory ORDER BY id",
            &[],
        )
        .await
        .unwrap();
    sim.assert_deterministic(text_rows(&directories));
    assert_eq!(
        text_rows(&directories),
        vec![
            vec![
                Some("docs".to_string()),
                None,
                Some("docs".to_string()),
                Some("0".to_string())
            ],
            vec![
                Some("guides".to_string()),
                Some("docs".to_string()),
                Some("guides".to_string()),
                Some("0".to_string())
            ],
        ]
    );

    let files = engine
        .execute(
            "SELECT f.name, d.name FROM file f JOIN directory d ON d.id = f.directory_id",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(
        files.rows,
        vec![vec![
            Value::Text("readme.md".to_string()),
            Value::Text("guides".to_string())
        ]]
    );
});

simulation_test!(names_collide_across_files_and_directories, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();
    mkdir(&engine, "src", None, "src").await;

    let error = engine
        .execute(
            "INSERT INTO file (id, name) VALUES ('clash', 'src')",
            &[],
        )
        .await
        .expect_err("file name collides with directory");
    assert!(error.is(ErrorCode::Integrity), "unexpected error: {error}");

    engine
        .execute(
            "INSERT INTO file (id, directory_id, name) VALUES ('main-rs', 'src', 'main.rs')",
            &[],
        )
        .await
        .unwrap();
    let error = engine
        .execute(
            "INSERT INTO file (id, directory_id, name) VALUES ('other', 'src', 'main.rs')",
            &[],
        )
        .await
        .expect_err("duplicate file path");
    assert!(error.is(ErrorCode::Integrity), "unexpected error: {error}");
});

simulation_test!(names_are_nfc_normalized_and_validated, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    // "e" followed by a combining acute accent.
    engine
        .execute(
            "INSERT INTO file (id, name) VALUES ('cafe', ?1)",
            &[Value::from("cafe\u{301}.txt")],
        )
        .await
        .unwrap();
    let stored = engine
        .execute("SELECT name FROM file WHERE id = 'cafe'", &[])
        .await
        .unwrap();
    assert_eq!(stored.rows, vec![vec![Value::Text("caf\u{e9}.txt".to_string())]]);

    let error = engine
        .execute(
            "INSERT INTO file (id, name) VALUES ('nested', 'a/b.txt')",
            &[],
        )
        .await
        .expect_err("slashes are not allowed in names");
    assert!(error.is(ErrorCode::Validation), "unexpected error: {error}");
});

simulation_test!(directory_cycles_and_missing_parents_are_rejected, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();
    mkdir(&engine, "a", None, "a").await;
    mkdir(&engine, "b", Some("a"), "b").await;

    let error = engine
        .execute("UPDATE directory SET parent_id = 'b' WHERE id = 'a'", &[])
        .await
        .expect_err("a cannot move below its own child");
    assert!(error.is(ErrorCode::Integrity), "unexpected error: {error}");

    let error = engine
        .execute(
            "INSERT INTO directory (id, parent_id, name) VALUES ('c', 'ghost', 'c')",
            &[],
        )
        .await
        .expect_err("parent must exist");
    assert!(error.is(ErrorCode::Integrity), "unexpected error: {error}");
});

simulation_test!(deleting_a_directory_cascades_to_its_contents, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();
    mkdir(&engine, "root", None, "root").await;
    mkdir(&engine, "leaf", Some("root"), "leaf").await;
    mkdir(&engine, "keep", None, "keep").await;
    engine
        .execute(
            "INSERT INTO file (id, directory_id, name, data) VALUES ('deep', 'leaf', 'deep.bin', ?1); \
             INSERT INTO file (id, directory_id, name) VALUES ('kept', 'keep', 'kept.txt')",
            &[Value::Blob(vec![1, 2, 3])],
        )
        .await
        .unwrap();

    engine
        .execute("DELETE FROM directory WHERE id = 'root'", &[])
        .await
        .unwrap();

    let directories = engine
        .execute("SELECT id FROM directory ORDER BY id", &[])
        .await
        .unwrap();
    assert_eq!(text_rows(&directories), vec![vec![Some("keep".to_string())]]);
    let files = engine
        .execute("SELECT id FROM file ORDER BY id", &[])
        .await
        .unwrap();
    assert_eq!(text_rows(&files), vec![vec![Some("kept".to_string())]]);
    let blobs = engine
        .execute(
            "SELECT count(*) FROM file_blob_all WHERE strata_file_id = 'deep'",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(blobs.rows, vec![vec![Value::Integer(0)]]);
});

simulation_test!(file_data_is_stored_as_a_hashed_blob, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();

    engine
        .execute(
            "INSERT INTO file (id, name, data) VALUES ('notes', 'notes.txt', ?1)",
            &[Value::Blob(b"hello world".to_vec())],
        )
        .await
        .unwrap();

    assert_eq!(
        engine.read_file_data("notes").await.unwrap(),
        Some(b"hello world".to_vec())
    );

    let blob = engine
        .execute(
            "SELECT byte_length, blake3, strata_plugin_key FROM file_blob WHERE strata_file_id = 'notes'",
            &[],
        )
        .await
        .unwrap();
    sim.assert_deterministic(text_rows(&blob));
    assert_eq!(blob.rows[0][0], Value::Integer(11));
    assert_eq!(
        blob.rows[0][1],
        Value::Text(blake3::hash(b"hello world").to_hex().to_string())
    );
    assert_eq!(blob.rows[0][2], Value::Text("strata_blob".to_string()));

    engine
        .execute(
            "UPDATE file SET data = ?1 WHERE id = 'notes'",
            &[Value::Blob(b"bye".to_vec())],
        )
        .await
        .unwrap();
    assert_eq!(
        engine.read_file_data("notes").await.unwrap(),
        Some(b"bye".to_vec())
    );
});

simulation_test!(files_without_content_read_as_none, |sim| async move {
    let engine = sim
        .boot_simulated_engine(None)
        .await
        .expect("boot_simulated_engine should succeed");
    engine.init().await.unwrap();
    engine
        .execute("INSERT INTO file (id, name) VALUES ('empty', 'empty.txt')", &[])
        .await
        .unwrap();

    assert_eq!(engine.read_file_data("empty").await.unwrap(), None);
});

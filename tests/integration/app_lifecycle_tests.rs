/*!
 * Integration tests for the application controller: input file to output file.
 */

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use parabatch::app_config::Config;
use parabatch::app_controller::{Controller, read_document, write_document};
use parabatch::database::{DocumentStore, MemoryStore};
use parabatch::session::ProgressStatus;

use crate::common::{self, ScriptedTranslator};

const INPUT: &str = r#"{
    "sections": [
        { "paragraphs": ["The first page opens here.", "", "It closes here."] },
        { "paragraphs": [] },
        { "paragraphs": ["A final page."] }
    ]
}"#;

#[tokio::test]
async fn test_translateFile_withDryRun_shouldWriteDefaultOutputNextToInput() {
    common::init_logging();
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "chapter.json", INPUT).unwrap();
    let config = Config {
        database_path: Some(dir.path().join("parabatch.db")),
        ..Config::default()
    };
    let controller = Controller::with_config(config, true).unwrap();

    let (id, outcome) = controller
        .translate_file(&input, None, None, &CancellationToken::new())
        .await
        .unwrap();

    let output = dir.path().join("chapter.fr.json");
    assert!(output.exists());
    let written = read_document(&output).unwrap();
    assert_eq!(written, outcome.document);
    assert_eq!(
        written.sections[0].paragraphs,
        vec!["[fr] The first page opens here.", "", "[fr] It closes here."]
    );
    assert!(written.sections[1].paragraphs.is_empty());
    assert_eq!(written.sections[2].paragraphs, vec!["[fr] A final page."]);
    // Generated ids are UUIDs
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    let info = controller.status(&id).await.unwrap().unwrap();
    assert_eq!(info.status, ProgressStatus::Completed);
}

#[tokio::test]
async fn test_retry_afterFailedTranslateFile_shouldWriteRequestedOutput() {
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "book.json", INPUT).unwrap();
    let output = dir.path().join("out").with_extension("json");
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let mut config = Config::default();
    // One paragraph per batch
    config.translation.active_provider_config_mut().max_context_tokens = 1005;
    let controller = Controller::with_services(
        config,
        store,
        Arc::new(ScriptedTranslator::failing_on(2)),
    );
    let cancel = CancellationToken::new();

    let error = controller
        .translate_file(&input, Some(output.clone()), Some("book-1".to_string()), &cancel)
        .await
        .unwrap_err();

    let message = format!("{:#}", error);
    assert!(message.contains("1/3 batches are saved"));
    assert!(message.contains("parabatch retry book-1"));
    assert!(!output.exists());

    let outcome = controller
        .retry("book-1", Some(output.clone()), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.total_batches, 3);
    assert_eq!(read_document(&output).unwrap(), outcome.document);
}

#[tokio::test]
async fn test_discard_shouldForgetTranslation() {
    let dir = common::create_temp_dir().unwrap();
    let input = common::create_test_file(dir.path(), "notes.json", INPUT).unwrap();
    let controller = Controller::with_services(
        Config::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedTranslator::default()),
    );
    controller
        .translate_file(&input, None, Some("notes".to_string()), &CancellationToken::new())
        .await
        .unwrap();

    controller.discard("notes").await.unwrap();

    assert!(controller.status("notes").await.unwrap().is_none());
    assert!(controller.retry("notes", None, &CancellationToken::new()).await.is_err());
}

#[test]
fn test_readDocument_withMalformedJson_shouldNameTheFile() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "bad.json", "{\"sections\": [").unwrap();

    let error = read_document(&path).unwrap_err();

    assert!(format!("{:#}", error).contains("bad.json"));
}

#[test]
fn test_writeDocument_thenRead_shouldPreserveDocument() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("sample.json");
    let document = common::sectioned_document(&[1, 0, 2]);

    write_document(&path, &document).unwrap();

    assert_eq!(read_document(&path).unwrap(), document);
}

/*!
 * Integration tests for durable progress: store failures and the SQLite back end.
 */

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use parabatch::database::{DatabaseConnection, DocumentStore, MemoryStore, SqliteStore, keys};
use parabatch::errors::{StoreError, TranslationError};
use parabatch::session::{PersistPolicy, ProgressStatus};

use crate::common::{self, Scripted, ScriptedTranslator};

#[tokio::test]
async fn test_translate_withProgressWritesFailing_shouldSurfacePersistenceAfterRetries() {
    let store = Arc::new(MemoryStore::new());
    store.fail_writes_with_prefix("progress:");
    let translator = Arc::new(ScriptedTranslator::default());
    let orchestrator = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch().with_persist_policy(PersistPolicy {
            retry_count: 2,
            initial_backoff: Duration::from_millis(1),
        }),
    );

    let result = orchestrator
        .translate("disk", &common::sample_document(3), &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(TranslationError::Persistence {
            completed_batches: 0,
            total_batches: 3,
            source: StoreError::Backend(_),
        })
    ));
    // One source write, then the first attempt and two retries of the record
    assert_eq!(store.put_calls(), 4);
    assert_eq!(translator.call_count(), 0);
}

#[tokio::test]
async fn test_translate_withWriteFailingAfterBatch_shouldNotAdvanceAndRetranslateOnRetry() {
    let store = Arc::new(MemoryStore::new());
    let failing = store.clone();
    let translator = Arc::new(ScriptedTranslator::new([
        Scripted::Echo,
        Scripted::Hook(Box::new(move || failing.fail_writes_with_prefix("progress:"))),
    ]));
    let orchestrator = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch(),
    );
    let cancel = CancellationToken::new();

    let error = orchestrator
        .translate("flaky-disk", &common::sample_document(3), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        TranslationError::Persistence { completed_batches: 1, total_batches: 3, .. }
    ));
    assert!(!error.is_resumable());

    store.clear_write_failures();
    let info = orchestrator.status("flaky-disk").await.unwrap().unwrap();
    assert_eq!(info.completed_batches, 1);
    assert_eq!(info.translated_paragraphs, 1);

    let outcome = orchestrator.retry("flaky-disk", &cancel).await.unwrap();

    // The batch whose write failed is paid for again
    assert_eq!(translator.call_count(), 4);
    assert_eq!(translator.calls()[2], common::paragraph_text(1));
    assert_eq!(outcome.document.sections[0].paragraphs.len(), 3);
}

#[tokio::test]
async fn test_translate_withLiveSnapshotWritesFailing_shouldStillComplete() {
    let store = Arc::new(MemoryStore::new());
    store.fail_writes_with_prefix("live:");
    let orchestrator = common::orchestrator_with(
        store.clone(),
        Arc::new(ScriptedTranslator::default()),
        common::one_paragraph_per_batch(),
    );

    let outcome = orchestrator
        .translate("advisory", &common::sample_document(2), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.total_batches, 2);
    assert!(!store.contains(&keys::live("advisory")));
}

#[tokio::test]
async fn test_sqliteStore_onDisk_shouldResumeAcrossReopenedStores() {
    common::init_logging();
    let dir = common::create_temp_dir().unwrap();
    let db_path = dir.path().join("progress").join("parabatch.db");
    let document = common::sample_document(3);

    {
        let store: Arc<dyn DocumentStore> =
            Arc::new(SqliteStore::new(DatabaseConnection::new(&db_path).unwrap()));
        let orchestrator = common::orchestrator_with(
            store,
            Arc::new(ScriptedTranslator::failing_on(2)),
            common::one_paragraph_per_batch(),
        );
        let result = orchestrator
            .translate("persisted", &document, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TranslationError::Provider { completed_batches: 1, .. })));
    }

    let store: Arc<dyn DocumentStore> =
        Arc::new(SqliteStore::new(DatabaseConnection::new(&db_path).unwrap()));
    let translator = Arc::new(ScriptedTranslator::default());
    let orchestrator =
        common::orchestrator_with(store.clone(), translator.clone(), common::one_paragraph_per_batch());

    let info = orchestrator.status("persisted").await.unwrap().unwrap();
    assert_eq!(info.status, ProgressStatus::Failed);
    assert_eq!(info.completed_batches, 1);

    let outcome = orchestrator
        .retry("persisted", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(translator.call_count(), 2);
    for (i, translated) in outcome.document.sections[0].paragraphs.iter().enumerate() {
        assert_eq!(translated, &common::echoed(&common::paragraph_text(i)));
    }
    assert!(store.get(&keys::result("persisted")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_discard_onSqliteStore_shouldRemoveEveryKey() {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new_in_memory().unwrap());
    let orchestrator = common::orchestrator_with(
        store.clone(),
        Arc::new(ScriptedTranslator::default()),
        common::one_paragraph_per_batch(),
    );
    orchestrator
        .translate("gone", &common::sample_document(2), &CancellationToken::new())
        .await
        .unwrap();

    orchestrator.discard("gone").await.unwrap();

    for key in [
        keys::source("gone"),
        keys::progress("gone"),
        keys::result("gone"),
        keys::live("gone"),
    ] {
        assert!(store.get(&key).await.unwrap().is_none(), "{} should be gone", key);
    }
    assert!(matches!(
        orchestrator.retry("gone", &CancellationToken::new()).await,
        Err(TranslationError::NotFound(_))
    ));
}

/*!
 * Integration tests for failure, retry and resume.
 */

use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use parabatch::database::{MemoryStore, get_json, keys};
use parabatch::errors::{ProviderError, TranslationError};
use parabatch::providers::{MockBehavior, MockTranslator};
use parabatch::session::{ProgressStatus, TranslationProgressRecord};
use parabatch::translation::{Document, Section};

use crate::common::{self, ScriptedTranslator};

async fn load_record(store: &MemoryStore, id: &str) -> TranslationProgressRecord {
    get_json(store, &keys::progress(id))
        .await
        .unwrap()
        .expect("progress record should exist")
}

#[tokio::test]
async fn test_retry_afterFailureOnThirdOfFiveBatches_shouldResumeAtThirdBatch() {
    common::init_logging();
    let store = Arc::new(MemoryStore::new());
    let translator = Arc::new(MockTranslator::new(MockBehavior::FailOn { calls: vec![3] }));
    let orchestrator = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch(),
    );
    let document = common::sample_document(5);
    let cancel = CancellationToken::new();

    let error = orchestrator
        .translate("book", &document, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        TranslationError::Provider {
            batch_index: 2,
            completed_batches: 2,
            total_batches: 5,
            source: ProviderError::ApiError { status_code: 503, .. },
        }
    ));
    let record = load_record(&store, "book").await;
    assert_eq!(record.completed_batch_count, 2);
    assert_eq!(record.status, ProgressStatus::Failed);
    assert!(record.last_error.is_some());

    let outcome = orchestrator.retry("book", &cancel).await.unwrap();

    // Batches 3 to 5 only, the failed one included
    assert_eq!(translator.call_count(), 6);
    let requests = translator.requests();
    assert_eq!(
        requests[3..],
        [
            common::paragraph_text(2),
            common::paragraph_text(3),
            common::paragraph_text(4),
        ]
    );
    assert!(!outcome.from_cache);
    assert_eq!(outcome.total_batches, 5);
    for (i, translated) in outcome.document.sections[0].paragraphs.iter().enumerate() {
        assert_eq!(translated, &common::echoed(&common::paragraph_text(i)));
    }
    let record = load_record(&store, "book").await;
    assert_eq!(record.status, ProgressStatus::Completed);
    assert!(record.last_error.is_none());
}

#[tokio::test]
async fn test_rerun_afterCompletion_shouldReturnCachedResultWithNoCalls() {
    let translator = Arc::new(MockTranslator::echo());
    let orchestrator = common::orchestrator_with(
        Arc::new(MemoryStore::new()),
        translator.clone(),
        common::one_paragraph_per_batch(),
    );
    let document = common::sample_document(3);
    let cancel = CancellationToken::new();

    let first = orchestrator.translate("done", &document, &cancel).await.unwrap();
    let calls = translator.call_count();
    let by_translate = orchestrator.translate("done", &document, &cancel).await.unwrap();
    let by_retry = orchestrator.retry("done", &cancel).await.unwrap();

    assert_eq!(translator.call_count(), calls);
    assert!(by_translate.from_cache && by_retry.from_cache);
    assert_eq!(by_translate.document, first.document);
    assert_eq!(by_retry.document, first.document);
    assert_eq!(by_retry.tokens_consumed, first.tokens_consumed);
}

#[tokio::test]
async fn test_repeatedFailures_shouldNeverRewindProgressOrLoseParagraphs() {
    let store = Arc::new(MemoryStore::new());
    let translator = Arc::new(MockTranslator::new(MockBehavior::FailOn { calls: vec![2, 4, 5] }));
    let orchestrator = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch(),
    );
    let cancel = CancellationToken::new();

    let mut result = orchestrator
        .translate("flaky", &common::sample_document(4), &cancel)
        .await;
    let mut last_count = 0;
    let mut last_keys: HashSet<String> = HashSet::new();
    let mut attempts = 1;

    loop {
        let record = load_record(&store, "flaky").await;
        assert!(record.completed_batch_count >= last_count);
        let keys: HashSet<String> = record.translated_paragraphs.keys().cloned().collect();
        assert!(keys.is_superset(&last_keys));
        assert_eq!(keys.len(), record.completed_batch_count);
        last_count = record.completed_batch_count;
        last_keys = keys;

        if result.is_ok() {
            break;
        }
        assert!(result.as_ref().is_err_and(|e| e.is_resumable()));
        attempts += 1;
        result = orchestrator.retry("flaky", &cancel).await;
    }

    assert_eq!(attempts, 4);
    assert_eq!(last_count, 4);
    assert_eq!(translator.call_count(), 7);
}

#[tokio::test]
async fn test_translate_withChangedSource_shouldRestartFromFirstBatch() {
    let store = Arc::new(MemoryStore::new());
    let translator = Arc::new(ScriptedTranslator::failing_on(2));
    let orchestrator = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch(),
    );
    let cancel = CancellationToken::new();
    let original = common::sample_document(3);
    let revised = Document::new(vec![Section::new([
        "Revised paragraph 00 of the test text.",
        "Revised paragraph 01 of the test text.",
        "Revised paragraph 02 of the test text.",
    ])]);

    assert!(orchestrator.translate("draft", &original, &cancel).await.is_err());
    assert_eq!(load_record(&store, "draft").await.completed_batch_count, 1);

    let outcome = orchestrator.translate("draft", &revised, &cancel).await.unwrap();

    assert_eq!(translator.call_count(), 5);
    assert_eq!(translator.calls()[2], "Revised paragraph 00 of the test text.");
    assert_eq!(
        outcome.document.sections[0].paragraphs[0],
        common::echoed("Revised paragraph 00 of the test text.")
    );
    assert_eq!(load_record(&store, "draft").await.source_hash, revised.content_hash());
}

#[tokio::test]
async fn test_translate_withChangedSourceAndStaleResume_shouldKeepFinishedBatches() {
    let store = Arc::new(MemoryStore::new());
    let translator = Arc::new(ScriptedTranslator::failing_on(2));
    let orchestrator = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch().with_stale_resume(true),
    );
    let cancel = CancellationToken::new();
    let original = common::sample_document(3);
    let mut edited = original.clone();
    edited.sections[0].paragraphs[2] = "Paragraph number 02 of the edited text".to_string();

    assert!(orchestrator.translate("stale", &original, &cancel).await.is_err());
    let outcome = orchestrator.translate("stale", &edited, &cancel).await.unwrap();

    // Batch 1 kept, batches 2 and 3 translated against the edited source
    assert_eq!(translator.call_count(), 4);
    assert_eq!(
        outcome.document.sections[0].paragraphs[2],
        common::echoed("Paragraph number 02 of the edited text")
    );
}

#[tokio::test]
async fn test_retry_withWiderPlan_shouldSkipBatchesAlreadyTranslated() {
    let store = Arc::new(MemoryStore::new());
    let translator = Arc::new(ScriptedTranslator::failing_on(3));
    let cancel = CancellationToken::new();
    let document = common::sample_document(4);

    let narrow = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch(),
    );
    assert!(narrow.translate("plan", &document, &cancel).await.is_err());
    let before = load_record(&store, "plan").await;
    assert_eq!(before.completed_batch_count, 2);

    // Two paragraphs per batch: the first new batch is already translated
    let wide = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch().with_context_window(1024, 1000),
    );
    let outcome = wide.retry("plan", &cancel).await.unwrap();

    assert_eq!(outcome.total_batches, 2);
    assert_eq!(translator.call_count(), 4);
    let resent = &translator.calls()[3];
    assert!(resent.contains(&common::paragraph_text(2)));
    assert!(resent.contains(&common::paragraph_text(3)));
    assert!(!resent.contains(&common::paragraph_text(0)));
    assert!(!resent.contains(&common::paragraph_text(1)));
    for (i, translated) in outcome.document.sections[0].paragraphs.iter().enumerate() {
        assert_eq!(translated, &common::echoed(&common::paragraph_text(i)));
    }
    let record = load_record(&store, "plan").await;
    assert_eq!(record.total_batch_count, 2);
    assert!(record.total_tokens_consumed > before.total_tokens_consumed);
}

#[tokio::test]
async fn test_retry_withWiderPlan_shouldRetranslatePartlyCoveredBatch() {
    let store = Arc::new(MemoryStore::new());
    let translator = Arc::new(ScriptedTranslator::failing_on(2));
    let cancel = CancellationToken::new();
    let document = common::sample_document(4);

    let narrow = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch(),
    );
    assert!(narrow.translate("plan", &document, &cancel).await.is_err());

    // Only paragraph 0 is saved, so the first two-paragraph batch is still due
    let wide = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        common::one_paragraph_per_batch().with_context_window(1025, 1000),
    );
    let outcome = wide.retry("plan", &cancel).await.unwrap();

    assert_eq!(outcome.total_batches, 2);
    assert_eq!(translator.call_count(), 4);
    assert_eq!(load_record(&store, "plan").await.total_batch_count, 2);
}

#[tokio::test]
async fn test_status_afterFailure_shouldReportPartialProgress() {
    let orchestrator = common::orchestrator_with(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedTranslator::failing_on(3)),
        common::one_paragraph_per_batch(),
    );

    let _ = orchestrator
        .translate("partial", &common::sample_document(4), &CancellationToken::new())
        .await;

    let info = orchestrator.status("partial").await.unwrap().unwrap();
    assert_eq!(info.status, ProgressStatus::Failed);
    assert_eq!(info.completed_batches, 2);
    assert_eq!(info.total_batches, 4);
    assert_eq!(info.translated_paragraphs, 2);
    assert_eq!(info.percentage, 50.0);
    assert!(info.last_error.unwrap_or_default().contains("503"));
    assert!(orchestrator.status("unknown").await.unwrap().is_none());
}

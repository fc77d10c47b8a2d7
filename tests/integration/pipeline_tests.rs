/*!
 * Integration tests for the batch translation loop.
 *
 * Covers paragraph ordering across sections, degraded alignment, progress
 * events and the stored result, all against the in-memory store.
 */

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parabatch::database::{MemoryStore, get_json, keys};
use parabatch::providers::{MockBehavior, MockTranslator};
use parabatch::session::ProgressStatus;
use parabatch::translation::{Document, OrchestratorOptions, ProgressEventKind, Section};

use crate::common::{self, Scripted, ScriptedTranslator};

#[tokio::test]
async fn test_translate_withEmptyMiddleSection_shouldKeepDocumentShape() {
    common::init_logging();
    let translator = Arc::new(MockTranslator::echo());
    let orchestrator = common::orchestrator_with(
        Arc::new(MemoryStore::new()),
        translator.clone(),
        common::one_paragraph_per_batch(),
    );
    let document = common::sectioned_document(&[2, 0, 3]);

    let outcome = orchestrator
        .translate("sections", &document, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.total_batches, 5);
    assert_eq!(translator.call_count(), 5);
    assert_eq!(outcome.document.sections.len(), 3);
    assert!(outcome.document.sections[1].paragraphs.is_empty());
    for (section, translated) in document.sections.iter().zip(&outcome.document.sections) {
        let expected: Vec<String> = section.paragraphs.iter().map(|p| common::echoed(p)).collect();
        assert_eq!(translated.paragraphs, expected);
    }
}

#[tokio::test]
async fn test_translate_withMultiParagraphBatches_shouldSendMarkersAndAlignPerfectly() {
    let translator = Arc::new(MockTranslator::echo());
    let orchestrator = common::orchestrator_with(
        Arc::new(MemoryStore::new()),
        translator.clone(),
        OrchestratorOptions::default().with_context_window(1025, 1000),
    );
    let document = common::sample_document(5);

    let outcome = orchestrator
        .translate("pairs", &document, &CancellationToken::new())
        .await
        .unwrap();

    // Pairs, then the odd one out
    assert_eq!(outcome.total_batches, 3);
    let requests = translator.requests();
    assert!(requests[0].contains("<<PARA_0>>") && requests[0].contains("<<PARA_1>>"));
    assert!(!requests[2].contains("<<PARA_"));
    assert_eq!(outcome.degraded_batches, 0);
    for (source, translated) in document.sections[0]
        .paragraphs
        .iter()
        .zip(&outcome.document.sections[0].paragraphs)
    {
        assert_eq!(translated, &common::echoed(source));
    }
}

#[tokio::test]
async fn test_translate_withOneMarkerLostInFour_shouldResolveModeratelyAndCountDegraded() {
    let source = [
        "The cat sleeps.",
        "A dog barks loudly at night.",
        "Birds sing in the morning.",
        "Fish swim.",
    ];
    let reply = "Le chat dort.\n<<PARA_0>>\nUn chien aboie fort la nuit.\n<<PARA_1>>\nLes poissons nagent.\n<<PARA_3>>\nLes oiseaux chantent le matin.";
    let translator = Arc::new(MockTranslator::new(MockBehavior::Fixed(reply.to_string())));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = common::orchestrator_with(
        store.clone(),
        translator.clone(),
        OrchestratorOptions::default(),
    );

    let outcome = orchestrator
        .translate("moderate", &Document::new(vec![Section::new(source)]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(translator.call_count(), 1);
    assert_eq!(outcome.degraded_batches, 1);
    assert_eq!(
        outcome.document.sections[0].paragraphs,
        vec![
            "Le chat dort.",
            "Un chien aboie fort la nuit.",
            "Les oiseaux chantent le matin.",
            "Les poissons nagent.",
        ]
    );
    let info = orchestrator.status("moderate").await.unwrap().unwrap();
    assert_eq!(info.degraded_batches, 1);
}

#[tokio::test]
async fn test_translate_withNoMarkersInReply_shouldStillReturnEveryParagraph() {
    let translator = Arc::new(MockTranslator::new(MockBehavior::NoMarkers));
    let orchestrator = common::orchestrator_with(
        Arc::new(MemoryStore::new()),
        translator,
        OrchestratorOptions::default(),
    );
    let document = common::sample_document(6);

    let outcome = orchestrator
        .translate("lost", &document, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.total_batches, 1);
    assert_eq!(outcome.degraded_batches, 1);
    assert_eq!(outcome.document.sections[0].paragraphs.len(), 6);
    assert!(
        outcome.document.sections[0]
            .paragraphs
            .iter()
            .all(|p| !p.is_empty() && !p.contains("<<PARA_"))
    );
}

#[tokio::test]
async fn test_translate_shouldStoreResultAndCompletedRecord() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = common::orchestrator_with(
        store.clone(),
        Arc::new(ScriptedTranslator::default()),
        common::one_paragraph_per_batch(),
    );
    let document = common::sample_document(3);

    let outcome = orchestrator
        .translate("stored", &document, &CancellationToken::new())
        .await
        .unwrap();

    let stored: Option<Document> = get_json(store.as_ref(), &keys::result("stored")).await.unwrap();
    assert_eq!(stored, Some(outcome.document));
    let source: Option<Document> = get_json(store.as_ref(), &keys::source("stored")).await.unwrap();
    assert_eq!(source, Some(document));
    assert!(!store.contains(&keys::live("stored")));

    let info = orchestrator.status("stored").await.unwrap().unwrap();
    assert_eq!(info.status, ProgressStatus::Completed);
    assert_eq!(info.completed_batches, 3);
    assert_eq!(info.translated_paragraphs, 3);
    assert_eq!(info.percentage, 100.0);
    assert!(info.total_tokens_consumed > 0);
}

#[tokio::test]
async fn test_translate_shouldSendOneEventPerBatchWithGrowingTokens() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = common::orchestrator_with(
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedTranslator::default()),
        common::one_paragraph_per_batch(),
    )
    .with_sink(tx);

    orchestrator
        .translate("events", &common::sample_document(4), &CancellationToken::new())
        .await
        .unwrap();
    drop(orchestrator);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(events.len(), 5);
    assert!(events[..4].iter().all(|e| e.kind == ProgressEventKind::Batch));
    assert_eq!(events[4].kind, ProgressEventKind::Completed);
    assert!(events.windows(2).all(|w| w[0].total_tokens <= w[1].total_tokens));
    assert!(events.iter().all(|e| e.translation_id == "events" && e.total_batches == 4));
}

#[tokio::test]
async fn test_translate_withScriptedReply_shouldUseReplyForSingleParagraph() {
    let translator = Arc::new(ScriptedTranslator::new([
        Scripted::Reply("  Premier paragraphe.  ".to_string()),
        Scripted::Echo,
    ]));
    let orchestrator = common::orchestrator_with(
        Arc::new(MemoryStore::new()),
        translator.clone(),
        common::one_paragraph_per_batch(),
    );

    let outcome = orchestrator
        .translate("reply", &common::sample_document(2), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.document.sections[0].paragraphs[0], "Premier paragraphe.");
    assert_eq!(
        outcome.document.sections[0].paragraphs[1],
        common::echoed(&common::paragraph_text(1))
    );
    assert_eq!(translator.calls()[1], common::paragraph_text(1));
}

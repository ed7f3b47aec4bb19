#![allow(missing_docs)]
use assert_matches::assert_matches;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokenbridge_broker::{AttachmentDescriptor, DecryptOutcome};
use tokenbridge_core::{AgentFailure, OutboundFrame, CHUNK_SIZE_BYTES};
use tokenbridge_testkit::*;

const SOURCE_URL: &str = "https://files.example/attachments/";

fn attachment(file_id: &str, file_name: &str, size: usize, encrypted: bool) -> AttachmentDescriptor {
    AttachmentDescriptor {
        file_id: file_id.to_string(),
        file_name: file_name.to_string(),
        size_bytes: Some(size as u64),
        encrypted,
    }
}

#[tokio::test(start_paused = true)]
async fn download_is_requested_with_token_url_and_document_context() {
    let fixture = TestBridge::new();
    let plaintext = sample_bytes(5_000);
    let agent = fixture.agent(
        AgentRole::DecryptDownload,
        DecryptScript::default()
            .with_download("report.pdf", plaintext.clone())
            .into_responder(),
    );

    let outcome = fixture
        .decryption()
        .fetch_and_decrypt(&credentials(), "report.pdf", SOURCE_URL, Some(5_000), &document())
        .await
        .unwrap();

    let artifact = outcome.into_artifact().unwrap();
    assert_eq!(artifact.file_name, "report.pdf");
    assert_eq!(artifact.bytes, plaintext);
    assert_eq!(
        agent.commands(),
        vec![
            format!("set-cer \"{TEST_CERTIFICATE}\""),
            format!("url-download tok-123 \"{SOURCE_URL}report.pdf\" 42 memo"),
        ]
    );
    assert_eq!(fixture.reporter.current().current_progress, 100);
}

#[tokio::test(start_paused = true)]
async fn size_hint_drives_download_progress() {
    let fixture = TestBridge::new();
    let plaintext = sample_bytes(2_500_000);
    let _agent = fixture.agent(AgentRole::DecryptDownload, move |_connection, frame: &OutboundFrame| {
        match command_text(frame) {
            Some(command) if command.starts_with("set-cer") => vec![Reply::text("ok")],
            Some(command) if command.starts_with("url-download") => {
                let mut replies = Vec::new();
                for chunk in Reply::chunks(&plaintext, CHUNK_SIZE_BYTES as usize) {
                    replies.push(chunk);
                    replies.push(Reply::Delay(Duration::from_millis(10)));
                }
                replies.push(Reply::text("99"));
                replies
            }
            _ => vec![Reply::text("-100")],
        }
    });

    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);
    let _subscription = fixture
        .reporter
        .subscribe(move |record| sink.lock().push((record.received_chunks, record.current_progress)));

    fixture
        .decryption()
        .fetch_and_decrypt(&credentials(), "scan.pdf", SOURCE_URL, Some(2_500_000), &document())
        .await
        .unwrap();
    tokio::task::yield_now().await;

    let record = fixture.reporter.current();
    assert_eq!(record.expected_chunks, 3);
    assert_eq!(record.received_chunks, 3);
    assert_eq!(record.file_size_bytes, 2_500_000);
    assert_eq!(record.current_progress, 100);

    let observed = observed.lock().clone();
    assert!(observed.contains(&(1, 41)), "{observed:?}");
    assert!(observed.contains(&(2, 83)), "{observed:?}");
}

#[tokio::test(start_paused = true)]
async fn stop_sentinel_ends_quietly() {
    let fixture = TestBridge::new();
    let _agent = fixture.agent(
        AgentRole::DecryptDownload,
        DecryptScript::default()
            .with_download("report.pdf", sample_bytes(5_000))
            .stopping("report.pdf")
            .into_responder(),
    );

    let outcome = fixture
        .decryption()
        .fetch_and_decrypt(&credentials(), "report.pdf", SOURCE_URL, None, &document())
        .await
        .unwrap();

    assert_eq!(outcome, DecryptOutcome::Stopped);
    assert!(!fixture.reporter.current().error);
    assert!(!fixture.bridge.is_busy(AgentRole::DecryptDownload));
}

#[tokio::test(start_paused = true)]
async fn close_popup_sentinel_dismisses() {
    let fixture = TestBridge::new();
    let _agent = fixture.agent(
        AgentRole::DecryptDownload,
        DecryptScript::default()
            .with_download("report.pdf", sample_bytes(5_000))
            .interrupting("report.pdf", "0")
            .into_responder(),
    );

    let outcome = fixture
        .decryption()
        .fetch_and_decrypt(&credentials(), "report.pdf", SOURCE_URL, None, &document())
        .await
        .unwrap();

    assert_eq!(outcome, DecryptOutcome::Dismissed);
}

#[tokio::test(start_paused = true)]
async fn agent_failure_is_reported_and_flags_progress() {
    let fixture = TestBridge::new();
    let _agent = fixture.agent(
        AgentRole::DecryptDownload,
        DecryptScript::default()
            .with_download("report.pdf", sample_bytes(5_000))
            .interrupting("report.pdf", "-13")
            .into_responder(),
    );

    let result = fixture
        .decryption()
        .fetch_and_decrypt(&credentials(), "report.pdf", SOURCE_URL, None, &document())
        .await;

    assert_matches!(
        result,
        Err(BridgeError::Transfer { failure: AgentFailure::DecryptionFailed })
    );
    assert!(fixture.reporter.current().error);
}

#[tokio::test(start_paused = true)]
async fn unknown_artifact_surfaces_the_download_failure() {
    let fixture = TestBridge::new();
    let _agent = fixture.agent(
        AgentRole::DecryptDownload,
        DecryptScript::default().into_responder(),
    );

    let result = fixture
        .decryption()
        .fetch_and_decrypt(&credentials(), "missing.pdf", SOURCE_URL, None, &document())
        .await;

    assert_matches!(
        result,
        Err(BridgeError::Transfer { failure: AgentFailure::DownloadFailed })
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_certificate_sends_no_download() {
    let fixture = TestBridge::new();
    let script = DecryptScript {
        certificate_reply: Some("err: invalid cert".to_string()),
        ..DecryptScript::default()
    }
    .with_download("report.pdf", sample_bytes(10));
    let agent = fixture.agent(AgentRole::DecryptDownload, script.into_responder());

    let result = fixture
        .decryption()
        .fetch_and_decrypt(&credentials(), "report.pdf", SOURCE_URL, None, &document())
        .await;

    assert_matches!(result, Err(BridgeError::CertificateRejected { .. }));
    assert!(agent.commands_starting_with("url-download").is_empty());
}

#[tokio::test(start_paused = true)]
async fn attachments_decrypt_in_order_on_one_session() {
    let documents = MockDocumentService::new().with_attachments(
        document(),
        vec![
            attachment("f1", "one.pdf", 3_000, true),
            attachment("f2", "plain.txt", 10, false),
            attachment("f3", "two.pdf", 4_500, true),
        ],
    );
    let fixture = TestBridge::new().with_documents(documents);
    let agent = fixture.agent(
        AgentRole::DecryptDownload,
        DecryptScript::default()
            .with_download("one.pdf", sample_bytes(3_000))
            .with_download("two.pdf", sample_bytes(4_500))
            .into_responder(),
    );

    let outcomes = fixture
        .decryption()
        .decrypt_attachments(&credentials(), &document(), SOURCE_URL)
        .await
        .unwrap();

    let names: Vec<String> = outcomes
        .iter()
        .map(|outcome| outcome.artifact().unwrap().file_name.clone())
        .collect();
    assert_eq!(names, vec!["one.pdf", "two.pdf"]);
    assert_eq!(agent.connections(), 1);
    assert_eq!(agent.commands_starting_with("set-cer").len(), 1);
    assert_eq!(agent.commands_starting_with("url-download").len(), 2);

    let record = fixture.reporter.current();
    assert_eq!(record.total_files, 2);
    assert_eq!(record.current_file_index, 1);
}

#[tokio::test(start_paused = true)]
async fn stopped_attachment_ends_the_batch() {
    let documents = MockDocumentService::new().with_attachments(
        document(),
        vec![
            attachment("f1", "one.pdf", 3_000, true),
            attachment("f2", "two.pdf", 3_000, true),
        ],
    );
    let fixture = TestBridge::new().with_documents(documents);
    let agent = fixture.agent(
        AgentRole::DecryptDownload,
        DecryptScript::default()
            .with_download("one.pdf", sample_bytes(3_000))
            .with_download("two.pdf", sample_bytes(3_000))
            .stopping("one.pdf")
            .into_responder(),
    );

    let outcomes = fixture
        .decryption()
        .decrypt_attachments(&credentials(), &document(), SOURCE_URL)
        .await
        .unwrap();

    assert_eq!(outcomes, vec![DecryptOutcome::Stopped]);
    assert_eq!(agent.commands_starting_with("url-download").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn local_file_is_named_by_the_agent() {
    let fixture = TestBridge::new();
    let plaintext = sample_bytes(2_048);
    let script = DecryptScript {
        local_file: Some(("contract.pdf".to_string(), plaintext.clone())),
        ..DecryptScript::default()
    };
    let agent = fixture.agent(AgentRole::Decrypt, script.into_responder());

    let outcome = fixture.decryption().decrypt_file(&credentials()).await.unwrap();

    let artifact = outcome.into_artifact().unwrap();
    assert_eq!(artifact.file_name, "contract.pdf");
    assert_eq!(artifact.bytes, plaintext);
    assert_eq!(agent.commands_starting_with("get-file"), vec!["get-file".to_string()]);
    assert_eq!(fixture.reporter.current().file_name, "contract.pdf");
}

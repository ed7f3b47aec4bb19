#![allow(missing_docs)]
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use tokenbridge_broker::AttachmentDescriptor;
use tokenbridge_core::{OutboundFrame, CHUNK_SIZE_BYTES};
use tokenbridge_testkit::strategies::{chunk_lengths, file_size};
use tokenbridge_testkit::*;

fn split(bytes: &[u8], lengths: &[u64]) -> Vec<Vec<u8>> {
    let mut offset = 0usize;
    lengths
        .iter()
        .map(|length| {
            let end = offset + *length as usize;
            let chunk = bytes[offset..end].to_vec();
            offset = end;
            chunk
        })
        .collect()
}

fn size_and_lengths() -> impl Strategy<Value = (u64, Vec<u64>)> {
    file_size().prop_flat_map(|size| (Just(size), chunk_lengths(size)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn reassembled_download_matches_the_agent_stream((size, lengths) in size_and_lengths()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async move {
            let plaintext = sample_bytes(size as usize);
            let chunks = split(&plaintext, &lengths);
            let documents = MockDocumentService::new().with_attachments(
                document(),
                vec![AttachmentDescriptor {
                    file_id: "f1".to_string(),
                    file_name: "blob.bin".to_string(),
                    size_bytes: Some(size),
                    encrypted: true,
                }],
            );
            let fixture = TestBridge::new().with_documents(documents);
            let _agent = fixture.agent(AgentRole::DecryptDownload, move |_connection, frame: &OutboundFrame| {
                match command_text(frame) {
                    Some(command) if command.starts_with("set-cer") => vec![Reply::text("ok")],
                    Some(command) if command.starts_with("url-download") => {
                        let mut replies: Vec<Reply> =
                            chunks.iter().cloned().map(Reply::Binary).collect();
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
                .subscribe(move |record| sink.lock().push(record.current_progress));

            let outcomes = fixture
                .decryption()
                .decrypt_attachments(&credentials(), &document(), "https://files.example/")
                .await
                .unwrap();
            tokio::task::yield_now().await;

            let artifact = outcomes[0].artifact().unwrap();
            assert_eq!(artifact.bytes, plaintext);

            let record = fixture.reporter.current();
            assert_eq!(record.current_progress, 100);
            assert_eq!(record.received_chunks, lengths.len() as u64);
            assert_eq!(record.expected_chunks, size.div_ceil(CHUNK_SIZE_BYTES));

            let observed = observed.lock().clone();
            assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]), "{observed:?}");
        });
    }
}

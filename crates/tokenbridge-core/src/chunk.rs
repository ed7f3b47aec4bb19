//! Chunked artifact reassembly
//!
//! The agent streams an artifact as a run of binary frames followed by the
//! completion sentinel. Frames carry no sequence number: arrival order is
//! reassembly order, so the transport underneath must be ordered and
//! lossless. Nothing here reorders, deduplicates or detects gaps.

use crate::errors::{BridgeError, BridgeResult};
use crate::progress::ProgressReporter;
use crate::wire::AgentFailure;
use tracing::debug;

/// A fully reassembled transfer result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name supplied by the caller (or the agent, for downloads)
    pub file_name: String,
    /// Concatenated chunk bytes
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Artifact length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-byte artifact
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Reassembles one artifact at a time and keeps the progress record current
#[derive(Debug)]
pub struct ChunkAssembler {
    reporter: ProgressReporter,
    chunk_size_bytes: u64,
    file_name: String,
    expected_size: u64,
    chunks: Vec<Vec<u8>>,
    received_bytes: u64,
    receiving: bool,
}

impl ChunkAssembler {
    /// Create an idle assembler that reports through `reporter`.
    /// `chunk_size_bytes` is the nominal chunk size used for
    /// `expected_chunks`; actual chunks may be any size.
    pub fn new(reporter: ProgressReporter, chunk_size_bytes: u64) -> Self {
        Self {
            reporter,
            chunk_size_bytes,
            file_name: String::new(),
            expected_size: 0,
            chunks: Vec::new(),
            received_bytes: 0,
            receiving: false,
        }
    }

    /// Start collecting file number `index` of the operation.
    ///
    /// Starting a second transfer before the first one completed is a
    /// protocol violation: the wire cannot tell the two files' chunks apart.
    pub fn begin_transfer(
        &mut self,
        index: usize,
        file_name: impl Into<String>,
        expected_size: u64,
    ) -> BridgeResult<()> {
        let file_name = file_name.into();
        if self.receiving {
            return Err(BridgeError::protocol(format!(
                "transfer of {file_name} started before {} completed",
                self.file_name
            )));
        }

        self.reporter
            .begin_file(index, &file_name, expected_size, self.chunk_size_bytes);
        self.file_name = file_name;
        self.expected_size = expected_size;
        self.chunks.clear();
        self.received_bytes = 0;
        self.receiving = true;
        Ok(())
    }

    /// Append a chunk; returns the updated progress percentage
    pub fn on_chunk(&mut self, chunk: Vec<u8>) -> BridgeResult<u8> {
        if !self.receiving {
            return Err(BridgeError::protocol(
                "binary chunk received with no transfer in progress",
            ));
        }

        self.received_bytes += chunk.len() as u64;
        self.chunks.push(chunk);
        let progress = self.reporter.record_chunk(self.received_bytes);
        debug!(
            file = %self.file_name,
            chunks = self.chunks.len(),
            received_bytes = self.received_bytes,
            expected_bytes = self.expected_size,
            progress,
            "Chunk received"
        );
        Ok(progress)
    }

    /// Finalize on the completion sentinel
    pub fn on_completion_sentinel(&mut self) -> BridgeResult<Artifact> {
        if !self.receiving {
            return Err(BridgeError::protocol(
                "completion sentinel received with no transfer in progress",
            ));
        }

        let mut bytes = Vec::with_capacity(self.received_bytes as usize);
        for chunk in self.chunks.drain(..) {
            bytes.extend_from_slice(&chunk);
        }
        self.receiving = false;
        self.received_bytes = 0;
        self.reporter.complete_file();

        Ok(Artifact {
            file_name: std::mem::take(&mut self.file_name),
            bytes,
        })
    }

    /// Discard the partial artifact and turn `failure` into an error
    pub fn on_error_sentinel(&mut self, failure: AgentFailure) -> BridgeError {
        self.abort();
        self.reporter.fail();
        BridgeError::transfer(failure)
    }

    /// Drop any partial artifact without flagging an error
    pub fn abort(&mut self) {
        self.chunks.clear();
        self.received_bytes = 0;
        self.receiving = false;
    }

    /// Replace the file name of the artifact in progress
    pub fn rename(&mut self, file_name: impl Into<String>) {
        let file_name = file_name.into();
        self.reporter
            .update(|record| record.file_name.clone_from(&file_name));
        self.file_name = file_name;
    }

    /// True between `begin_transfer` and the terminal sentinel
    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Chunks appended to the current artifact
    pub fn received_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CHUNK_SIZE_BYTES;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn split(data: &[u8], chunk: usize) -> Vec<Vec<u8>> {
        data.chunks(chunk).map(<[u8]>::to_vec).collect()
    }

    #[test]
    fn two_and_a_half_megabytes_in_three_chunks() {
        let reporter = ProgressReporter::new();
        reporter.begin_operation(1);
        let mut assembler = ChunkAssembler::new(reporter.clone(), CHUNK_SIZE_BYTES);
        let data: Vec<u8> = (0..2_500_000u32).map(|i| (i % 251) as u8).collect();

        assembler.begin_transfer(0, "scan.pdf", data.len() as u64).unwrap();
        assert_eq!(reporter.current().expected_chunks, 3);

        for chunk in split(&data, CHUNK_SIZE_BYTES as usize) {
            assembler.on_chunk(chunk).unwrap();
        }
        assert_eq!(reporter.current().received_chunks, 3);

        let artifact = assembler.on_completion_sentinel().unwrap();
        assert_eq!(artifact.len(), 2_500_000);
        assert_eq!(artifact.bytes, data);
        assert_eq!(artifact.file_name, "scan.pdf");
        assert_eq!(reporter.current().current_progress, 100);
        assert!(!reporter.current().error);
    }

    #[test]
    fn chunks_outside_a_transfer_are_violations() {
        let mut assembler = ChunkAssembler::new(ProgressReporter::new(), 4);
        assert_matches!(
            assembler.on_chunk(vec![1]),
            Err(BridgeError::ProtocolViolation { .. })
        );
        assert_matches!(
            assembler.on_completion_sentinel(),
            Err(BridgeError::ProtocolViolation { .. })
        );
    }

    #[test]
    fn second_transfer_before_completion_is_a_violation() {
        let mut assembler = ChunkAssembler::new(ProgressReporter::new(), 4);
        assembler.begin_transfer(0, "a", 8).unwrap();
        assembler.on_chunk(vec![0; 4]).unwrap();
        assert_matches!(
            assembler.begin_transfer(1, "b", 8),
            Err(BridgeError::ProtocolViolation { .. })
        );
    }

    #[test]
    fn error_sentinel_discards_partial_artifact() {
        let reporter = ProgressReporter::new();
        let mut assembler = ChunkAssembler::new(reporter.clone(), 4);
        assembler.begin_transfer(0, "a", 8).unwrap();
        assembler.on_chunk(vec![0; 4]).unwrap();

        let err = assembler.on_error_sentinel(AgentFailure::DecryptionFailed);
        assert_eq!(err, BridgeError::transfer(AgentFailure::DecryptionFailed));
        assert!(!assembler.is_receiving());
        assert_eq!(assembler.received_bytes(), 0);
        assert!(reporter.current().error);
        assert!(reporter.current().current_progress < 100);
    }

    proptest! {
        #[test]
        fn reassembled_length_matches_and_progress_is_monotonic(
            size in 0usize..20_000,
            chunk in 1usize..4_096,
        ) {
            let reporter = ProgressReporter::new();
            let mut assembler = ChunkAssembler::new(reporter.clone(), chunk as u64);
            let data = vec![0xA5u8; size];
            assembler.begin_transfer(0, "f", size as u64).unwrap();

            let mut last = 0u8;
            for piece in split(&data, chunk) {
                let progress = assembler.on_chunk(piece).unwrap();
                prop_assert!(progress >= last);
                last = progress;
            }
            let artifact = assembler.on_completion_sentinel().unwrap();
            prop_assert_eq!(artifact.len(), size);
            prop_assert_eq!(reporter.current().current_progress, 100);
        }
    }
}

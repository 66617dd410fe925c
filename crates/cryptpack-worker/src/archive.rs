//! In-memory ZIP assembly.
//!
//! Builds the compressed archive over an in-memory cursor, one entry at a
//! time in the caller's enumeration order. Compression only: encrypting
//! the sealed buffer is the caller's job, applied once to the whole
//! artifact. Any error while an entry is being copied poisons the builder;
//! a partial archive can never be finished.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PipelineError;

/// Streaming ZIP builder over an in-memory buffer.
pub struct ArchiveBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    options: SimpleFileOptions,
    entries: usize,
}

impl ArchiveBuilder {
    /// Creates an empty builder with Deflate at best compression.
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            options: SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(9)),
            entries: 0,
        }
    }

    /// Begin a new entry. The previous entry, if any, is finished first;
    /// callers must fully write one entry before starting the next.
    pub fn start_entry(&mut self, name: &str) -> Result<(), PipelineError> {
        self.writer
            .start_file(name, self.options)
            .map_err(|e| PipelineError::PartialArchive(format!("entry {}: {}", name, e)))?;
        self.entries += 1;
        Ok(())
    }

    /// Append plaintext bytes to the current entry.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), PipelineError> {
        self.writer
            .write_all(data)
            .map_err(|e| PipelineError::PartialArchive(e.to_string()))
    }

    /// Number of entries started so far.
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Seal the archive and return its bytes. Consumes the builder, so a
    /// failed build can never produce output.
    pub fn finish(self) -> Result<Vec<u8>, PipelineError> {
        let cursor = self
            .writer
            .finish()
            .map_err(|e| PipelineError::PartialArchive(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

use std::sync::{Arc, OnceLock};

use sha2::{Digest, Sha256};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{error::AppError, utils::config::AppConfig};

/// Marker inserted between chunks when neighbors are stitched together for
/// extraction or display.
pub const CHUNK_BOUNDARY: &str = "[CHUNK BOUNDARY]";

/// One token-window slice of a revision. Character offsets index into the
/// original text, so `text[start_char..end_char]` (by chars) is `content`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub chunk_id: String,
    pub artifact_id: String,
    pub chunk_index: u32,
    pub content: String,
    pub start_char: usize,
    pub end_char: usize,
    pub token_count: usize,
    pub content_hash: String,
}

/// Token-window chunker. Windows are `chunk_target` tokens wide and advance
/// by `chunk_target - overlap`, so successive chunks share roughly the
/// configured overlap budget. Splits never look ahead; a window boundary
/// falling inside a logical unit takes the earlier cut.
pub struct Chunker {
    tokenizer: Arc<Tokenizer>,
    single_piece_max: usize,
    chunk_target: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(
        tokenizer: Arc<Tokenizer>,
        single_piece_max: usize,
        chunk_target: usize,
        overlap: usize,
    ) -> Result<Self, AppError> {
        if chunk_target == 0 || chunk_target >= single_piece_max {
            return Err(AppError::Validation(format!(
                "chunk target ({chunk_target}) must be positive and below the single-piece maximum ({single_piece_max})"
            )));
        }
        if overlap >= chunk_target {
            return Err(AppError::Validation(format!(
                "chunk overlap ({overlap}) must be below the chunk target ({chunk_target})"
            )));
        }

        Ok(Self {
            tokenizer,
            single_piece_max,
            chunk_target,
            overlap,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            Arc::new(pretrained_tokenizer()?.clone()),
            config.single_piece_max_tokens,
            config.chunk_target_tokens,
            config.chunk_overlap_tokens,
        )
    }

    pub fn count_tokens(&self, text: &str) -> Result<usize, AppError> {
        let encoding = self
            .tokenizer
            .encode_char_offsets(text, false)
            .map_err(|e| AppError::InternalError(format!("tokenizer failed: {e}")))?;

        Ok(encoding.get_ids().len())
    }

    /// Whether the text exceeds the single-piece threshold, and its token
    /// count. Content at exactly the threshold stays a single piece.
    pub fn should_chunk(&self, text: &str) -> Result<(bool, usize), AppError> {
        let token_count = self.count_tokens(text)?;
        let should_chunk = token_count > self.single_piece_max;

        debug!(
            token_count,
            threshold = self.single_piece_max,
            will_chunk = should_chunk,
            "chunk decision"
        );

        Ok((should_chunk, token_count))
    }

    /// Chunk text into token windows. Returns an empty vector when the text
    /// fits in a single piece.
    pub fn chunk(&self, text: &str, artifact_id: &str) -> Result<Vec<ChunkPiece>, AppError> {
        let (should_chunk, token_count) = self.should_chunk(text)?;
        if !should_chunk {
            return Ok(Vec::new());
        }

        let encoding = self
            .tokenizer
            .encode_char_offsets(text, false)
            .map_err(|e| AppError::InternalError(format!("tokenizer failed: {e}")))?;
        let offsets = encoding.get_offsets();
        let total = offsets.len();

        // Character-offset slicing has to respect multi-byte characters.
        let char_to_byte: Vec<usize> = text.char_indices().map(|(byte, _)| byte).collect();
        let char_len = char_to_byte.len();
        let byte_at = |char_index: usize| -> usize {
            if char_index >= char_len {
                text.len()
            } else {
                char_to_byte[char_index]
            }
        };

        let stride = self.chunk_target - self.overlap;
        let mut chunks = Vec::new();
        let mut pos = 0usize;
        let mut chunk_index = 0u32;

        while pos < total {
            let window_end = (pos + self.chunk_target).min(total);
            let start_char = offsets[pos].0;
            let end_char = offsets[window_end - 1].1;
            let content = text
                .get(byte_at(start_char)..byte_at(end_char))
                .ok_or_else(|| {
                    AppError::InternalError("tokenizer offsets out of bounds".into())
                })?
                .to_owned();

            let content_hash = format!("{:x}", Sha256::digest(content.as_bytes()));
            let hash8 = &content_hash[..8];
            let chunk_id = format!("{artifact_id}::chunk::{chunk_index:03}::{hash8}");

            chunks.push(ChunkPiece {
                chunk_id,
                artifact_id: artifact_id.to_string(),
                chunk_index,
                content,
                start_char,
                end_char,
                token_count: window_end - pos,
                content_hash,
            });

            if window_end == total {
                break;
            }
            pos += stride;
            chunk_index += 1;
        }

        info!(
            %artifact_id,
            total_tokens = token_count,
            num_chunks = chunks.len(),
            overlap = self.overlap,
            "text chunked"
        );

        Ok(chunks)
    }
}

/// Stitch a chunk together with its immediate neighbors, separated by
/// explicit boundary markers. Neighbors missing at the edges are skipped.
pub fn expand_neighbors(chunks: &[ChunkPiece], target_index: u32) -> String {
    let Some(target) = chunks.iter().find(|c| c.chunk_index == target_index) else {
        return String::new();
    };

    let mut parts = Vec::new();

    if target_index > 0 {
        if let Some(prev) = chunks.iter().find(|c| c.chunk_index == target_index - 1) {
            parts.push(prev.content.as_str());
            parts.push(CHUNK_BOUNDARY);
        }
    }

    parts.push(target.content.as_str());

    if let Some(next) = chunks.iter().find(|c| c.chunk_index == target_index + 1) {
        parts.push(CHUNK_BOUNDARY);
        parts.push(next.content.as_str());
    }

    parts.join("\n")
}

/// Shared pretrained tokenizer, fetched once per process.
fn pretrained_tokenizer() -> Result<&'static Tokenizer, AppError> {
    static TOKENIZER: OnceLock<Result<Tokenizer, String>> = OnceLock::new();

    match TOKENIZER.get_or_init(|| {
        Tokenizer::from_pretrained("bert-base-cased", None)
            .map_err(|e| format!("failed to initialize tokenizer: {e}"))
    }) {
        Ok(tokenizer) => Ok(tokenizer),
        Err(err) => Err(AppError::InternalError(err.clone())),
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use tokenizers::models::wordlevel::WordLevel;
    use tokenizers::pre_tokenizers::{whitespace::Whitespace, PreTokenizerWrapper};
    use tokenizers::Tokenizer;

    /// Whitespace word tokenizer that needs no downloaded vocabulary. Every
    /// unknown word maps to `[UNK]` but keeps its own offsets, which is all
    /// the chunker consumes.
    pub fn word_tokenizer() -> Arc<Tokenizer> {
        let model = WordLevel::builder()
            .vocab(HashMap::from([("[UNK]".to_string(), 0)]))
            .unk_token("[UNK]".to_string())
            .build()
            .expect("failed to build word-level tokenizer");
        let mut tokenizer = Tokenizer::new(model);
        tokenizer.with_pre_tokenizer(Some(PreTokenizerWrapper::Whitespace(Whitespace {})));
        Arc::new(tokenizer)
    }
}

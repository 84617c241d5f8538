use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Application configuration, loaded from an optional `config` file merged
/// with environment variables. Every tunable the pipelines read lives here so
/// request handlers never invent their own constants.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    // SurrealDB connection
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,

    // OpenAI-compatible provider
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,

    // Embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_embedding_max_retries")]
    pub embedding_max_retries: usize,
    #[serde(default = "default_embedding_timeout_s")]
    pub embedding_timeout_s: u64,
    #[serde(default = "default_embedding_max_concurrency")]
    pub embedding_max_concurrency: usize,

    // Event extraction LLM
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,
    #[serde(default = "default_extraction_timeout_s")]
    pub extraction_timeout_s: u64,

    // Chunking
    #[serde(default = "default_single_piece_max_tokens")]
    pub single_piece_max_tokens: usize,
    #[serde(default = "default_chunk_target_tokens")]
    pub chunk_target_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,

    // Retrieval
    #[serde(default = "default_rrf_constant")]
    pub rrf_constant: u32,
    #[serde(default = "default_retrieval_overfetch")]
    pub retrieval_overfetch: usize,
    #[serde(default = "default_graph_depth")]
    pub graph_depth: usize,
    #[serde(default = "default_graph_budget")]
    pub graph_budget: usize,
    #[serde(default = "default_graph_hop_weight")]
    pub graph_hop_weight: f32,
    #[serde(default = "default_graph_shared_entity_weight")]
    pub graph_shared_entity_weight: f32,
    #[serde(default = "default_graph_edge_confidence_weight")]
    pub graph_edge_confidence_weight: f32,
    /// Edge relationship types admissible during graph expansion. Empty means
    /// every extracted relationship type is followed.
    #[serde(default)]
    pub graph_edge_types: Vec<String>,

    // Entity resolution
    #[serde(default = "default_entity_merge_threshold")]
    pub entity_merge_threshold: f32,
    #[serde(default = "default_entity_review_threshold")]
    pub entity_review_threshold: f32,

    // Job queue / worker
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,
    #[serde(default = "default_event_max_attempts")]
    pub event_max_attempts: u32,
    #[serde(default = "default_stuck_job_threshold_s")]
    pub stuck_job_threshold_s: i64,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    // Connection pool bounds
    #[serde(default = "default_pool_min")]
    pub pool_min: u32,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,

    pub http_port: u16,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_embedding_dimensions() -> u32 {
    3072
}

fn default_embedding_batch_size() -> usize {
    100
}

fn default_embedding_max_retries() -> usize {
    3
}

fn default_embedding_timeout_s() -> u64 {
    30
}

fn default_embedding_max_concurrency() -> usize {
    8
}

fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_extraction_timeout_s() -> u64 {
    60
}

fn default_single_piece_max_tokens() -> usize {
    1200
}

fn default_chunk_target_tokens() -> usize {
    900
}

fn default_chunk_overlap_tokens() -> usize {
    100
}

fn default_rrf_constant() -> u32 {
    60
}

fn default_retrieval_overfetch() -> usize {
    3
}

fn default_graph_depth() -> usize {
    2
}

fn default_graph_budget() -> usize {
    20
}

fn default_graph_hop_weight() -> f32 {
    1.0
}

fn default_graph_shared_entity_weight() -> f32 {
    0.1
}

fn default_graph_edge_confidence_weight() -> f32 {
    0.05
}

fn default_entity_merge_threshold() -> f32 {
    0.85
}

fn default_entity_review_threshold() -> f32 {
    0.70
}

fn default_queue_poll_interval_ms() -> u64 {
    1000
}

fn default_event_max_attempts() -> u32 {
    5
}

fn default_stuck_job_threshold_s() -> i64 {
    600
}

fn default_worker_count() -> usize {
    2
}

fn default_pool_min() -> u32 {
    2
}

fn default_pool_max() -> u32 {
    10
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    let config: AppConfig = config.try_deserialize()?;
    config.validate()?;

    Ok(config)
}

impl AppConfig {
    /// Reject configurations where the chunking window or thresholds are
    /// internally inconsistent. Done once at startup so the pipelines can
    /// assume sane values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_target_tokens >= self.single_piece_max_tokens {
            return Err(ConfigError::Message(format!(
                "chunk_target_tokens ({}) must be less than single_piece_max_tokens ({})",
                self.chunk_target_tokens, self.single_piece_max_tokens
            )));
        }
        if self.chunk_overlap_tokens >= self.chunk_target_tokens {
            return Err(ConfigError::Message(format!(
                "chunk_overlap_tokens ({}) must be less than chunk_target_tokens ({})",
                self.chunk_overlap_tokens, self.chunk_target_tokens
            )));
        }
        if self.embedding_batch_size > 2048 {
            return Err(ConfigError::Message(format!(
                "embedding_batch_size ({}) exceeds the provider limit of 2048",
                self.embedding_batch_size
            )));
        }
        if self.entity_review_threshold >= self.entity_merge_threshold {
            return Err(ConfigError::Message(format!(
                "entity_review_threshold ({}) must be below entity_merge_threshold ({})",
                self.entity_review_threshold, self.entity_merge_threshold
            )));
        }
        if self.pool_min > self.pool_max {
            return Err(ConfigError::Message(format!(
                "pool_min ({}) must not exceed pool_max ({})",
                self.pool_min, self.pool_max
            )));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "memory".to_string(),
            surrealdb_database: "memory".to_string(),
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            embedding_batch_size: default_embedding_batch_size(),
            embedding_max_retries: default_embedding_max_retries(),
            embedding_timeout_s: default_embedding_timeout_s(),
            embedding_max_concurrency: default_embedding_max_concurrency(),
            extraction_model: default_extraction_model(),
            extraction_timeout_s: default_extraction_timeout_s(),
            single_piece_max_tokens: default_single_piece_max_tokens(),
            chunk_target_tokens: default_chunk_target_tokens(),
            chunk_overlap_tokens: default_chunk_overlap_tokens(),
            rrf_constant: default_rrf_constant(),
            retrieval_overfetch: default_retrieval_overfetch(),
            graph_depth: default_graph_depth(),
            graph_budget: default_graph_budget(),
            graph_hop_weight: default_graph_hop_weight(),
            graph_shared_entity_weight: default_graph_shared_entity_weight(),
            graph_edge_confidence_weight: default_graph_edge_confidence_weight(),
            graph_edge_types: Vec::new(),
            entity_merge_threshold: default_entity_merge_threshold(),
            entity_review_threshold: default_entity_review_threshold(),
            queue_poll_interval_ms: default_queue_poll_interval_ms(),
            event_max_attempts: default_event_max_attempts(),
            stuck_job_threshold_s: default_stuck_job_threshold_s(),
            worker_id: None,
            worker_count: default_worker_count(),
            pool_min: default_pool_min(),
            pool_max: default_pool_max(),
            http_port: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.single_piece_max_tokens, 1200);
        assert_eq!(config.chunk_target_tokens, 900);
        assert_eq!(config.chunk_overlap_tokens, 100);
        assert_eq!(config.rrf_constant, 60);
        assert_eq!(config.entity_merge_threshold, 0.85);
        assert_eq!(config.entity_review_threshold, 0.70);
        assert_eq!(config.event_max_attempts, 5);
    }

    #[test]
    fn rejects_chunk_target_above_threshold() {
        let config = AppConfig {
            chunk_target_tokens: 1300,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_overlap_above_target() {
        let config = AppConfig {
            chunk_overlap_tokens: 900,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_embedding_batch() {
        let config = AppConfig {
            embedding_batch_size: 4096,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_entity_thresholds() {
        let config = AppConfig {
            entity_review_threshold: 0.9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

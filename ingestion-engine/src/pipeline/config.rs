#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// Task-queue reschedule backoff.
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_backoff_cap_exponent: u32,
    /// Corpus resolution against the vector service.
    pub corpus_retry_attempts: usize,
    pub corpus_retry_base_delay_ms: u64,
    /// Window bounds for the local-extraction fallback.
    pub chunk_min_chars: usize,
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    /// Summarizer input and deadline.
    pub metadata_excerpt_chars: usize,
    pub summarizer_timeout_secs: u64,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 15 * 60,
            retry_backoff_cap_exponent: 5,
            corpus_retry_attempts: 3,
            corpus_retry_base_delay_ms: 10,
            chunk_min_chars: 500,
            chunk_max_chars: 2_000,
            chunk_overlap_chars: 150,
            metadata_excerpt_chars: 5_000,
            summarizer_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub tuning: EngineTuning,
}

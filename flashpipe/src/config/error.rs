use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("block_q={0} must be a positive multiple of 64")]
    BlockQ(usize),
    #[error("block_kv={0} must be a positive multiple of 64")]
    BlockKv(usize),
    #[error("max_concurrent_steps={0} must be at least 2")]
    MaxConcurrentSteps(usize),
}

pub mod array;
pub mod attention;
pub mod backends;
pub mod config;
pub mod data_type;
pub mod pipeline;
pub mod reference;

pub use array::Array;
pub use attention::{
    AttentionError, AttentionOutput, attention, attention_with_backend, attention_with_pipeline_emitter,
    attention_with_pipeline_emitter_and_backend,
};
pub use config::*;
pub use data_type::*;
pub use reference::{ATOL, RTOL, ReferenceOutput, attention_reference, max_violation};

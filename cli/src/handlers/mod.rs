mod check;
mod tune;

pub use check::{CheckTask, handle_check};
pub use tune::{TuneOptions, TuneResult, handle_tune};

mod backend;
mod barrier;
mod matmul;

pub use backend::{Cpu, DEFAULT_SHARED_MEMORY_CAPACITY};
pub use barrier::CpuBarrier;

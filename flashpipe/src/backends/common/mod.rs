mod backend;
mod barrier;
mod pending_writes;

pub use backend::Backend;
pub use barrier::Barrier;
pub use pending_writes::PendingWrites;

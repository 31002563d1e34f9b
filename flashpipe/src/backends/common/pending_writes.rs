/// Per-thread-group bookkeeping of shared to global transfers.
#[derive(Debug, Default)]
pub struct PendingWrites {
    issued: usize,
    retired: usize,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self) {
        self.issued += 1;
    }

    pub fn outstanding(&self) -> usize {
        self.issued - self.retired
    }

    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Marks the oldest writes as complete until only `max_outstanding` remain.
    pub fn retire_until(
        &mut self,
        max_outstanding: usize,
    ) {
        if self.outstanding() > max_outstanding {
            self.retired = self.issued - max_outstanding;
        }
    }
}

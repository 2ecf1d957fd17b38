use std::time::Duration;

/// Limits for one run of the iteration loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_iterations: u32,
    /// Wall-clock limit for one generator call, retries included
    pub generator_timeout: Duration,
    /// Wall-clock limit for one verification run
    pub verification_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            generator_timeout: Duration::from_secs(15 * 60),
            verification_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl LoopConfig {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_generator_timeout(mut self, timeout: Duration) -> Self {
        self.generator_timeout = timeout;
        self
    }

    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = timeout;
        self
    }
}

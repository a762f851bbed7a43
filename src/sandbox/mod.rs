pub mod bridge;
pub mod contract;
pub mod runtime;
pub mod safety;
pub mod transform;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{RunFailure, RunResult};
use bridge::{HttpTransport, ReqwestTransport};

/// Resource ceilings applied to every program run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLimits {
    pub memory_limit_bytes: usize,
    pub timeout: Duration,
    pub max_fetch_calls: u32,
    pub max_response_bytes: usize,
    pub fetch_timeout: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 32 * 1024 * 1024,
            timeout: Duration::from_secs(30),
            max_fetch_calls: 20,
            max_response_bytes: 5 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

/// Executes one untrusted program and reports a tagged result.
///
/// Implementations block; async callers run them on a blocking thread.
#[cfg_attr(test, mockall::automock)]
pub trait ProgramRunner: Send + Sync {
    fn run(&self, program: &str) -> RunResult;
}

pub struct Sandbox {
    limits: SandboxLimits,
    transport: Arc<dyn HttpTransport>,
    isolates_created: AtomicU64,
}

impl Sandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self::with_transport(limits, Arc::new(ReqwestTransport))
    }

    pub fn with_transport(limits: SandboxLimits, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            limits,
            transport,
            isolates_created: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// How many isolates this sandbox has built so far.
    pub fn isolates_created(&self) -> u64 {
        self.isolates_created.load(Ordering::SeqCst)
    }

    /// Normalize and screen a program without running it.
    ///
    /// Returns the normalized text that would be executed.
    pub fn check(&self, program: &str) -> Result<String, RunFailure> {
        let normalized = transform::normalize(program);
        safety::check(&normalized).map_err(|v| RunFailure::safety(v.to_string()))?;
        Ok(normalized)
    }

    /// `check` plus a compile-only pass; nothing in the program runs.
    pub fn verify(&self, program: &str) -> Result<String, RunFailure> {
        let normalized = self.check(program)?;
        runtime::syntax_check(&normalized, &self.limits)?;
        Ok(normalized)
    }
}

impl ProgramRunner for Sandbox {
    fn run(&self, program: &str) -> RunResult {
        let normalized = self.check(program).inspect_err(|failure| {
            warn!("Program rejected before execution: {}", failure);
        })?;

        self.isolates_created.fetch_add(1, Ordering::SeqCst);
        let result = runtime::execute(&normalized, &self.limits, self.transport.clone());

        match &result {
            Ok(items) => debug!("Program produced {} item(s)", items.len()),
            Err(failure) => debug!("Program failed: {}", failure),
        }
        result
    }
}

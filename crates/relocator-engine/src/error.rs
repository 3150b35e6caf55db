use thiserror::Error;

/// Failure to relocate one module. Other modules of a batch are unaffected.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("failed to parse {module}: {source}")]
    Parse {
        module: String,
        #[source]
        source: relocator_classfile::Error,
    },
    #[error("failed to compute frames for {module}.{method} {reason}")]
    FrameComputation {
        module: String,
        method: String,
        reason: String,
    },
    #[error("failed to encode {module}: {source}")]
    Encode {
        module: String,
        #[source]
        source: relocator_classfile::Error,
    },
}

impl RewriteError {
    /// Name of the module that failed.
    pub fn module(&self) -> &str {
        match self {
            RewriteError::Parse { module, .. }
            | RewriteError::FrameComputation { module, .. }
            | RewriteError::Encode { module, .. } => module,
        }
    }
}

use std::io;

/// Fatal session failures.
///
/// Everything the session can recover from locally (seed read errors,
/// individual mirror failures, corrupt received ranges) is logged and
/// handled in place; it never appears here.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The control file could not be parsed or is unsupported.
    #[error("control file rejected")]
    Control(#[from] control::ControlError),

    /// The block engine failed; in practice always scratch-file I/O.
    #[error(transparent)]
    Engine(#[from] engine::EngineError),

    /// Every target URL failed or served corrupt data before the transfer
    /// completed. The scratch file is kept for a future resume.
    #[error("every target URL failed before the transfer completed")]
    AllUrlsExhausted,

    /// Backing up or replacing the final target failed.
    #[error("replacing the target file failed")]
    TargetIo(#[source] io::Error),
}

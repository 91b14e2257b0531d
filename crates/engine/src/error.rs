use std::io;

/// Errors raised by the block-recovery engine.
///
/// The two variants carry different recovery policies: scratch failures
/// poison the session, seed failures only skip the seed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Reading or writing the scratch file failed. Fatal: the partially
    /// assembled target can no longer be trusted to make progress.
    #[error("scratch file I/O failed")]
    Scratch(#[source] io::Error),

    /// Reading a seed stream failed. Recoverable: the session logs the
    /// failure and moves on to the next seed.
    #[error("seed read failed")]
    Seed(#[source] io::Error),
}

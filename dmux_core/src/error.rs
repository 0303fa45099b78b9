/*!
 * Error taxonomy for the dmux engine.
 *
 * The dispatcher has a set of outcomes worth distinguishing from one
 * another: a fatal crash in a source/sink thread, a caller misusing the
 * single-slot control protocol, or a thread that failed to spawn at all.
 * `DmuxError` gives each of those its own variant instead of collapsing
 * them into a bare string.
 */
use std::fmt;

/**
 * Everything that can surface out of a `Dmux` instance as a hard error.
 *
 * Per-message failures (a sink reporting a failed `consume`) are *not*
 * represented here — those are `MonitorEvent`s consumed by the breaker,
 * never propagated to the dispatcher.
 */
#[derive(Debug)]
pub enum DmuxError {
    /// A source or sink thread panicked; the payload is the panic message
    /// (and, where available, a rendered backtrace) captured at the
    /// `catch_unwind` boundary.
    Fatal(String),

    /// The control protocol was used incorrectly: a second control message
    /// submitted before the prior response was read, a zero lane count, or
    /// a call made after the dispatcher already stopped.
    ProtocolMisuse(&'static str),

    /// A dispatcher, lane, or breaker thread failed to spawn.
    ThreadSpawn(std::io::Error),
}

impl fmt::Display for DmuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmuxError::Fatal(msg) => write!(f, "dmux: fatal error: {msg}"),
            DmuxError::ProtocolMisuse(reason) => write!(f, "dmux: protocol misuse: {reason}"),
            DmuxError::ThreadSpawn(err) => write!(f, "dmux: failed to spawn thread: {err}"),
        }
    }
}

impl std::error::Error for DmuxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DmuxError::ThreadSpawn(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DmuxError {
    fn from(err: std::io::Error) -> Self {
        DmuxError::ThreadSpawn(err)
    }
}

/// Extracts a human-readable message from a `catch_unwind` payload.
///
/// Tries `&str`, then `String`, then falls back to a placeholder rather
/// than propagating the raw `Any` payload any further.
pub(crate) fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<unknown panic>".to_string()
    }
}

/// Renders a backtrace captured at a `catch_unwind` boundary.
///
/// Uses the `backtrace` crate rather than `std::backtrace::Backtrace`
/// since `catch_unwind` only hands back the panic payload, not a
/// captured backtrace — this resolves one at the point the panic is
/// caught, which is close enough to the panic site to be useful for a
/// `Fatal` report.
pub(crate) fn capture_backtrace() -> String {
    format!("{:?}", backtrace::Backtrace::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_display_includes_message() {
        let err = DmuxError::Fatal("sink panicked: boom".to_string());
        assert_eq!(err.to_string(), "dmux: fatal error: sink panicked: boom");
    }

    #[test]
    fn protocol_misuse_display_includes_reason() {
        let err = DmuxError::ProtocolMisuse("resize requested with size 0");
        assert_eq!(
            err.to_string(),
            "dmux: protocol misuse: resize requested with size 0"
        );
    }

    #[test]
    fn thread_spawn_wraps_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "out of threads");
        let err: DmuxError = io_err.into();
        assert!(err.to_string().contains("out of threads"));
        assert!(std::error::Error::source(&err).is_some());
    }
}

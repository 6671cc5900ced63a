use crate::vm::Diagnostics;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- session state errors --------------------------------------
    #[error("no active debug session")]
    NoSession,
    #[error("program is not stopped")]
    NotStopped,
    #[error("no exception information available")]
    NoException,

    // --------------------------------- entity not found ------------------------------------------
    #[error("frame {0} not found")]
    FrameNotFound(i64),
    #[error("variables reference {0} not found")]
    ReferenceNotFound(i64),
    #[error("invalid memory reference `{0}`")]
    InvalidMemoryReference(String),

    // --------------------------------- toolchain errors ------------------------------------------
    #[error("{0}")]
    Diagnostics(#[from] Diagnostics),
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    // --------------------------------- invariant violations --------------------------------------
    #[error("type `{0}` is not resolved")]
    UnresolvedType(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Return true if error signals a broken contract between the compiler and the debugger
    /// rather than a regular failure.
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            Error::UnresolvedType(_) => true,
            Error::NoSession => false,
            Error::NotStopped => false,
            Error::NoException => false,
            Error::FrameNotFound(_) => false,
            Error::ReferenceNotFound(_) => false,
            Error::InvalidMemoryReference(_) => false,
            Error::Diagnostics(_) => false,
            Error::Evaluation(_) => false,
            Error::Io(_) => false,
            Error::Config(_) => false,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vm::Diagnostic;

    #[test]
    fn test_invariant_violation() {
        assert!(Error::UnresolvedType("T".to_string()).is_invariant_violation());
        assert!(!Error::FrameNotFound(1).is_invariant_violation());
        let err = Error::from(Diagnostics::single(Diagnostic::error("unknown identifier `x`")));
        assert!(!err.is_invariant_violation());
        assert_eq!(err.to_string(), "error: unknown identifier `x`\n");
    }

    #[test]
    fn test_weak_error() {
        let ok: Result<i32, Error> = Ok(1);
        assert_eq!(weak_error!(ok), Some(1));
        let err: Result<i32, Error> = Err(Error::NoSession);
        assert_eq!(muted_error!(err, "read:"), None);
    }
}

use std::fmt;

/// Classification of a fatal machine error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operand kind mismatch for an operation.
    Type,
    /// Array or string index, or slice bounds, out of range.
    Range,
    /// Required map key, syscall, register, module or export absent.
    Lookup,
    /// The allocator could not satisfy a request.
    Exhausted,
    /// Malformed frame or stack state.
    Control,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Type => "type error",
            ErrorKind::Range => "range error",
            ErrorKind::Lookup => "lookup error",
            ErrorKind::Exhausted => "resource exhausted",
            ErrorKind::Control => "control error",
        };
        f.write_str(name)
    }
}

/// An error that halts the machine.
///
/// Nothing is recoverable inside the machine: a handler returning one of these
/// stops the dispatch loop, and the host sees the kind, the message and the
/// source-level stack trace captured at the time of failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct MachineError {
    pub kind: ErrorKind,
    pub message: String,
    pub trace: Vec<String>,
}

impl MachineError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    #[must_use]
    pub fn range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Range, message)
    }

    #[must_use]
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lookup, message)
    }

    #[must_use]
    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Exhausted, message)
    }

    #[must_use]
    pub fn control(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Control, message)
    }

    #[must_use]
    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = MachineError::range("index 4 out of bounds for length 2");
        assert_eq!(err.to_string(), "range error: index 4 out of bounds for length 2");
        assert_eq!(err.kind, ErrorKind::Range);
    }

    #[test]
    fn with_trace_replaces_trace() {
        let err = MachineError::control("boom").with_trace(vec!["at main (a.fk:1:1)".into()]);
        assert_eq!(err.trace.len(), 1);
    }
}

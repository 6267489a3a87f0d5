#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// The run completed but one or more actions failed (errors counter > 0).
    ActionsFailed = 20,

    /// Invalid CLI/config (bad flags, unreadable config, invalid scheduler or action settings).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_errors(errors: u64) -> Self {
        if errors > 0 {
            Self::ActionsFailed
        } else {
            Self::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_actions_failed() {
        assert_eq!(ExitCode::from_errors(0), ExitCode::Success);
        assert_eq!(ExitCode::from_errors(3).as_i32(), 20);
    }
}

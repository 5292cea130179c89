use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ComputeResult<T> = Result<T, BubbleError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BubbleErrorCategory {
    Success,
    ConfigError,
    IoError,
    ComputationError,
    InternalError,
}

impl BubbleErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::ConfigError => 2,
            Self::IoError => 3,
            Self::ComputationError => 4,
            Self::InternalError => 5,
        }
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Fatal-path error for a redshift invocation.
///
/// The `placeholder` is a stable machine-readable code (`INPUT.*`, `IO.*`,
/// `RUN.*`, `SYS.*`) used in diagnostics; the message carries the detail.
/// All resources are scoped-ownership, so any early return with one of these
/// releases every previously acquired field and table exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct BubbleError {
    category: BubbleErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl BubbleError {
    pub fn new(
        category: BubbleErrorCategory,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            placeholder,
            message: message.into(),
        }
    }

    pub fn config(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(BubbleErrorCategory::ConfigError, placeholder, message)
    }

    pub fn io(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(BubbleErrorCategory::IoError, placeholder, message)
    }

    pub fn computation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(BubbleErrorCategory::ComputationError, placeholder, message)
    }

    pub fn internal(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(BubbleErrorCategory::InternalError, placeholder, message)
    }

    pub const fn category(&self) -> BubbleErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category.is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.placeholder, self.message)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}

impl Display for BubbleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.placeholder, self.message)
    }
}

impl Error for BubbleError {}

#[cfg(test)]
mod tests {
    use super::{BubbleError, BubbleErrorCategory};

    #[test]
    fn exit_codes_are_stable_per_category() {
        assert_eq!(BubbleErrorCategory::Success.exit_code(), 0);
        assert_eq!(BubbleErrorCategory::ConfigError.exit_code(), 2);
        assert_eq!(BubbleErrorCategory::IoError.exit_code(), 3);
        assert_eq!(BubbleErrorCategory::ComputationError.exit_code(), 4);
        assert_eq!(BubbleErrorCategory::InternalError.exit_code(), 5);
    }

    #[test]
    fn fatal_error_renders_diagnostic_lines() {
        let error = BubbleError::config(
            "INPUT.REDSHIFT_ORDER",
            "previous redshift 7.0 must be larger than 8.0",
        );

        assert_eq!(error.exit_code(), 2);
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [INPUT.REDSHIFT_ORDER] previous redshift 7.0 must be larger than 8.0"
        );
        assert_eq!(
            error.fatal_exit_line().as_deref(),
            Some("FATAL EXIT CODE: 2")
        );
    }
}

use serde::{Deserialize, Serialize};

/// Closed failure taxonomy the analysis model classifies observations into.
///
/// | Category      | Playbook section    |
/// |---------------|---------------------|
/// | `ImportError` | `import_resolution` |
/// | `TestStale`   | `test_generation`   |
/// | `SyntaxError` | `error_recovery`    |
/// | `LogicError`  | `general`           |
/// | `Timeout`     | `error_recovery`    |
/// | `StdlibMiss`  | `stdlib_usage`      |
/// | `BuildOrder`  | `build_ordering`    |
/// | `JsonEscape`  | `error_recovery`    |
/// | `TypeError`   | `general`           |
/// | `Other`       | `general`           |
///
/// Unknown labels deserialize as [`FailureCategory::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FailureCategory {
    ImportError,
    TestStale,
    SyntaxError,
    LogicError,
    Timeout,
    StdlibMiss,
    BuildOrder,
    JsonEscape,
    TypeError,
    Other,
}

impl FailureCategory {
    pub const ALL: [Self; 10] = [
        Self::ImportError,
        Self::TestStale,
        Self::SyntaxError,
        Self::LogicError,
        Self::Timeout,
        Self::StdlibMiss,
        Self::BuildOrder,
        Self::JsonEscape,
        Self::TypeError,
        Self::Other,
    ];

    /// Wire label, as the model is asked to write it.
    pub fn label(self) -> &'static str {
        match self {
            Self::ImportError => "IMPORT_ERROR",
            Self::TestStale => "TEST_STALE",
            Self::SyntaxError => "SYNTAX_ERROR",
            Self::LogicError => "LOGIC_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::StdlibMiss => "STDLIB_MISS",
            Self::BuildOrder => "BUILD_ORDER",
            Self::JsonEscape => "JSON_ESCAPE",
            Self::TypeError => "TYPE_ERROR",
            Self::Other => "OTHER",
        }
    }

    /// Case-insensitive; `-` and spaces are read as `_`.
    pub fn from_label(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|c| c.label() == normalized)
    }

    /// Playbook section lessons in this category belong to.
    pub fn section(self) -> &'static str {
        match self {
            Self::ImportError => "import_resolution",
            Self::TestStale => "test_generation",
            Self::SyntaxError | Self::Timeout | Self::JsonEscape => "error_recovery",
            Self::StdlibMiss => "stdlib_usage",
            Self::BuildOrder => "build_ordering",
            Self::LogicError | Self::TypeError | Self::Other => "general",
        }
    }

    /// Comma-separated list of every label, for prompts.
    pub fn label_list() -> String {
        Self::ALL.map(Self::label).join(", ")
    }
}

impl From<String> for FailureCategory {
    fn from(s: String) -> Self {
        Self::from_label(&s).unwrap_or(Self::Other)
    }
}

impl From<FailureCategory> for String {
    fn from(c: FailureCategory) -> Self {
        c.label().to_string()
    }
}

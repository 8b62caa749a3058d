/// Sections every fresh playbook starts with.
pub const DEFAULT_SECTIONS: [&str; 10] = [
    "import_resolution",
    "test_generation",
    "build_ordering",
    "flask_patterns",
    "dataclass_patterns",
    "sqlite_patterns",
    "error_recovery",
    "stdlib_usage",
    "architecture",
    "general",
];

/// Two-letter id prefix for a section: the initials of the first two
/// underscore-separated words, or the first two letters of a single word.
///
/// `import_resolution` → `IR`, `general` → `GE`.
pub fn section_prefix(section: &str) -> String {
    let mut words = section.split('_').filter(|w| !w.is_empty());
    let prefix: String = match (words.next(), words.next()) {
        (Some(first), Some(second)) => first.chars().take(1).chain(second.chars().take(1)).collect(),
        _ => section.chars().take(2).collect(),
    };
    prefix.to_uppercase()
}

/// Agent roles that consume playbook excerpts.  Each role sees only the
/// sections relevant to its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Planner,
    Builder,
    TestGen,
    Initializer,
    Explorer,
}

impl AgentRole {
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planner" => Some(Self::Planner),
            "builder" => Some(Self::Builder),
            "test_gen" | "test-gen" | "testgen" => Some(Self::TestGen),
            "initializer" => Some(Self::Initializer),
            "explorer" => Some(Self::Explorer),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Builder => "builder",
            Self::TestGen => "test_gen",
            Self::Initializer => "initializer",
            Self::Explorer => "explorer",
        }
    }

    /// Sections this role is shown, in priority order.
    pub fn sections(self) -> &'static [&'static str] {
        match self {
            Self::Planner => &["architecture", "build_ordering", "general"],
            Self::Builder => &[
                "import_resolution",
                "flask_patterns",
                "dataclass_patterns",
                "sqlite_patterns",
                "stdlib_usage",
                "error_recovery",
                "general",
            ],
            Self::TestGen => &["test_generation", "import_resolution", "general"],
            Self::Initializer | Self::Explorer => &["architecture", "general"],
        }
    }
}

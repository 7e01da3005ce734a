/// Which destination-path strategy a job uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Photo,
    #[default]
    Generic,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Photo => "photo",
            StrategyKind::Generic => "generic",
        }
    }

    /// Case-insensitive name from a job file. `default` is accepted as the
    /// generic strategy for older job files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "photo" => Some(Self::Photo),
            "generic" | "default" => Some(Self::Generic),
            _ => None,
        }
    }
}

/// The file-transfer action applied to each accepted file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OperationKind {
    #[default]
    Copy,
    Move,
    Sync,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Copy => "copy",
            OperationKind::Move => "move",
            OperationKind::Sync => "sync",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "copy" => Some(Self::Copy),
            "move" => Some(Self::Move),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

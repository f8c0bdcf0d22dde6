#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    DuplicateLocation(String),
    UnknownParent { id: String, parent_id: String },
    HierarchyCycle(String),
    UnknownLocation(String),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::DuplicateLocation(id) => write!(f, "duplicate location id: {id}"),
            EngineError::UnknownParent { id, parent_id } => {
                write!(f, "location {id} references unknown parent: {parent_id}")
            }
            EngineError::HierarchyCycle(id) => write!(f, "hierarchy cycle through location: {id}"),
            EngineError::UnknownLocation(id) => write!(f, "unknown location: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

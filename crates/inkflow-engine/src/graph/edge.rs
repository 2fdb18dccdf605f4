use serde::{Deserialize, Serialize};

/// A dependency between two nodes: `target` runs after `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEdge")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
}

/// Edge as stored; the id may be missing or blank.
#[derive(Deserialize)]
struct RawEdge {
    #[serde(default)]
    id: Option<String>,
    source: String,
    target: String,
}

impl From<RawEdge> for Edge {
    fn from(raw: RawEdge) -> Self {
        match raw.id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Self {
                id,
                source: raw.source,
                target: raw.target,
            },
            None => Self::new(raw.source, raw.target),
        }
    }
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
        }
    }
}

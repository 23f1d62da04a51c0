//! Commands, objects and the command detail record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::geo::Geometry;

/// A tokenized command: operation name followed by its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    args: Vec<String>,
}

impl Command {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Operation name, lowercased
    pub fn name(&self) -> Option<String> {
        self.args.first().map(|name| name.to_ascii_lowercase())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// Stored object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub geometry: Option<Geometry>,
    pub fields: BTreeMap<String, f64>,
    pub payload: Option<String>,
}

impl Object {
    pub fn with_geometry(geometry: Geometry) -> Self {
        Self {
            geometry: Some(geometry),
            ..Default::default()
        }
    }
}

/// Write operations understood by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Set,
    Fset,
    Del,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Set => "set",
            Self::Fset => "fset",
            Self::Del => "del",
        };
        f.write_str(name)
    }
}

/// `NX` / `XX` guards on SET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    IfNotExists,
    IfExists,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOp {
    pub key: String,
    pub id: String,
    pub fields: Vec<(String, f64)>,
    pub condition: Option<SetCondition>,
    pub geometry: Option<Geometry>,
    pub payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FsetOp {
    pub key: String,
    pub id: String,
    pub fields: Vec<(String, f64)>,
    /// `XX`: a missing object is a no-op instead of an error
    pub if_exists: bool,
}

/// Parsed command, one variant per executor case
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Set(SetOp),
    Fset(FsetOp),
    Del { key: String, id: String },
}

/// What a command did to its object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    Noop,
}

impl ChangeKind {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Noop)
    }
}

/// Authoritative record of one command's effect on the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDetail {
    /// Position of the entry in the durable log, starting at 1.
    /// No-op details are never logged and carry 0.
    pub seq: u64,
    pub op: OpKind,
    pub kind: ChangeKind,
    pub key: String,
    pub id: String,
    pub previous: Option<Object>,
    pub new: Option<Object>,
    pub timestamp: DateTime<Utc>,
}

impl CommandDetail {
    pub fn previous_geometry(&self) -> Option<&Geometry> {
        self.previous.as_ref().and_then(|o| o.geometry.as_ref())
    }

    pub fn new_geometry(&self) -> Option<&Geometry> {
        self.new.as_ref().and_then(|o| o.geometry.as_ref())
    }
}

//! Data loader parameters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of data loader requested for a storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLoaderKind {
    /// No loader; content is written directly
    None,
    /// Whole files are streamed in order
    Streaming,
    /// Pages are fetched on demand
    Incremental,
}

impl fmt::Display for DataLoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLoaderKind::None => write!(f, "none"),
            DataLoaderKind::Streaming => write!(f, "streaming"),
            DataLoaderKind::Incremental => write!(f, "incremental"),
        }
    }
}

/// Parameters supplied when a storage is created with a data loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLoaderParams {
    /// Loader kind
    pub kind: DataLoaderKind,
    /// Package that provides the loader
    pub package_name: String,
    /// Loader component inside the package
    pub class_name: String,
    /// Opaque arguments forwarded to the loader (stable ordering)
    pub arguments: BTreeMap<String, String>,
}

impl DataLoaderParams {
    /// Creates loader parameters for the given package
    pub fn new(kind: DataLoaderKind, package_name: impl Into<String>) -> Self {
        Self {
            kind,
            package_name: package_name.into(),
            class_name: String::new(),
            arguments: BTreeMap::new(),
        }
    }

    /// Sets the loader component name
    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    /// Adds an argument
    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

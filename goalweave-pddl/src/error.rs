//! Parse errors, pinpointing the offending substring.

use goalweave_core::OntologyError;
use thiserror::Error;

/// Error raised while reading PDDL text. No partial domain or problem is
/// ever returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PddlError {
    #[error("parse error at offset {offset} near \"{near}\": {message}")]
    Parse {
        offset: usize,
        near: String,
        message: String,
    },
    #[error(transparent)]
    Ontology(#[from] OntologyError),
    #[error("reference error: {0}")]
    Reference(String),
}

impl PddlError {
    pub(crate) fn at(offset: usize, text: &str, message: impl Into<String>) -> Self {
        let near: String = text
            .get(offset.min(text.len())..)
            .unwrap_or("")
            .chars()
            .take(24)
            .collect();
        Self::Parse {
            offset,
            near,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PddlError>;

//! Error types for computation graphs
//!
//! Every failure in the crate flows through [`ComputeError`]: a kind, a
//! human-readable message, the node the error originated in, and the ordered
//! list of nodes it propagated through afterwards.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for computation graph operations
pub type Result<T> = std::result::Result<T, ComputeError>;

/// Failure categories for graph operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Error during node computation
    Computation,
    /// Error related to precision levels
    Precision,
    /// Error in dependent nodes
    Dependency,
    /// Resource allocation/availability errors
    Resource,
    /// Computation timeout
    Timeout,
    /// Invalid data or state
    Validation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Computation => write!(f, "computation"),
            ErrorKind::Precision => write!(f, "precision"),
            ErrorKind::Dependency => write!(f, "dependency"),
            ErrorKind::Resource => write!(f, "resource"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Validation => write!(f, "validation"),
        }
    }
}

/// An error raised by a node or the scheduler, with propagation context
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct ComputeError {
    kind: ErrorKind,
    message: String,
    source_node: Option<String>,
    propagation_path: Vec<String>,
}

impl ComputeError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_node: None,
            propagation_path: Vec::new(),
        }
    }

    /// Error during node computation
    pub fn computation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Computation, message)
    }

    /// Error related to precision levels
    pub fn precision(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precision, message)
    }

    /// Error in dependent nodes
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependency, message)
    }

    /// Resource allocation/availability error
    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    /// Computation timeout
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Invalid data or state
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Node the error originated in, if stamped
    pub fn source_node(&self) -> Option<&str> {
        self.source_node.as_deref()
    }

    /// Ordered list of nodes the error passed through after its source
    pub fn propagation_path(&self) -> &[String] {
        &self.propagation_path
    }

    /// Stamp the originating node
    pub fn set_source_node(&mut self, name: impl Into<String>) {
        self.source_node = Some(name.into());
    }

    /// Builder form of [`set_source_node`](Self::set_source_node)
    pub fn with_source_node(mut self, name: impl Into<String>) -> Self {
        self.set_source_node(name);
        self
    }

    /// Append a node to the propagation path
    pub fn add_propagation_path(&mut self, name: impl Into<String>) {
        self.propagation_path.push(name.into());
    }

    /// Stamp this node as source if unset, otherwise record it on the path.
    ///
    /// This is the single rule every node and the scheduler apply when an
    /// error crosses a node boundary.
    pub fn trace_through(&mut self, name: &str) {
        if self.source_node.is_none() {
            self.source_node = Some(name.to_string());
        } else if self.source_node.as_deref() != Some(name) {
            self.propagation_path.push(name.to_string());
        }
    }

    /// Snapshot for introspection via `Graph::get_node_error`
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind,
            message: self.message.clone(),
            source_node: self.source_node.clone(),
            propagation_path: self.propagation_path.clone(),
        }
    }
}

/// Serializable snapshot of a node's recorded error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Failure category
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Node the error originated in
    pub source_node: Option<String>,
    /// Nodes the error passed through after its source
    pub propagation_path: Vec<String>,
}

//! Error types for the Quiver query engine.
//!
//! Planning is total: every structural violation surfaces as a deterministic
//! error before execution begins. The runtime never recovers locally from a
//! data-source failure; it propagates the error upward, closes open cursors
//! and lets the transaction decide between commit and rollback.

use strsim::jaro_winkler;
use thiserror::Error;

/// The primary error type for Quiver operations.
#[derive(Error, Debug)]
pub enum QuiverError {
    /// Query planning error
    #[error("Planning error: {message}")]
    Plan { message: String },

    /// Operation explicitly unsupported; rejected by the planner
    #[error("Not supported: {message}")]
    NotSupported { message: String },

    /// Conversion to an executor was attempted on an incomplete plan
    #[error("Disconnected plan: {message}")]
    DisconnectedPlan { message: String },

    /// A binding was read during execution without ever being connected
    #[error("Binding not bound: {message}")]
    BindingNotBound { message: String },

    /// Type error (type mismatch, unsupported type, etc.)
    #[error("Type error: {message}")]
    Type { message: String },

    /// Schema error (column not found, invalid name, etc.)
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Catalogue error (entity or index not found, etc.)
    #[error("Catalogue error: {message}")]
    Catalogue { message: String },

    /// Transaction error (wrong state, lock conflict, etc.)
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    /// Storage or index failure surfaced by a cursor during execution
    #[error("Execution error: {message}")]
    Execution { message: String },

    /// Operation cancelled through the transaction's cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error (bug in the engine)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl QuiverError {
    /// Create a planning error.
    pub fn plan(message: impl Into<String>) -> Self {
        Self::Plan {
            message: message.into(),
        }
    }

    /// Create a not-supported error.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported {
            message: message.into(),
        }
    }

    /// Create a disconnected-plan error.
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::DisconnectedPlan {
            message: message.into(),
        }
    }

    /// Create a binding-not-bound error.
    pub fn unbound(message: impl Into<String>) -> Self {
        Self::BindingNotBound {
            message: message.into(),
        }
    }

    /// Create a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a catalogue error.
    pub fn catalogue(message: impl Into<String>) -> Self {
        Self::Catalogue {
            message: message.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a schema error with suggestions for similar names.
    ///
    /// Used when a column or entity is not found, to suggest names the
    /// caller might have meant.
    pub fn schema_with_suggestions(
        not_found: &str,
        available: &[String],
        entity_type: &str,
    ) -> Self {
        let suggestions = find_similar_names(not_found, available, 3);
        let mut message = format!("{} '{}' not found", entity_type, not_found);

        if !suggestions.is_empty() {
            message.push_str(". Did you mean: ");
            message.push_str(&suggestions.join(", "));
            message.push('?');
        }

        Self::Schema { message }
    }
}

/// Find similar names using Jaro-Winkler distance.
///
/// Returns up to `max_suggestions` names similar to `target`, most similar
/// first.
pub fn find_similar_names(
    target: &str,
    candidates: &[String],
    max_suggestions: usize,
) -> Vec<String> {
    const MIN_SIMILARITY: f64 = 0.7;

    let target_lower = target.to_lowercase();

    let mut scored: Vec<(f64, &String)> = candidates
        .iter()
        .map(|c| (jaro_winkler(&target_lower, &c.to_lowercase()), c))
        .filter(|(score, _)| *score >= MIN_SIMILARITY)
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(max_suggestions)
        .map(|(_, name)| name.clone())
        .collect()
}

/// Result type alias for Quiver operations.
pub type Result<T> = std::result::Result<T, QuiverError>;

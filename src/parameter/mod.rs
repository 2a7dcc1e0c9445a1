/// Node Parameter Resolver
///
/// Node implementations never read `Node::parameters` directly; they ask the
/// resolver, which applies the node type's declared schema (display rules,
/// defaults, extraction) and evaluates expressions for the current item.

use crate::expression::ExpressionError;
use crate::filter::FilterError;
use crate::value::ConversionError;
use thiserror::Error;

// Declared parameter schema
pub mod schema;

// Show/hide rules
pub mod display;

// Regex / locator / filter extraction
pub mod extract;

// Path lookup, defaults and typed getters
pub mod resolver;

pub use resolver::{GetParameterOptions, ParameterResolver, PathSegment};
pub use schema::{
    DisplayOptions, ExtractValue, LocatorMode, NodeSpec, ParameterChoice, ParameterKind, ParameterSchema,
};

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("Invalid parameter path '{0}'")]
    InvalidPath(String),

    #[error("Could not get parameter '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("Parameter '{path}': {source}")]
    Filter { path: String, source: FilterError },

    #[error("Could not extract a value from parameter '{path}': {message}")]
    Extraction { path: String, message: String },

    #[error("Parameter '{path}' is a {actual}, expected a {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Parameter '{path}' has the wrong shape: {source}")]
    Conversion { path: String, source: ConversionError },
}

//! Core domain types and logic.

pub mod error;
pub mod expr;
pub mod expr_parser;
pub mod limits;
pub mod functions;
pub mod series;
pub mod window;
pub mod validator;
pub mod definition;
pub mod resolver;
pub mod evaluator;
pub mod fingerprint;
pub mod cache;
pub mod engine;
pub mod config_validation;

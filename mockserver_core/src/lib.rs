//! Core of a programmable HTTP mock server: compiles path templates into
//! regexes, matches incoming requests to a rule, resolves the rule's
//! declared variables, runs assertions, selects a response and renders its
//! body.
//!
//! The HTTP transport, admin CRUD endpoints, and configuration loading are
//! collaborators outside this crate (`§1`); this crate exposes the pure
//! `execute()` pipeline and the [`RuleRepository`] trait backends
//! implement.

pub mod assertion;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod model;
pub mod pattern;
pub mod pipeline;
pub mod random;
pub mod renderer;
pub mod repository;
pub mod request;
pub mod selector;
pub mod validator;

pub use error::Error;
pub use pipeline::{execute, CancellationToken, MockResponse};
pub use repository::{RuleRepository, RuleStore};
pub use request::MockRequest;

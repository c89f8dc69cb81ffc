//! Policy Agent: validates configuration documents against domain-grouped
//! Rego policies and answers cluster admission reviews.
//!
//! Policies live in a directory tree; the first directory under the root is
//! the domain (`kubernetes/`, `kafka/`, ...). The same validator backs the
//! CLI, the HTTP API, and the admission webhook. An optional generative
//! assistant drafts or repairs configurations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod document;
pub mod logging;
pub mod policy;
pub mod validator;

pub mod admission;
pub mod remediation;
pub mod server;

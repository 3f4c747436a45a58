//! A resolver context running queries on background workers.
//!
//! This crate provides the plumbing between applications asking DNS
//! questions and the machinery answering them. A [`Context`] collects
//! configuration, starts a number of workers when it is finalized, and then
//! hands out queries to them. Answers come back over a channel and are
//! delivered either to a caller blocked in [`Context::resolve`] or to the
//! callback given to [`Context::resolve_async`].
//!
//! The actual resolution is left to a [`ModuleStack`] supplied when the
//! context is created. Workers consult locally configured data first and
//! only ask the module stack if that doesn’t have an answer.
//!
//! # Modules
//!
//! * [context] contains the context itself,
//! * [config] its configuration,
//! * [question] and [answer] the data going in and coming out,
//! * [modules] the trait for the resolving pipeline,
//! * [channel], [queries], and [arena] the building blocks the context is
//!   made of.
//!
//! # Feature Flags
//!
//! * `logging` provides [`init_logging`](logging::init_logging) to set up
//!   a `tracing-subscriber` for the events reported by the crate.
#![cfg_attr(feature = "tokio", doc = "* `tokio` adds [`Context::lookup`]")]
#![cfg_attr(not(feature = "tokio"), doc = "* `tokio` adds `Context::lookup`")]
//!   resolving a question through a future.
//!
//! # Platforms
//!
//! The crate needs socket pairs and `fork`, so it only works on unix.
#![cfg(unix)]
#![allow(renamed_and_removed_lints)]
#![allow(clippy::unknown_clippy_lints)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod answer;
pub mod arena;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod local;
pub mod modules;
pub mod queries;
pub mod query;
pub mod question;

mod wire;
mod worker;

#[cfg(feature = "logging")]
pub mod logging;

pub use self::answer::Answer;
pub use self::config::{Config, LocalData, WorkerMode};
pub use self::context::{Context, Delivery};
pub use self::error::Error;
pub use self::modules::ModuleStack;
pub use self::queries::QueryId;
pub use self::query::{Callback, QueryResult};
pub use self::question::Question;

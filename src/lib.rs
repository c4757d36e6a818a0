#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::needless_pass_by_value,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

//! Slack on-call assistant.
//!
//! Mentions arrive through [`channels`], are turned into turns on a hosted
//! reasoning backend ([`assistant`]) by the dispatch loop in [`agent`], and
//! any capability the backend asks for is served from [`tools`].

pub mod agent;
pub mod assistant;
pub mod channels;
pub mod config;
pub mod tools;
pub mod util;

pub use config::Config;

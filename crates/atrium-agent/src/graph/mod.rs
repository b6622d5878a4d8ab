//! Orchestration graph: interface → collection → validation, with a
//! conditional edge back to collection while the retry budget lasts.
//!
//! Routing is a pure function of the record (`route::next_step`); the
//! executor only runs the stage that the route names and publishes events.

pub mod executor;
pub mod route;

pub use executor::{Collaborators, WorkflowGraph};
pub use route::{next_step, Step};

//! Extension hook system (spec.md §4.D), grounded in the teacher's
//! `middleware::{MiddlewareDriver, CompositeDriver}` — an "override only
//! what you need" async trait with one default no-op method per lifecycle
//! phase, run through a composite driver in registration/load order.

pub mod dispatcher;

pub use dispatcher::{
    BranchOutcome, ExtensionDispatcher, ExtensionHandler, LoadedExtension, SlashCommandDef,
    ToolCallBlock,
};

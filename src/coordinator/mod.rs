//! Submission facade and its ergonomics layers

pub mod builder;
pub mod core;
pub mod global;
pub mod section;

pub use builder::TaskBuilder;
pub use core::Coordinator;
pub use global::{builder, global, init_global, section, shutdown_global, AlreadyInitialized};
pub use section::Section;

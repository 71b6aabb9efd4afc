//! buckle-lib: an incremental build-rule dependency engine.
//!
//! This crate provides the core of the engine:
//! - `target`: build targets, flavors, and cells
//! - `graph`: the immutable target graph and the recursive traversals over it
//! - `rules`: build rules created on demand by a shared resolver, their rule keys
//!   and the action graph
//! - `multiarch` / `omnibus`: fat-binary and native-link root classification
//! - `build_info` / `execute`: persisted build metadata and incremental execution

pub mod build_info;
pub mod config;
pub mod consts;
pub mod description;
pub mod execute;
pub mod flavor_domain;
pub mod graph;
pub mod multiarch;
pub mod omnibus;
pub mod platform;
pub mod rules;
pub mod target;
pub mod util;

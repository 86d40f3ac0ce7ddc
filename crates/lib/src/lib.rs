//! gantry-lib: Core types and logic for Gantry
//!
//! This crate provides everything behind the `gantry` binary:
//! - `lexer` / `parser`: the indentation-scoped build description language
//! - `context`: one concurrent task per description, spawning and merging children
//! - `scanner`: transitive include scanning for incremental recompilation
//! - `exec`: the bounded worker pool running compile, archive and link processes
//! - `timestamp`: the persisted per-directory timestamp store
//! - `translator`: CMake project generation from parsed descriptions

pub mod config;
pub mod consts;
pub mod context;
pub mod exec;
pub mod fields;
pub mod finder;
pub mod lexer;
pub mod parser;
pub mod report;
pub mod scanner;
pub mod timestamp;
pub mod translator;

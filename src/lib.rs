// Copyright 2026 Cornell University
// released under MIT License

pub mod action;
pub mod backend;
pub mod circuit;
pub mod config;
pub mod diagnostic;
pub mod errors;
pub mod parser;
pub mod process;
pub mod relation;
pub mod report;
pub mod serialize;
pub mod session;
pub mod signal;
pub mod value;

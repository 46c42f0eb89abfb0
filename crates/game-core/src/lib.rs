//! Shared engine for the lorefire signalling game: board/coordinate model,
//! heuristic schema compiler, chat session + retry layer, the three agents,
//! and the per-turn orchestrator.
//!
//! This crate owns no I/O beyond the generation endpoint; the interactive
//! front-end lives in the runner binary.

pub mod agents;
pub mod board;
pub mod config;
pub mod game;
pub mod llm;
pub mod schema;
pub mod session;

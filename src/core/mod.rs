//! Core module - startup wiring and the two execution domains

mod engine;

pub use engine::Engine;

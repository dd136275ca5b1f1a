// EN: src/core/mod.rs

pub mod commons;
pub mod delegate;
pub mod history;
pub mod language;
pub mod loader;
pub mod probe;
pub mod script;
pub mod template;

//! # System Interaction Layer
//!
//! Boundary between the script engine and the operating system: process launching,
//! output draining, blocking and background supervision, and user configuration files.
//!
//! ## Modules
//!
//! - **`invoker`**: The [`invoker::ProcessInvoker`] seam. The default implementation spawns
//!   real processes with stdout and stderr merged into one pipe.
//! - **`pipe`**: Reader thread plus deadline/cancellation watch used to drain that pipe.
//! - **`executor`**: The blocking executor and the supervision routine both executors share.
//! - **`background`**: The non-blocking executor running one attempt at a time on a worker.
//! - **`notification`**: The bus that delivers background completion notifications.
//! - **`languages_config`**: Loading and generating `languages.toml`, which maps language
//!   names to interpreters.

pub mod background;
pub mod executor;
pub mod invoker;
pub mod languages_config;
pub mod notification;
pub mod pipe;

//! Sandbox runtime for the parsing engine.
//!
//! The engine is a WebAssembly module run by wasmtime. It reaches the host
//! only through its imports (WASI preview1 and a few emscripten `env`
//! functions) and the host reaches it only through its exports and linear
//! memory.
//!
//! ## Security Model
//!
//! - **Memory isolation**: the engine's heap is its own linear memory; host
//!   pointers never cross the boundary
//! - **Capability-based**: no filesystem or network; stdio and env only when granted
//! - **Bounded**: linear memory capped by the store limiter, CPU by optional fuel
//! - **Fail-stop**: a trap poisons the session instead of being retried
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sitter_sandbox::{SessionConfig, SitterRuntime};
//!
//! let runtime = SitterRuntime::new(SessionConfig::default())?;
//! let module = runtime.load_module("tree-sitter-rust.wasm")?;
//! let mut session = runtime.start_session(&module)?;
//! ```

mod config;
mod host_functions;
mod memory;
mod session;

pub use config::{SessionConfig, WasiCapabilities};
pub use host_functions::EmscriptenHostFunctions;
pub use memory::GuestBuffer;
pub use session::{GuestModule, HostState, Session, SitterRuntime};

#[cfg(test)]
mod tests;

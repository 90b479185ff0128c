//! Configuration for the guest runtime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SitterError};

/// WASI capability grants for the guest.
///
/// The parsing engine needs no filesystem or network access, so only stdio,
/// environment variables and arguments can be granted. Everything starts
/// disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasiCapabilities {
    /// Allow the guest to write to stdout
    pub stdout: bool,

    /// Allow the guest to write to stderr (engine assertions land here)
    pub stderr: bool,

    /// Environment variables to expose
    pub env_vars: Vec<(String, String)>,

    /// Command-line arguments to pass
    pub args: Vec<String>,
}

impl WasiCapabilities {
    /// Create capabilities with nothing allowed
    pub fn none() -> Self {
        Self::default()
    }

    /// Create capabilities with stdout and stderr inherited
    pub fn with_stdio() -> Self {
        Self {
            stdout: true,
            stderr: true,
            ..Default::default()
        }
    }

    /// Builder: enable stdout
    pub fn stdout(mut self, allow: bool) -> Self {
        self.stdout = allow;
        self
    }

    /// Builder: enable stderr
    pub fn stderr(mut self, allow: bool) -> Self {
        self.stderr = allow;
        self
    }

    /// Builder: add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Builder: add command-line argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Configuration for a guest runtime and the sessions it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// WASI capability configuration
    pub capabilities: WasiCapabilities,

    /// Maximum guest linear memory in bytes (default = 256MB)
    pub max_memory: usize,

    /// Total fuel granted to a session (None = unmetered)
    pub fuel_limit: Option<u64>,

    /// Cranelift optimization level (0-3)
    pub optimization_level: u8,

    /// Enable SIMD support
    pub enable_simd: bool,

    /// Cache compiled modules to disk using this wasmtime cache config
    pub cache_path: Option<PathBuf>,

    /// Timeout applied to every new parser, in microseconds
    pub parse_timeout_micros: Option<u64>,

    /// Provide the emscripten `env` functions the engine build imports
    pub emscripten_env: bool,

    /// Link a trapping stub for any import nothing else satisfies
    pub trap_unknown_imports: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capabilities: WasiCapabilities::none(),
            max_memory: 256 * 1024 * 1024, // 256 MB
            fuel_limit: None,
            optimization_level: 2,
            enable_simd: true,
            cache_path: None,
            parse_timeout_micros: None,
            emscripten_env: true,
            trap_unknown_imports: true,
        }
    }
}

impl SessionConfig {
    /// Create a minimal config for short-lived, metered sessions
    pub fn minimal() -> Self {
        Self {
            capabilities: WasiCapabilities::none(),
            max_memory: 64 * 1024 * 1024,    // 64 MB
            fuel_limit: Some(1_000_000_000), // 1B fuel units
            ..Default::default()
        }
    }

    /// Create config for development/debugging
    pub fn development() -> Self {
        Self {
            capabilities: WasiCapabilities::with_stdio(),
            optimization_level: 0, // Faster compilation
            ..Default::default()
        }
    }

    /// Parse a config from JSON. Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SitterError::ConfigError(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Check that the knobs are coherent.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory == 0 {
            return Err(SitterError::ConfigError(
                "max_memory must be non-zero".to_string(),
            ));
        }
        if self.optimization_level > 3 {
            return Err(SitterError::ConfigError(format!(
                "optimization_level must be 0-3, got {}",
                self.optimization_level
            )));
        }
        if self.fuel_limit == Some(0) {
            return Err(SitterError::ConfigError(
                "fuel_limit of 0 would trap on the first call".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder: set capabilities
    pub fn capabilities(mut self, caps: WasiCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: set fuel limit
    pub fn fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = Some(fuel);
        self
    }

    /// Builder: enable SIMD
    pub fn simd(mut self, enable: bool) -> Self {
        self.enable_simd = enable;
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(3);
        self
    }

    /// Builder: set cache path
    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Builder: set the default parse timeout
    pub fn parse_timeout_micros(mut self, micros: u64) -> Self {
        self.parse_timeout_micros = Some(micros);
        self
    }

    /// Builder: register emscripten `env` shims
    pub fn emscripten_env(mut self, enable: bool) -> Self {
        self.emscripten_env = enable;
        self
    }

    /// Builder: stub unknown imports with traps
    pub fn trap_unknown_imports(mut self, enable: bool) -> Self {
        self.trap_unknown_imports = enable;
        self
    }
}

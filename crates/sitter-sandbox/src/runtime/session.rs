//! Guest runtime and session implementation using wasmtime.
//!
//! A [`SitterRuntime`] owns the wasmtime engine and compiles engine modules.
//! Each [`Session`] is one instantiation of such a module with its own store,
//! linear memory and allocator state, plus the registry of guest resources
//! the host has acquired through it.

use super::config::{SessionConfig, WasiCapabilities};
use super::host_functions::EmscriptenHostFunctions;
use crate::error::{Result, SitterError};
use crate::registry::{next_session_id, Registry, Resource};

use std::path::Path;

use wasmtime::*;

/// Host state for the guest store.
pub struct HostState {
    #[cfg(feature = "wasi")]
    preview1: wasmtime_wasi::preview1::WasiP1Ctx,
    limits: StoreLimits,
}

impl HostState {
    /// Get the preview1 context.
    #[cfg(feature = "wasi")]
    fn preview1(&mut self) -> &mut wasmtime_wasi::preview1::WasiP1Ctx {
        &mut self.preview1
    }
}

/// Compiles engine modules and starts sessions on them.
pub struct SitterRuntime {
    engine: Engine,
    config: SessionConfig,
}

/// A compiled engine module.
pub struct GuestModule {
    module: Module,
    name: String,
}

/// Typed handles to the engine's function table, resolved once per session.
///
/// `Option` fields are exports older or trimmed engine builds may omit.
pub(crate) struct GuestExports {
    pub(crate) malloc: TypedFunc<u32, u32>,
    pub(crate) free: TypedFunc<u32, ()>,
    pub(crate) strlen: TypedFunc<u32, u32>,

    pub(crate) parser_new: TypedFunc<(), u32>,
    pub(crate) parser_delete: TypedFunc<u32, ()>,
    pub(crate) parser_set_language: TypedFunc<(u32, u32), u32>,
    pub(crate) parser_parse_string: TypedFunc<(u32, u32, u32, u32), u32>,
    pub(crate) parser_set_timeout_micros: Option<TypedFunc<(u32, u64), ()>>,

    pub(crate) language_version: TypedFunc<u32, u32>,
    pub(crate) language_name: Option<TypedFunc<u32, u32>>,

    pub(crate) tree_root_node: TypedFunc<(u32, u32), ()>,
    pub(crate) tree_delete: Option<TypedFunc<u32, ()>>,

    pub(crate) node_type: TypedFunc<u32, u32>,
    pub(crate) node_string: TypedFunc<u32, u32>,
    pub(crate) node_child: TypedFunc<(u32, u32, u32), ()>,
    pub(crate) node_child_count: TypedFunc<u32, u32>,
    pub(crate) node_named_child: TypedFunc<(u32, u32, u32), ()>,
    pub(crate) node_named_child_count: TypedFunc<u32, u32>,
    pub(crate) node_start_byte: TypedFunc<u32, u32>,
    pub(crate) node_end_byte: TypedFunc<u32, u32>,
    pub(crate) node_is_null: Option<TypedFunc<u32, u32>>,
    pub(crate) node_is_named: Option<TypedFunc<u32, u32>>,

    pub(crate) query_new: TypedFunc<(u32, u32, u32, u32, u32), u32>,
    pub(crate) query_delete: Option<TypedFunc<u32, ()>>,
    pub(crate) query_capture_name_for_id: TypedFunc<(u32, u32, u32), u32>,
    pub(crate) query_pattern_count: Option<TypedFunc<u32, u32>>,
    pub(crate) query_capture_count: Option<TypedFunc<u32, u32>>,

    pub(crate) query_cursor_new: TypedFunc<(), u32>,
    pub(crate) query_cursor_delete: Option<TypedFunc<u32, ()>>,
    pub(crate) query_cursor_exec: TypedFunc<(u32, u32, u32), ()>,
    pub(crate) query_cursor_next_match: TypedFunc<(u32, u32), u32>,
}

impl GuestExports {
    fn resolve(instance: &Instance, store: &mut Store<HostState>) -> Result<Self> {
        Ok(Self {
            malloc: required(instance, store, "malloc")?,
            free: required(instance, store, "free")?,
            strlen: required(instance, store, "strlen")?,

            parser_new: required(instance, store, "ts_parser_new")?,
            parser_delete: required(instance, store, "ts_parser_delete")?,
            parser_set_language: required(instance, store, "ts_parser_set_language")?,
            parser_parse_string: required(instance, store, "ts_parser_parse_string")?,
            parser_set_timeout_micros: optional(instance, store, "ts_parser_set_timeout_micros")?,

            language_version: required(instance, store, "ts_language_version")?,
            language_name: optional(instance, store, "ts_language_name")?,

            tree_root_node: required(instance, store, "ts_tree_root_node")?,
            tree_delete: optional(instance, store, "ts_tree_delete")?,

            node_type: required(instance, store, "ts_node_type")?,
            node_string: required(instance, store, "ts_node_string")?,
            node_child: required(instance, store, "ts_node_child")?,
            node_child_count: required(instance, store, "ts_node_child_count")?,
            node_named_child: required(instance, store, "ts_node_named_child")?,
            node_named_child_count: required(instance, store, "ts_node_named_child_count")?,
            node_start_byte: required(instance, store, "ts_node_start_byte")?,
            node_end_byte: required(instance, store, "ts_node_end_byte")?,
            node_is_null: optional(instance, store, "ts_node_is_null")?,
            node_is_named: optional(instance, store, "ts_node_is_named")?,

            query_new: required(instance, store, "ts_query_new")?,
            query_delete: optional(instance, store, "ts_query_delete")?,
            query_capture_name_for_id: required(instance, store, "ts_query_capture_name_for_id")?,
            query_pattern_count: optional(instance, store, "ts_query_pattern_count")?,
            query_capture_count: optional(instance, store, "ts_query_capture_count")?,

            query_cursor_new: required(instance, store, "ts_query_cursor_new")?,
            query_cursor_delete: optional(instance, store, "ts_query_cursor_delete")?,
            query_cursor_exec: required(instance, store, "ts_query_cursor_exec")?,
            query_cursor_next_match: required(instance, store, "ts_query_cursor_next_match")?,
        })
    }
}

/// Resolve an export the binding cannot work without.
fn required<P, R>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> Result<TypedFunc<P, R>>
where
    P: WasmParams,
    R: WasmResults,
{
    if instance.get_func(&mut *store, name).is_none() {
        return Err(SitterError::MissingExport(name.to_string()));
    }
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|e| {
            SitterError::WasmError(format!("export '{}' has the wrong signature: {}", name, e))
        })
}

/// Resolve an export that may be absent.
fn optional<P, R>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> Result<Option<TypedFunc<P, R>>>
where
    P: WasmParams,
    R: WasmResults,
{
    if instance.get_func(&mut *store, name).is_none() {
        tracing::debug!(export = name, "optional export not present");
        return Ok(None);
    }
    required(instance, store, name).map(Some)
}

/// Build the WASI preview1 context from capabilities.
#[cfg(feature = "wasi")]
fn build_preview1(caps: &WasiCapabilities) -> wasmtime_wasi::preview1::WasiP1Ctx {
    let mut builder = wasmtime_wasi::WasiCtxBuilder::new();

    // Configure stdio
    if caps.stdout {
        builder.inherit_stdout();
    }
    if caps.stderr {
        builder.inherit_stderr();
    }

    for (key, value) in &caps.env_vars {
        builder.env(key, value);
    }
    builder.args(&caps.args);

    builder.build_p1()
}

impl SitterRuntime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let mut engine_config = Config::new();

        // Configure optimization
        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            _ => OptLevel::Speed,
        });

        engine_config.wasm_simd(config.enable_simd);

        // Enable fuel metering if configured
        if config.fuel_limit.is_some() {
            engine_config.consume_fuel(true);
        }

        // Configure caching if path provided
        if let Some(ref cache_path) = config.cache_path {
            if let Err(e) = engine_config.cache_config_load(cache_path) {
                tracing::warn!("Failed to load cache config: {}", e);
            }
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| SitterError::WasmError(format!("engine creation failed: {}", e)))?;

        tracing::info!(
            opt_level = config.optimization_level,
            fuel = ?config.fuel_limit,
            "guest runtime ready"
        );
        Ok(Self { engine, config })
    }

    /// Load an engine module from a `.wasm` (or `.wat`) file.
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<GuestModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let module = Module::from_file(&self.engine, path)
            .map_err(|e| SitterError::WasmError(format!("module load failed: {}", e)))?;

        Ok(GuestModule { module, name })
    }

    /// Load an engine module from bytes (binary or text format).
    pub fn load_module_bytes(&self, name: &str, bytes: impl AsRef<[u8]>) -> Result<GuestModule> {
        let module = Module::new(&self.engine, bytes.as_ref())
            .map_err(|e| SitterError::WasmError(format!("module creation failed: {}", e)))?;

        Ok(GuestModule {
            module,
            name: name.to_string(),
        })
    }

    /// Instantiate a module into a fresh session.
    pub fn start_session(&self, module: &GuestModule) -> Result<Session> {
        let host_state = self.build_host_state(&self.config.capabilities);
        let mut store = Store::new(&self.engine, host_state);

        // Configure resource limits via the stored limiter
        store.limiter(|state| &mut state.limits);

        if let Some(fuel) = self.config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| SitterError::WasmError(format!("fuel setup failed: {}", e)))?;
        }

        let mut linker: Linker<HostState> = Linker::new(&self.engine);

        #[cfg(feature = "wasi")]
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state| state.preview1())
            .map_err(|e| SitterError::WasmError(format!("WASI link failed: {}", e)))?;

        if self.config.emscripten_env {
            EmscriptenHostFunctions::register(&mut linker)?;
        }

        if self.config.trap_unknown_imports {
            linker
                .define_unknown_imports_as_traps(&module.module)
                .map_err(|e| SitterError::WasmError(format!("import stubbing failed: {}", e)))?;
        }

        let instance = linker
            .instantiate(&mut store, &module.module)
            .map_err(|e| SitterError::WasmError(format!("instantiation failed: {}", e)))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| SitterError::MissingExport("memory".to_string()))?;

        let exports = GuestExports::resolve(&instance, &mut store)?;

        let id = next_session_id();
        tracing::info!(session = id, module = %module.name, "guest session started");

        Ok(Session {
            id,
            store,
            instance,
            memory,
            exports,
            registry: Registry::new(id),
            poisoned: None,
            parse_timeout_micros: self.config.parse_timeout_micros,
            closed: false,
        })
    }

    /// Build host state from capabilities.
    fn build_host_state(&self, caps: &WasiCapabilities) -> HostState {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .build();

        #[cfg(not(feature = "wasi"))]
        let _ = caps;

        HostState {
            #[cfg(feature = "wasi")]
            preview1: build_preview1(caps),
            limits,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl GuestModule {
    /// Get the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }
}

/// One instantiation of the engine module.
///
/// All handles ([`Parser`](crate::Parser), [`Tree`](crate::Tree), nodes,
/// [`Query`](crate::Query), [`QueryCursor`](crate::QueryCursor)) are only
/// meaningful for the session that created them and are passed back to it
/// explicitly. A session is single-threaded; run one per thread for
/// concurrent parsing.
///
/// Dropping a session releases every guest resource still registered. Use
/// [`Session::close`] to observe release failures.
pub struct Session {
    id: u64,
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    exports: GuestExports,
    pub(crate) registry: Registry,
    poisoned: Option<String>,
    pub(crate) parse_timeout_micros: Option<u64>,
    closed: bool,
}

impl Session {
    /// Compile `bytes` and start a session on it in one step.
    pub fn from_bytes(config: SessionConfig, bytes: impl AsRef<[u8]>) -> Result<Self> {
        let runtime = SitterRuntime::new(config)?;
        let module = runtime.load_module_bytes("engine", bytes)?;
        runtime.start_session(&module)
    }

    /// Process-unique id of this session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether a guest trap has invalidated this session.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Number of guest resources currently held by the host.
    pub fn live_resources(&self) -> usize {
        self.registry.len()
    }

    /// Get remaining fuel (if fuel metering enabled).
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    /// Release every guest resource and end the session.
    pub fn close(mut self) -> Result<()> {
        let result = self.teardown();
        self.closed = true;
        result
    }

    fn teardown(&mut self) -> Result<()> {
        let resources = self.registry.drain();
        if self.poisoned.is_some() {
            tracing::debug!(
                session = self.id,
                abandoned = resources.len(),
                "session poisoned, leaving guest resources to the store"
            );
            return Ok(());
        }

        tracing::debug!(session = self.id, released = resources.len(), "session teardown");
        let mut first_error = None;
        for resource in &resources {
            if let Err(e) = self.release_resource(resource) {
                tracing::warn!(
                    session = self.id,
                    resource = resource.kind(),
                    "release failed: {}",
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Call the guest function that frees `resource`.
    pub(crate) fn release_resource(&mut self, resource: &Resource) -> Result<()> {
        match *resource {
            Resource::Parser { address, .. } => {
                self.call("ts_parser_delete", |e| &e.parser_delete, address)
            }
            Resource::Tree { address } => {
                self.call_delete("ts_tree_delete", |e| e.tree_delete.as_ref(), address)
            }
            Resource::Node { address, .. } => self.call("free", |e| &e.free, address),
            Resource::Query { address } => {
                self.call_delete("ts_query_delete", |e| e.query_delete.as_ref(), address)
            }
            Resource::Cursor { address, .. } => self.call_delete(
                "ts_query_cursor_delete",
                |e| e.query_cursor_delete.as_ref(),
                address,
            ),
        }
    }

    /// Call an optional delete export. Without it the guest object stays in
    /// linear memory until the instance is dropped.
    pub(crate) fn call_delete(
        &mut self,
        export: &'static str,
        pick: fn(&GuestExports) -> Option<&TypedFunc<u32, ()>>,
        address: u32,
    ) -> Result<()> {
        if !self.has_export(pick) {
            tracing::debug!(
                session = self.id,
                export,
                address,
                "no delete export, leaving object to the instance"
            );
            return Ok(());
        }
        self.call_optional(export, pick, address)
    }

    /// Call a required export. A trap poisons the session.
    pub(crate) fn call<P, R>(
        &mut self,
        export: &'static str,
        pick: fn(&GuestExports) -> &TypedFunc<P, R>,
        params: P,
    ) -> Result<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        self.ensure_usable(export)?;
        let outcome = pick(&self.exports).call(&mut self.store, params);
        outcome.map_err(|e| self.poison(export, e))
    }

    /// Call an optional export, failing with `MissingExport` if the module lacks it.
    pub(crate) fn call_optional<P, R>(
        &mut self,
        export: &'static str,
        pick: fn(&GuestExports) -> Option<&TypedFunc<P, R>>,
        params: P,
    ) -> Result<R>
    where
        P: WasmParams,
        R: WasmResults,
    {
        self.ensure_usable(export)?;
        let func = pick(&self.exports)
            .ok_or_else(|| SitterError::MissingExport(export.to_string()))?;
        let outcome = func.call(&mut self.store, params);
        outcome.map_err(|e| self.poison(export, e))
    }

    /// Whether the module provides an optional export.
    pub(crate) fn has_export<P, R>(
        &self,
        pick: fn(&GuestExports) -> Option<&TypedFunc<P, R>>,
    ) -> bool
    where
        P: WasmParams,
        R: WasmResults,
    {
        pick(&self.exports).is_some()
    }

    /// Call a grammar entry point by export name.
    pub(crate) fn call_entry_point(&mut self, export: &str) -> Result<u32> {
        self.ensure_usable(export)?;
        if self.instance.get_func(&mut self.store, export).is_none() {
            return Err(SitterError::MissingExport(export.to_string()));
        }
        let entry = self
            .instance
            .get_typed_func::<(), u32>(&mut self.store, export)
            .map_err(|e| {
                SitterError::WasmError(format!(
                    "entry point '{}' has the wrong signature: {}",
                    export, e
                ))
            })?;
        let outcome = entry.call(&mut self.store, ());
        outcome.map_err(|e| self.poison(export, e))
    }

    pub(crate) fn ensure_usable(&self, export: &str) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(SitterError::GuestTrap {
                export: export.to_string(),
                message: format!("session poisoned by earlier trap: {}", reason),
            }),
            None => Ok(()),
        }
    }

    fn poison(&mut self, export: &str, error: wasmtime::Error) -> SitterError {
        let message = match error.downcast_ref::<Trap>() {
            Some(trap) => format!("{} ({:#})", trap, error),
            None => format!("{:#}", error),
        };
        tracing::error!(session = self.id, export, "guest trapped: {}", message);
        self.poisoned = Some(message.clone());
        SitterError::GuestTrap {
            export: export.to_string(),
            message,
        }
    }

    pub(crate) fn memory(&self) -> &Memory {
        &self.memory
    }

    pub(crate) fn store(&self) -> &Store<HostState> {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store<HostState> {
        &mut self.store
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.teardown() {
            tracing::warn!(session = self.id, "teardown on drop failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("live_resources", &self.registry.len())
            .field("poisoned", &self.poisoned.is_some())
            .finish()
    }
}

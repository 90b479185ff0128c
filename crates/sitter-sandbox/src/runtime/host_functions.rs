//! Emscripten host functions for the engine module.
//!
//! Engine builds produced by emscripten import a handful of functions from the
//! `env` namespace on top of WASI. This module provides the ones the engine
//! actually calls at runtime:
//!
//! ```wat
//! (import "env" "emscripten_notify_memory_growth" (func (param i32)))
//! (import "env" "emscripten_resize_heap" (func (param i32) (result i32)))
//! (import "env" "emscripten_memcpy_js" (func (param i32 i32 i32)))
//! ```
//!
//! Anything else the module imports is either linked from WASI or, when
//! `trap_unknown_imports` is set, replaced by a stub that traps if called.

use wasmtime::{Caller, Linker, Memory};

use super::session::HostState;
use crate::error::{Result, SitterError};

/// Size of one WebAssembly page.
const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// Emscripten `env` functions exposed to the guest.
pub struct EmscriptenHostFunctions;

impl EmscriptenHostFunctions {
    /// Register every shim with the wasmtime linker.
    pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
        Self::register_notify_memory_growth(linker)?;
        Self::register_resize_heap(linker)?;
        Self::register_memcpy(linker)?;
        Ok(())
    }

    fn register_notify_memory_growth(linker: &mut Linker<HostState>) -> Result<()> {
        linker
            .func_wrap(
                "env",
                "emscripten_notify_memory_growth",
                |_caller: Caller<'_, HostState>, memory_index: i32| {
                    tracing::trace!(memory_index, "guest memory grew");
                },
            )
            .map_err(|e| {
                SitterError::WasmError(format!(
                    "failed to register emscripten_notify_memory_growth: {}",
                    e
                ))
            })?;
        Ok(())
    }

    fn register_resize_heap(linker: &mut Linker<HostState>) -> Result<()> {
        linker
            .func_wrap(
                "env",
                "emscripten_resize_heap",
                |mut caller: Caller<'_, HostState>, requested: i32| -> wasmtime::Result<i32> {
                    let memory = get_memory(&mut caller)?;
                    let requested = requested as u32 as u64;
                    let current = memory.data_size(&caller) as u64;
                    if requested <= current {
                        return Ok(1);
                    }

                    let pages = (requested - current).div_ceil(WASM_PAGE_SIZE);
                    match memory.grow(&mut caller, pages) {
                        Ok(_) => Ok(1),
                        Err(e) => {
                            // The store limiter refused; malloc reports NULL to the engine.
                            tracing::debug!(requested, "heap resize refused: {}", e);
                            Ok(0)
                        }
                    }
                },
            )
            .map_err(|e| {
                SitterError::WasmError(format!(
                    "failed to register emscripten_resize_heap: {}",
                    e
                ))
            })?;
        Ok(())
    }

    fn register_memcpy(linker: &mut Linker<HostState>) -> Result<()> {
        linker
            .func_wrap(
                "env",
                "emscripten_memcpy_js",
                |mut caller: Caller<'_, HostState>,
                 dest: i32,
                 src: i32,
                 len: i32|
                 -> wasmtime::Result<()> {
                    let memory = get_memory(&mut caller)?;
                    copy_within(&memory, &mut caller, dest as u32, src as u32, len as u32)?;
                    Ok(())
                },
            )
            .map_err(|e| {
                SitterError::WasmError(format!(
                    "failed to register emscripten_memcpy_js: {}",
                    e
                ))
            })?;
        Ok(())
    }
}

// ============================================================================
// Memory Helpers
// ============================================================================

/// Get the memory export from the caller.
fn get_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| SitterError::MissingExport("memory".to_string()))
}

/// Copy `len` bytes inside guest memory, handling overlap like `memmove`.
fn copy_within(
    memory: &Memory,
    caller: &mut Caller<'_, HostState>,
    dest: u32,
    src: u32,
    len: u32,
) -> Result<()> {
    let data = memory.data_mut(caller);
    let memory_size = data.len();
    let in_bounds = |address: u32| address as usize + len as usize <= memory_size;

    for address in [src, dest] {
        if !in_bounds(address) {
            return Err(SitterError::OutOfBounds {
                address,
                len: len as u64,
                memory_size,
            });
        }
    }

    let src = src as usize;
    data.copy_within(src..src + len as usize, dest as usize);
    Ok(())
}

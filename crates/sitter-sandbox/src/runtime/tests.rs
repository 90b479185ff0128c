//! Tests for the guest runtime and transfer layer.

use super::*;
use crate::error::SitterError;
use crate::handles::{Node, NodeHandle};

const MOCK_ENGINE: &str = include_str!("../../tests/fixtures/mock_treesitter.wat");

fn mock_session() -> Session {
    Session::from_bytes(SessionConfig::default(), MOCK_ENGINE).expect("mock engine should start")
}

/// The mock engine with its tree, query and cursor delete exports removed.
fn engine_without_deletes() -> String {
    ["ts_tree_delete", "ts_query_delete", "ts_query_cursor_delete"]
        .iter()
        .fold(MOCK_ENGINE.to_string(), |wat, name| {
            wat.replace(&format!("(export \"{}\") ", name), "")
        })
}

/// Number of `free` calls the mock engine has seen.
fn guest_frees(session: &mut Session) -> u32 {
    session.call_entry_point("mock_frees").unwrap()
}

#[test]
fn test_session_config_default() {
    let config = SessionConfig::default();
    assert_eq!(config.max_memory, 256 * 1024 * 1024);
    assert!(config.enable_simd);
    assert!(config.fuel_limit.is_none());
    assert!(config.emscripten_env);
    assert!(config.trap_unknown_imports);
    assert_eq!(config.parse_timeout_micros, None);
}

#[test]
fn test_session_config_minimal() {
    let config = SessionConfig::minimal();
    assert_eq!(config.max_memory, 64 * 1024 * 1024);
    assert!(config.fuel_limit.is_some());
    assert_eq!(config.capabilities, WasiCapabilities::none());
}

#[test]
fn test_session_config_development() {
    let config = SessionConfig::development();
    assert_eq!(config.optimization_level, 0);
    assert!(config.capabilities.stdout);
    assert!(config.capabilities.stderr);
}

#[test]
fn test_wasi_capabilities_builder() {
    let caps = WasiCapabilities::none()
        .stdout(true)
        .stderr(true)
        .env("TS_LOG", "1")
        .arg("--verbose");

    assert!(caps.stdout);
    assert!(caps.stderr);
    assert_eq!(caps.env_vars, vec![("TS_LOG".to_string(), "1".to_string())]);
    assert_eq!(caps.args.len(), 1);
}

#[test]
fn test_session_config_builder_chain() {
    let config = SessionConfig::default()
        .max_memory(128 * 1024 * 1024)
        .fuel_limit(500_000_000)
        .simd(false)
        .optimize(7)
        .parse_timeout_micros(250)
        .emscripten_env(false);

    assert_eq!(config.max_memory, 128 * 1024 * 1024);
    assert_eq!(config.fuel_limit, Some(500_000_000));
    assert!(!config.enable_simd);
    assert_eq!(config.optimization_level, 3);
    assert_eq!(config.parse_timeout_micros, Some(250));
    assert!(!config.emscripten_env);
}

#[test]
fn test_session_config_from_json_fills_defaults() {
    let config =
        SessionConfig::from_json(r#"{"fuel_limit": 1000, "capabilities": {"stderr": true}}"#)
            .unwrap();
    assert_eq!(config.fuel_limit, Some(1000));
    assert!(config.capabilities.stderr);
    assert!(!config.capabilities.stdout);
    assert_eq!(config.max_memory, SessionConfig::default().max_memory);
}

#[test]
fn test_session_config_json_round_trip() {
    let config = SessionConfig::minimal().parse_timeout_micros(10);
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(SessionConfig::from_json(&json).unwrap(), config);
}

#[test]
fn test_session_config_rejects_bad_values() {
    assert!(matches!(
        SessionConfig::from_json(r#"{"optimization_level": 9}"#),
        Err(SitterError::ConfigError(_))
    ));
    assert!(matches!(
        SessionConfig::default().max_memory(0).validate(),
        Err(SitterError::ConfigError(_))
    ));
    assert!(SessionConfig::default().fuel_limit(0).validate().is_err());
    assert!(matches!(
        SessionConfig::from_json("not json"),
        Err(SitterError::ConfigError(_))
    ));
}

#[test]
fn test_session_config_load_missing_file() {
    assert!(matches!(
        SessionConfig::load("/nonexistent/sitter.json"),
        Err(SitterError::Io(_))
    ));
}

#[test]
fn test_runtime_creation() {
    let runtime = SitterRuntime::new(SessionConfig::default());
    assert!(runtime.is_ok());
}

#[test]
fn test_runtime_rejects_invalid_config() {
    assert!(SitterRuntime::new(SessionConfig::default().max_memory(0)).is_err());
}

#[test]
fn test_sessions_get_distinct_ids() {
    let runtime = SitterRuntime::new(SessionConfig::default()).unwrap();
    let module = runtime.load_module_bytes("mock", MOCK_ENGINE).unwrap();
    let first = runtime.start_session(&module).unwrap();
    let second = runtime.start_session(&module).unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(first.live_resources(), 0);
}

#[test]
fn test_module_missing_required_export() {
    let wat = r#"(module (memory (export "memory") 1))"#;
    let err = Session::from_bytes(SessionConfig::default(), wat).unwrap_err();
    assert!(matches!(err, SitterError::MissingExport(name) if name == "malloc"));
}

#[test]
fn test_string_round_trip() {
    let mut session = mock_session();
    for text in ["", "program", "héllo wörld", "(a (b))\n@x"] {
        let buffer = session.write_string(text).unwrap();
        assert_eq!(buffer.len() as usize, text.len() + 1);
        assert_eq!(session.read_c_string(buffer.address()).unwrap(), text);
        session.release(buffer).unwrap();
    }
}

#[test]
fn test_read_integers_little_endian() {
    let mut session = mock_session();
    let buffer = session.write_buffer(&[0x07, 0x00, 0x02, 0x00, 0x78, 0x56, 0x34, 0x12]).unwrap();
    let address = buffer.address();
    assert_eq!(session.read_u32_le(address).unwrap(), 0x0002_0007);
    assert_eq!(session.read_u16_le(address + 2).unwrap(), 2);
    assert_eq!(session.read_u32_le(address + 4).unwrap(), 0x1234_5678);
    assert_eq!(session.read_bytes(address, 2).unwrap(), vec![0x07, 0x00]);
    session.release(buffer).unwrap();
}

#[test]
fn test_out_of_bounds_access() {
    let mut session = mock_session();
    let size = session.memory_size() as u32;

    assert!(matches!(
        session.write_bytes(size - 2, &[1, 2, 3, 4]),
        Err(SitterError::OutOfBounds { len: 4, .. })
    ));
    assert!(matches!(
        session.read_bytes(size, 1),
        Err(SitterError::OutOfBounds { .. })
    ));
    assert!(session.read_u32_le(u32::MAX - 1).is_err());
}

#[test]
fn test_allocation_failure() {
    let mut session = mock_session();
    assert!(matches!(
        session.allocate(0x0200_0000),
        Err(SitterError::AllocationFailure { requested: 0x0200_0000 })
    ));
}

#[test]
fn test_allocation_grows_memory() {
    let mut session = mock_session();
    let before = session.memory_size();
    let buffer = session.allocate(300_000).unwrap();
    assert!(session.memory_size() > before);
    session.write_bytes(buffer.address() + 299_999, &[1]).unwrap();
    session.release(buffer).unwrap();
}

#[test]
fn test_zero_length_allocation_is_usable() {
    let mut session = mock_session();
    let buffer = session.allocate(0).unwrap();
    assert!(buffer.is_empty());
    assert_ne!(buffer.address(), 0);
    session.release(buffer).unwrap();
}

#[test]
fn test_scratch_released_after_error_body() {
    let mut session = mock_session();
    let before = guest_frees(&mut session);

    let buffer = session.write_string("scratch").unwrap();
    let result: crate::Result<()> = session.with_scratch(buffer, |session, address| {
        // still readable while the error is built
        let text = session.read_c_string(address)?;
        Err(SitterError::ConfigError(text))
    });

    assert!(matches!(result, Err(SitterError::ConfigError(text)) if text == "scratch"));
    assert_eq!(guest_frees(&mut session), before + 1);
}

#[test]
fn test_node_string_is_freed_after_read() {
    let mut session = mock_session();
    let language = session.language("mock").unwrap();
    let parser = session.new_parser().unwrap();
    parser.set_language(&mut session, &language).unwrap();
    let tree = parser.parse(&mut session, "a = 1;\nb;").unwrap();
    let root = tree.root_node(&mut session).unwrap();

    let before = guest_frees(&mut session);
    let sexp = root.to_sexp(&mut session).unwrap();
    assert_eq!(sexp, "(program (statement (identifier)) (statement))");
    assert_eq!(guest_frees(&mut session), before + 1);
}

#[test]
fn test_close_releases_in_dependency_order() {
    let mut session = mock_session();
    let language = session.language("mock").unwrap();
    let parser = session.new_parser().unwrap();
    parser.set_language(&mut session, &language).unwrap();
    let tree = parser.parse(&mut session, "a = 1;").unwrap();
    let root = tree.root_node(&mut session).unwrap();
    let query = session.query(&language, "(statement) @stmt").unwrap();
    let cursor = session.new_query_cursor().unwrap();
    cursor.exec(&mut session, &query, &root).unwrap();

    assert_eq!(session.live_resources(), 5);
    let before = guest_frees(&mut session);
    let resources = session.registry.drain();
    let kinds: Vec<&str> = resources.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, ["query cursor", "query", "node", "tree", "parser"]);
    for resource in &resources {
        session.release_resource(resource).unwrap();
    }
    assert_eq!(guest_frees(&mut session), before + 5);
    session.close().unwrap();
}

#[test]
fn test_poisoned_session_refuses_calls() {
    let mut session = mock_session();
    let err = session.language("trap").unwrap_err();
    assert!(err.is_fatal());
    assert!(session.is_poisoned());

    assert!(matches!(session.new_parser(), Err(SitterError::GuestTrap { .. })));
    assert!(matches!(session.allocate(8), Err(SitterError::GuestTrap { .. })));
    assert!(session.close().is_ok());
}

#[test]
fn test_engine_without_delete_exports() {
    let mut session = Session::from_bytes(SessionConfig::default(), engine_without_deletes())
        .expect("delete exports are optional");
    let language = session.language("mock").unwrap();
    let parser = session.new_parser().unwrap();
    parser.set_language(&mut session, &language).unwrap();
    let tree = parser.parse(&mut session, "a = 1;").unwrap();
    let root = tree.root_node(&mut session).unwrap();
    let query = session.query(&language, "(statement) @stmt").unwrap();
    let cursor = session.new_query_cursor().unwrap();
    cursor.exec(&mut session, &query, &root).unwrap();
    assert!(cursor.next_match(&mut session).unwrap().is_some());
    root.release(&mut session).unwrap();

    // releases drop the handles without calling into the guest
    let before = guest_frees(&mut session);
    cursor.release(&mut session).unwrap();
    query.release(&mut session).unwrap();
    tree.release(&mut session).unwrap();
    assert_eq!(guest_frees(&mut session), before);
    assert_eq!(session.live_resources(), 1);

    session.close().unwrap();
}

#[test]
fn test_discarding_borrowed_node_is_noop() {
    let mut session = mock_session();
    let language = session.language("mock").unwrap();
    let parser = session.new_parser().unwrap();
    parser.set_language(&mut session, &language).unwrap();
    let tree = parser.parse(&mut session, "a = 1;\nb;").unwrap();
    let root = tree.root_node(&mut session).unwrap();
    let query = session.query(&language, "(statement) @stmt").unwrap();
    let cursor = session.new_query_cursor().unwrap();
    cursor.exec(&mut session, &query, &root).unwrap();
    let current = cursor.next_match(&mut session).unwrap().expect("first match");

    let live = session.live_resources();
    let before = guest_frees(&mut session);
    let node = Node::from(current.captures[0].node);
    assert!(!node.is_owned());
    node.discard(&mut session).unwrap();

    assert_eq!(session.live_resources(), live);
    assert_eq!(guest_frees(&mut session), before);
    assert_eq!(current.captures[0].node.kind(&mut session).unwrap(), "statement");
}

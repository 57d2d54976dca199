//! Registry loading against the echo-mcp fixture

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;
use toolhost::registry::{result_text, RegistryError, ToolServerRegistry};

const ECHO_MCP: &str = env!("CARGO_BIN_EXE_echo-mcp");

/// `<tmp>/project/examples/app/mcp.json`, so the project root is `<tmp>/project`
struct Fixture {
    _tmp: TempDir,
    project: PathBuf,
    registry: PathBuf,
}

impl Fixture {
    fn new(servers: serde_json::Value) -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let project = tmp.path().join("project");
        let app = project.join("examples").join("app");
        fs::create_dir_all(&app).unwrap();

        let registry = app.join("mcp.json");
        fs::write(&registry, json!({ "mcpServers": servers }).to_string()).unwrap();

        Self {
            _tmp: tmp,
            project,
            registry,
        }
    }

    fn registry(&self) -> ToolServerRegistry {
        ToolServerRegistry::new(&self.registry)
    }

    fn app_dir(&self) -> &Path {
        self.registry.parent().unwrap()
    }
}

#[tokio::test]
async fn test_load_and_call_echo() {
    let fx = Fixture::new(json!({ "echo": { "command": ECHO_MCP } }));

    let mut handle = fx.registry().load("echo", None).await.unwrap();
    assert_eq!(handle.name(), "echo");
    assert!(handle.pid().is_some());

    let tools = handle.tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"echo"));
    assert!(names.contains(&"env_var"));
    assert!(tools.iter().all(|t| t.server == "echo"));

    let result = handle
        .call_tool("echo", Some(json!({ "text": "round trip" })))
        .await
        .unwrap();
    assert_eq!(result_text(&result), "round trip");

    handle.close().await;
    assert!(matches!(
        handle.call_tool("echo", Some(json!({ "text": "x" }))).await,
        Err(RegistryError::Closed(_))
    ));
}

#[tokio::test]
async fn test_paginated_tool_list_is_complete() {
    let fx = Fixture::new(json!({
        "paged": { "command": ECHO_MCP, "env": { "ECHO_MCP_PAGE_SIZE": "1" } },
        "whole": { "command": ECHO_MCP }
    }));
    let registry = fx.registry();

    let mut paged = registry.load("paged", None).await.unwrap();
    let mut whole = registry.load("whole", None).await.unwrap();

    let paged_names: Vec<String> = paged.tools().await.unwrap().into_iter().map(|t| t.name).collect();
    let whole_names: Vec<String> = whole.tools().await.unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(paged_names.len(), 3);
    assert_eq!(paged_names, whole_names);

    // Tools from a later page are callable too
    let last = paged_names.last().unwrap().clone();
    assert!(paged.call_tool(&last, Some(json!({ "text": "x", "name": "PATH" }))).await.is_ok());

    paged.close().await;
    whole.close().await;
}

#[tokio::test]
async fn test_env_overlay_reaches_subprocess() {
    let fx = Fixture::new(json!({
        "echo": {
            "command": ECHO_MCP,
            "env": {
                "TOOLHOST_GREETING": "hola",
                "TOOLHOST_NESTED": "${TOOLHOST_GREETING_UNSET_XYZ:-fallback}"
            }
        }
    }));

    let mut handle = fx.registry().load("echo", None).await.unwrap();

    let greeting = handle
        .call_tool("env_var", Some(json!({ "name": "TOOLHOST_GREETING" })))
        .await
        .unwrap();
    assert_eq!(result_text(&greeting), "hola");

    let nested = handle
        .call_tool("env_var", Some(json!({ "name": "TOOLHOST_NESTED" })))
        .await
        .unwrap();
    assert_eq!(result_text(&nested), "fallback");

    // Inherited from this process
    if let Ok(path) = std::env::var("PATH") {
        let inherited = handle
            .call_tool("env_var", Some(json!({ "name": "PATH" })))
            .await
            .unwrap();
        assert_eq!(result_text(&inherited), path);
    }

    // The overlay never touches our own environment
    assert!(std::env::var_os("TOOLHOST_GREETING").is_none());
    handle.close().await;
}

#[tokio::test]
async fn test_tool_filter() {
    let fx = Fixture::new(json!({ "echo": { "command": ECHO_MCP } }));

    let mut handle = fx.registry().load("echo", Some(&["echo"])).await.unwrap();
    let tools = handle.tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    assert!(matches!(
        handle.call_tool("env_var", Some(json!({ "name": "PATH" }))).await,
        Err(RegistryError::ToolNotExposed { tool, .. }) if tool == "env_var"
    ));
    handle.close().await;
}

#[tokio::test]
async fn test_unknown_tool_fails_at_invocation() {
    let fx = Fixture::new(json!({ "echo": { "command": ECHO_MCP } }));

    let mut handle = fx.registry().load("echo", None).await.unwrap();
    let result = handle.call_tool("does_not_exist", None).await;
    assert!(matches!(result, Err(RegistryError::ToolCall { .. })));
    handle.close().await;
}

#[tokio::test]
async fn test_path_args_and_cwd_resolved() {
    let fx = Fixture::new(json!({
        "echo": {
            "command": ECHO_MCP,
            "args": ["mcp_servers/tool/server.py", "--flag", "local.sh"],
            "cwd": "work"
        }
    }));
    let script = fx.project.join("mcp_servers").join("tool").join("server.py");
    fs::create_dir_all(script.parent().unwrap()).unwrap();
    fs::write(&script, "").unwrap();
    fs::write(fx.app_dir().join("local.sh"), "").unwrap();
    fs::create_dir_all(fx.app_dir().join("work")).unwrap();

    let mut handle = fx.registry().load("echo", None).await.unwrap();
    let launch = handle.launch().clone();
    assert_eq!(PathBuf::from(&launch.args[0]), script);
    assert_eq!(launch.args[1], "--flag");
    assert_eq!(PathBuf::from(&launch.args[2]), fx.app_dir().join("local.sh"));

    let report = handle.call_tool("whoami", None).await.unwrap();
    let report: serde_json::Value = serde_json::from_str(&result_text(&report)).unwrap();
    let cwd = PathBuf::from(report["cwd"].as_str().unwrap());
    assert_eq!(
        cwd.canonicalize().unwrap(),
        fx.app_dir().join("work").canonicalize().unwrap()
    );
    assert_eq!(report["args"][0], json!(script.to_string_lossy()));
    handle.close().await;
}

#[tokio::test]
async fn test_load_all_skips_disabled_and_failures() {
    let fx = Fixture::new(json!({
        "first": { "command": ECHO_MCP },
        "broken": { "command": "/nonexistent/toolhost-no-such-server" },
        "off": { "command": ECHO_MCP, "disabled": true },
        "second": { "command": ECHO_MCP, "args": ["--second"] }
    }));

    let mut handles = fx.registry().load_all().await;
    let names: Vec<&str> = handles.iter().map(|h| h.name()).collect();
    assert_eq!(names, vec!["first", "second"]);

    for handle in handles.iter_mut() {
        assert!(!handle.tools().await.unwrap().is_empty());
        handle.close().await;
    }
}

#[tokio::test]
async fn test_single_load_fails_loud() {
    let fx = Fixture::new(json!({
        "broken": { "command": "/nonexistent/toolhost-no-such-server" }
    }));
    let registry = fx.registry();

    assert!(matches!(
        registry.load("broken", None).await,
        Err(RegistryError::SpawnFailure { .. })
    ));
    assert!(matches!(
        registry.load("absent", None).await,
        Err(RegistryError::ServerNotFound(name)) if name == "absent"
    ));

    let missing = ToolServerRegistry::new(fx.app_dir().join("missing.json"));
    assert!(matches!(
        missing.load("broken", None).await,
        Err(RegistryError::ConfigNotFound(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_plain_command_loads_but_fails_handshake() {
    let fx = Fixture::new(json!({ "search": { "command": "echo", "args": ["hi"] } }));

    let spec = fx.registry().prepare("search").unwrap();
    assert_eq!(spec.command, "echo");
    assert_eq!(spec.args, vec!["hi"]);

    let mut handle = fx.registry().load("search", None).await.unwrap();
    assert_eq!(handle.name(), "search");
    assert!(matches!(
        handle.tools().await,
        Err(RegistryError::Handshake { .. } | RegistryError::StartupTimeout { .. })
    ));
}

#[tokio::test]
async fn test_registry_edits_take_effect() {
    let fx = Fixture::new(json!({ "a": { "command": ECHO_MCP } }));
    let registry = fx.registry();
    assert!(registry.prepare("b").is_err());

    fs::write(
        &fx.registry,
        json!({ "mcpServers": { "b": { "command": ECHO_MCP } } }).to_string(),
    )
    .unwrap();
    assert!(registry.prepare("b").is_ok());
    assert!(matches!(
        registry.prepare("a"),
        Err(RegistryError::ServerNotFound(_))
    ));
}

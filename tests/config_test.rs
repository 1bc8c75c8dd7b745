use persona::config::PersonaConfig;
use tempfile::TempDir;

#[test]
fn partial_toml_keeps_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[agent]
user_id = "ada"
enable_notion = true

[memory]
search_limit = 12

[[mcp.servers]]
name = "filesystem"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
"#,
    )
    .unwrap();

    let config = PersonaConfig::load_from(&path).unwrap();
    assert_eq!(config.agent.user_id, "ada");
    assert!(config.agent.enable_notion);
    assert!(config.agent.enable_a2a);
    assert_eq!(config.memory.search_limit, 12);
    assert_eq!(config.memory.consolidation_hours, 24);
    assert_eq!(config.server.transport, "stdio");
    assert_eq!(config.mcp.servers.len(), 1);
    assert_eq!(config.mcp.servers[0].args.len(), 3);
}

#[test]
fn missing_file_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let config = PersonaConfig::load_from(tmp.path().join("absent.toml")).unwrap();
    assert_eq!(config.store.backend, "local");
    assert_eq!(config.notion.history_size, 10);
}

#[test]
fn invalid_toml_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[agent\nuser_id = 1").unwrap();
    assert!(PersonaConfig::load_from(&path).is_err());
}

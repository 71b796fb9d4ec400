// SPDX-License-Identifier: MIT

use super::*;

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert!(cfg.jobs.is_none());
    assert!(!cfg.httpd.disable);
    assert!(cfg.elog.is_empty());
}

#[test]
fn full_config_parses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clockwork.toml");
    std::fs::write(
        &path,
        r#"
jobs = "file:%l/norm.jobs"

[httpd]
interface = "127.0.0.1"
port = 9000
disable = true

[elog]
above = "warning stderr:"

[route.sqlrs]
repository = "https://repo.example/put"
cookies = "file:/tmp/jar"
"#,
    )
    .unwrap();

    let cfg = Config::load(&path).unwrap();
    assert_eq!(cfg.jobs.as_deref(), Some("file:%l/norm.jobs"));
    assert_eq!(cfg.httpd.interface.as_deref(), Some("127.0.0.1"));
    assert_eq!(cfg.httpd.port, Some(9000));
    assert!(cfg.httpd.disable);
    assert_eq!(
        cfg.route.sqlrs.get("repository").map(String::as_str),
        Some("https://repo.example/put")
    );
}

#[test]
fn broken_toml_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "jobs = [unbalanced").unwrap();
    assert!(matches!(
        Config::load(&path),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn flatten_lists_dotted_directives() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.toml");
    std::fs::write(
        &path,
        "jobs = \"file:/t.jobs\"\n[httpd]\nport = 8096\n[elog]\nall = \"none:\"\n",
    )
    .unwrap();
    let cfg = Config::load(&path).unwrap();

    let flat = cfg.flatten();
    assert!(flat.contains(&("jobs".to_string(), "file:/t.jobs".to_string())));
    assert!(flat.contains(&("httpd.port".to_string(), "8096".to_string())));
    assert!(flat.contains(&("elog.all".to_string(), "none:".to_string())));
}

#[test]
fn elog_table_falls_back_to_stderr() {
    let cfg = Config::default();
    let table = cfg.elog_table();
    assert_eq!(table.len(), 6);
    assert!(table.iter().all(|(_, route)| route == "stderr:"));
    assert_eq!(table[0].0, "diag");
    assert_eq!(table[5].0, "die");
}

#[test]
fn elog_above_routes_high_severities() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.toml");
    std::fs::write(
        &path,
        "[elog]\nall = \"none:\"\nabove = \"warning filea:/var/log/cw\"\n",
    )
    .unwrap();
    let cfg = Config::load(&path).unwrap();

    let table = cfg.elog_table();
    let route_of = |name: &str| {
        table
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r.clone())
            .unwrap()
    };
    assert_eq!(route_of("info"), "none:");
    assert_eq!(route_of("warning"), "filea:/var/log/cw");
    assert_eq!(route_of("die"), "filea:/var/log/cw");
}

#[test]
fn bad_elog_above_severity_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.toml");
    std::fs::write(&path, "[elog]\nabove = \"loud stderr:\"\n").unwrap();
    let cfg = Config::load(&path).unwrap();
    // The broken directive is dropped; everything falls back.
    assert!(cfg.elog_table().iter().all(|(_, r)| r == "stderr:"));
}

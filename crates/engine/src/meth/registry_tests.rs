// SPDX-License-Identifier: MIT

use super::*;
use cw_route::Route;

struct Noop;

impl SourceMethod for Noop {
    fn action(&mut self, _command: &str, _res: &mut dyn Route, _err: &mut dyn Route) -> i32 {
        0
    }
}

#[test]
fn register_check_lookup() {
    let mut reg = Registry::new();
    assert!(!reg.check("echo"));

    reg.register(Method::fork("echo", "echo a line", |c| {
        let mut cmd = std::process::Command::new("echo");
        cmd.arg(c.to_string());
        cmd
    }))
    .unwrap();

    assert!(reg.check("echo"));
    let method = reg.lookup("echo").unwrap();
    assert_eq!(method.kind, MethodKind::Fork);
    assert!(reg.lookup("missing").is_none());
}

#[test]
fn thread_methods_are_rejected() {
    let mut reg = Registry::new();
    let m = Method {
        name: "threaded".into(),
        info: "nope".into(),
        kind: MethodKind::Thread,
        pre_action: None,
        runner: Runner::None,
    };
    assert!(matches!(reg.register(m), Err(MethError::ThreadKind(_))));
    assert!(!reg.check("threaded"));
}

#[test]
fn reregistration_replaces() {
    let mut reg = Registry::new();
    reg.register(Method::none("m", "first")).unwrap();
    reg.register(Method::source("m", "second", || Box::new(Noop)))
        .unwrap();

    assert_eq!(reg.len(), 1);
    let m = reg.lookup("m").unwrap();
    assert_eq!(m.info, "second");
    assert_eq!(m.kind, MethodKind::Source);
}

#[test]
fn describe_is_sorted() {
    let mut reg = Registry::new();
    reg.register(Method::none("zeta", "z")).unwrap();
    reg.register(Method::none("alpha", "a")).unwrap();
    let names: Vec<String> = reg.describe().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["alpha", "zeta"]);
}

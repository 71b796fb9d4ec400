// SPDX-License-Identifier: MIT

use super::*;
use crate::meth::{MethodKind, Registry};
use tokio::sync::mpsc;

fn cx(dir: &std::path::Path) -> (BuiltinCx, mpsc::UnboundedReceiver<ShutdownKind>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        BuiltinCx {
            router: Arc::new(Router::new(dir.to_path_buf(), "h")),
            spool: EventSpool::new(),
            shutdown: ShutdownHandle { tx },
        },
        rx,
    )
}

#[test]
fn all_builtins_register() {
    let dir = tempfile::tempdir().unwrap();
    let (cx, _rx) = cx(dir.path());
    let mut reg = Registry::new();
    register(&mut reg, &cx);

    for name in ["exec", "sh", "tstamp", "sample", "event", "shutdown", "restart"] {
        assert!(reg.check(name), "missing builtin {name}");
    }
    assert_eq!(reg.lookup("exec").unwrap().kind, MethodKind::Fork);
    assert_eq!(reg.lookup("tstamp").unwrap().kind, MethodKind::Source);
}

#[test]
fn exec_splits_argv_and_sh_wraps() {
    let cmd = exec_command("uptime -p");
    assert_eq!(cmd.get_program(), "uptime");
    let args: Vec<_> = cmd.get_args().collect();
    assert_eq!(args, ["-p"]);

    let cmd = sh_command("echo a | wc -c");
    assert_eq!(cmd.get_program(), "sh");
    let args: Vec<_> = cmd.get_args().collect();
    assert_eq!(args, ["-c", "echo a | wc -c"]);
}

#[test]
fn tstamp_writes_an_epoch_line() {
    let dir = tempfile::tempdir().unwrap();
    let router = Router::new(dir.path().to_path_buf(), "h");
    let path = dir.path().join("ts");
    let mut res = router.open(&format!("file:{}", path.display()), 0).unwrap();
    let mut err = router.open("stderr:", 0).unwrap();

    let mut ts = Tstamp;
    assert_eq!(ts.action("", res.as_mut(), err.as_mut()), 0);

    let text = std::fs::read_to_string(&path).unwrap();
    let secs: u64 = text.trim().parse().unwrap();
    assert!(secs > 1_577_836_800, "epoch seconds after 2020");
}

#[test]
fn control_methods_request_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let (cx, mut rx) = cx(dir.path());
    let mut reg = Registry::new();
    register(&mut reg, &cx);

    let router = Router::new(dir.path().to_path_buf(), "h");
    let mut res = router.open("stdout:", 0).unwrap();
    let mut err = router.open("stderr:", 0).unwrap();

    let method = reg.lookup("shutdown").unwrap();
    if let crate::meth::Runner::Source(factory) = &method.runner {
        let mut state = factory();
        assert_eq!(state.action("", res.as_mut(), err.as_mut()), 0);
    } else {
        panic!("shutdown is a source method");
    }
    assert_eq!(rx.try_recv(), Ok(ShutdownKind::Stop));

    let method = reg.lookup("restart").unwrap();
    if let crate::meth::Runner::Source(factory) = &method.runner {
        let mut state = factory();
        state.action("", res.as_mut(), err.as_mut());
    }
    assert_eq!(rx.try_recv(), Ok(ShutdownKind::Restart));
}

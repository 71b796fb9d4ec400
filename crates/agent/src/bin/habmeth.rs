// SPDX-License-Identifier: MIT

//! habmeth — run a single built-in method stand-alone.
//!
//! `habmeth <method> [args...]` runs the method synchronously with its
//! output on the standard streams and exits with the method's return
//! code. Without arguments it lists the registered methods.

use cw_agent::{host, Paths};
use cw_core::SystemClock;
use cw_engine::{meth, Engine};
use cw_route::Router;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let paths = match Paths::resolve() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("habmeth: {e}");
            return ExitCode::FAILURE;
        }
    };
    let router = Arc::new(Router::new(paths.var_dir.clone(), host::hostname()));

    // The engine is only built for its populated method registry.
    let engine = Engine::new(Arc::new(SystemClock), Arc::clone(&router));
    let core = engine.core();

    let Some(method_name) = args.first() else {
        eprint!("{}", usage(&core));
        return ExitCode::FAILURE;
    };
    if method_name == "-h" || method_name == "--help" {
        print!("{}", usage(&core));
        return ExitCode::SUCCESS;
    }

    let Some(method) = core.close().meth.registry().lookup(method_name) else {
        eprintln!("habmeth: method '{method_name}' not recognised");
        eprint!("{}", usage(&core));
        return ExitCode::FAILURE;
    };

    let command = args[1..].join(" ");
    let r = meth::action_only(&router, &method, &command, "stdout:", "stderr:", 0);
    if r != 0 {
        eprintln!("habmeth: method {method_name} failed, returning {r}");
    }
    ExitCode::from(r.clamp(0, 255) as u8)
}

fn usage(core: &Arc<cw_engine::Gate<cw_engine::EngineCore>>) -> String {
    let mut out = String::from("usage: habmeth <method> [args...]\nwhere methods are:\n");
    for (name, info) in core.close().meth.registry().describe() {
        out.push_str(&format!("      {name:<11} {info}\n"));
    }
    out
}

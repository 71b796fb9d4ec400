// SPDX-License-Identifier: MIT

//! clockwork — a periodic execution agent.
//!
//! Think of it as cron with knobs on: a job table with per-second start,
//! interval, phase and count control, pluggable execution methods, and
//! job output multiplexed onto application-addressable routes. A small
//! embedded HTTP daemon serves status, configuration and locally stored
//! ring data.

use clap::Parser;
use cw_agent::{host, Config, Paths};
use cw_core::SystemClock;
use cw_engine::{Engine, EngineError, RunExit, ShutdownKind};
use cw_httpd::{register_builtin_paths, AgentInfo, Httpd, DEFAULT_PORT};
use cw_route::{expand, ExpandContext, Router};
use fs2::FileExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "clockwork",
    version,
    about = "periodic job execution agent",
    long_about = "Runs a table of periodic jobs on a wall-clock schedule, executing each \
                  through a named method and routing its output to configurable destinations."
)]
struct Cli {
    /// Load the standard job table <NAME> from the lib directory
    #[arg(short = 'j', value_name = "NAME")]
    standard_jobs: Option<String>,

    /// Load the job table from an explicit route (implies -s and -f)
    #[arg(short = 'J', value_name = "ROUTE")]
    job_route: Option<String>,

    /// Run in the foreground: no lock file, no HTTP serving
    #[arg(short = 'f')]
    foreground: bool,

    /// Do not serve HTTP
    #[arg(short = 's')]
    no_server: bool,

    /// Configuration file (default: <libdir>/clockwork.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.standard_jobs.is_some() && cli.job_route.is_some() {
        eprintln!("clockwork: cannot give both -j and -J, please pick one");
        return ExitCode::from(10);
    }
    let foreground = cli.foreground || cli.job_route.is_some();
    let serve = !(cli.no_server || cli.job_route.is_some() || foreground);

    let paths = match Paths::resolve() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("clockwork: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&paths.var_dir) {
        eprintln!("clockwork: cannot create {}: {e}", paths.var_dir.display());
        return ExitCode::FAILURE;
    }

    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_path.clone());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("clockwork: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Where the jobs come from: -J route, -j standard table, or the
    // config directive.
    let jobs_url = if let Some(route) = &cli.job_route {
        route.clone()
    } else if let Some(name) = &cli.standard_jobs {
        format!("file:%l/{name}.jobs")
    } else if let Some(jobs) = &config.jobs {
        jobs.clone()
    } else {
        eprintln!(
            "clockwork: no job table. Give -j or -J, or set the 'jobs' directive in {} \
             to the route containing a job table, for example jobs = \"file:/etc/clockwork.jobs\"",
            config_path.display()
        );
        return ExitCode::from(1);
    };

    let host = host::hostname();
    let cx = ExpandContext {
        host: host.clone(),
        job: String::new(),
        interval: 0,
        lib_dir: paths.lib_dir.display().to_string(),
        var_dir: paths.var_dir.display().to_string(),
    };
    let jobs_url = expand(&jobs_url, &cx);

    let router = Arc::new(Router::new(paths.var_dir.clone(), host.clone()));
    if !router.readable(&jobs_url) {
        eprintln!(
            "clockwork: unable to access route '{jobs_url}' to read jobs.\n\
             Please check the name and location and start again."
        );
        return ExitCode::from(2);
    }

    let _log_guard = match setup_logging(&paths, foreground) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("clockwork: cannot set up logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Exclusive agent lock; skipped in the foreground.
    let _lock = if foreground {
        None
    } else {
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&paths.lock_path)
            .and_then(|file| {
                file.try_lock_exclusive()?;
                Ok(file)
            });
        match lock {
            Ok(file) => {
                use std::io::Write;
                let mut file = file;
                let _ = file.set_len(0);
                let _ = writeln!(file, "{}", std::process::id());
                Some(file)
            }
            Err(e) => {
                eprintln!(
                    "clockwork: cannot take the lock {} ({e}); already running?",
                    paths.lock_path.display()
                );
                return ExitCode::FAILURE;
            }
        }
    };

    // Serve ring data from the var dir when we are the host's data
    // server; stay in the launch directory otherwise.
    if !foreground {
        let _ = std::env::set_current_dir(&paths.var_dir);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("clockwork: cannot start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let exit = runtime.block_on(run_agent(RunContext {
        config,
        paths,
        router,
        cx,
        jobs_url,
        host,
        serve,
        foreground,
    }));

    match exit {
        Ok(AgentExit::Stopped { survivors }) => ExitCode::from(survivors.min(255) as u8),
        Ok(AgentExit::Restart) => restart(),
        Ok(AgentExit::NoJobs) => ExitCode::from(5),
        Err(e) => {
            error!(error = %e, "agent terminated on a fatal error");
            eprintln!("clockwork: fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

struct RunContext {
    config: Config,
    paths: Paths,
    router: Arc<Router>,
    cx: ExpandContext,
    jobs_url: String,
    host: String,
    serve: bool,
    foreground: bool,
}

enum AgentExit {
    Stopped { survivors: u32 },
    Restart,
    NoJobs,
}

async fn run_agent(ctx: RunContext) -> Result<AgentExit, EngineError> {
    let mut engine = Engine::new(Arc::new(SystemClock), Arc::clone(&ctx.router));

    // The HTTP daemon rides the same relay the executor multiplexes.
    let mut httpd = if ctx.serve && !ctx.config.httpd.disable {
        let mut httpd = Httpd::new(
            ctx.config.httpd.interface.clone().unwrap_or_default(),
            ctx.config.httpd.port.unwrap_or(DEFAULT_PORT),
        );
        let info = Arc::new(AgentInfo {
            config: ctx.config.flatten(),
            elog: ctx.config.elog_table(),
            hostname: ctx.host.clone(),
            os: host::os(),
            machine: host::machine(),
            timezone: host::timezone(),
            var_dir: ctx.paths.var_dir.clone(),
        });
        register_builtin_paths(&httpd, info);
        match httpd.start(engine.relay_sender()).await {
            Ok(()) => Some(httpd),
            Err(e) => {
                error!(error = %e, "http daemon failed to start; continuing without it");
                None
            }
        }
    } else {
        None
    };

    let loaded = match engine.load_jobs(&ctx.jobs_url, &ctx.cx) {
        Ok(n) => n,
        Err(e) => {
            error!(url = %ctx.jobs_url, error = %e, "unable to read the job table");
            return Ok(AgentExit::NoJobs);
        }
    };
    info!(jobs = loaded, url = %ctx.jobs_url, "loaded jobs");
    let started = engine.core().close().jobs.start_time();
    let started = chrono::DateTime::from_timestamp(started, 0)
        .map(|t| t.to_rfc2822())
        .unwrap_or_else(|| started.to_string());
    info!(
        foreground = ctx.foreground,
        serving = httpd.is_some(),
        host = %ctx.host,
        started = %started,
        "clockwork running"
    );

    // Termination signals become shutdown requests.
    let handle = engine.shutdown_handle();
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = sigterm.recv() => info!("shutting down from SIGTERM"),
            _ = sigint.recv() => info!("shutting down from SIGINT"),
        }
        handle.request(ShutdownKind::Stop);
    });

    let RunExit::Shutdown(kind) = engine.run().await?;

    if let Some(httpd) = &mut httpd {
        httpd.stop();
    }
    let survivors = engine.shutdown().await?;
    if survivors > 0 {
        warn!(survivors, "jobs did not shut down normally");
    } else {
        info!("clockwork successfully shut down");
    }

    match kind {
        ShutdownKind::Stop => Ok(AgentExit::Stopped { survivors }),
        ShutdownKind::Restart => Ok(AgentExit::Restart),
    }
}

/// Re-exec the agent with its original arguments.
fn restart() -> ExitCode {
    use std::os::unix::process::CommandExt;
    let args: Vec<String> = std::env::args().collect();
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("clockwork: cannot restart: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("restarting");
    let err = std::process::Command::new(exe).args(&args[1..]).exec();
    eprintln!("clockwork: restart failed: {err}");
    ExitCode::FAILURE
}

fn setup_logging(
    paths: &Paths,
    foreground: bool,
) -> std::io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if foreground {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(None);
    }

    let file_appender = tracing_appender::rolling::never(
        paths.log_path.parent().unwrap_or(&paths.var_dir),
        paths
            .log_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("clockwork.log")),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
    Ok(Some(guard))
}

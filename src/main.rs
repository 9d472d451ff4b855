mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use cli::{AutostartCommand, Cli, Command, ConfigCommand, ConfigSetArgs};
use wms_control::autostart::{AutoStartError, AutoStartRegistrar, AutoStartTaskDescriptor};
use wms_control::config::{ConfigError, ConfigStore, ServiceConfig};
use wms_control::launcher::{LauncherScript, ServerCommand};
use wms_control::poller::{PollerOptions, StatusPoller};
use wms_control::process_monitor::endpoint_reachable_async;
use wms_control::supervisor::{
    ProcessSupervisor, ServiceState, StatusReport, StopOutcome, SupervisorError,
};

const LIVENESS_TIMEOUT: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    wms_control::logging::init(&cli.log_dir());

    if let Err(e) = run(cli).await {
        eprintln!("✗ Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<SupervisorError>() {
        return e.exit_code();
    }
    if let Some(ConfigError::Invalid(_)) = err.downcast_ref::<ConfigError>() {
        return 2;
    }
    1
}

/// CLI 한 번 실행에 필요한 공유 객체
struct Context {
    install_dir: PathBuf,
    task_name: String,
    store: ConfigStore,
    supervisor: Arc<ProcessSupervisor>,
}

impl Context {
    fn new(cli: &Cli) -> Self {
        // 런처 스크립트와 작업 스케줄러가 쓸 수 있도록 절대 경로로
        let install_dir = std::fs::canonicalize(&cli.install_dir).unwrap_or_else(|_| cli.install_dir.clone());

        let mut server = ServerCommand::new(cli.server_program.clone(), install_dir.clone());
        for arg in &cli.server_args {
            server = server.arg(arg.clone());
        }

        let store = ConfigStore::open(cli.config_path());
        let supervisor = Arc::new(ProcessSupervisor::new(cli.pid_file_path(), server));

        Self {
            install_dir,
            task_name: cli.task_name.clone(),
            store,
            supervisor,
        }
    }

    fn launcher(&self) -> LauncherScript {
        LauncherScript::new(self.supervisor.server().clone())
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::new(&cli);

    match cli.command {
        Command::Status { json } => cmd_status(&ctx, json).await,
        Command::Start => {
            let config = ctx.store.current();
            let sup = ctx.supervisor.clone();
            let record = tokio::task::spawn_blocking(move || sup.start(&config)).await??;
            println!("✓ Service running (PID {})", record.pid);
            Ok(())
        }
        Command::Stop => {
            let sup = ctx.supervisor.clone();
            let outcome = tokio::task::spawn_blocking(move || sup.stop()).await??;
            match outcome {
                StopOutcome::AlreadyStopped => println!("✓ Service is not running"),
                StopOutcome::Graceful => println!("✓ Service stopped"),
                StopOutcome::Forced => println!("✓ Service stopped (forced)"),
            }
            Ok(())
        }
        Command::Restart => {
            let config = ctx.store.current();
            let sup = ctx.supervisor.clone();
            let record = tokio::task::spawn_blocking(move || sup.restart(&config)).await??;
            println!("✓ Service restarted (PID {})", record.pid);
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let config = ctx.store.current();
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("  file: {}", ctx.store.path().display());
            Ok(())
        }
        Command::Config(ConfigCommand::Set(args)) => cmd_config_set(&ctx, args),
        Command::Script => {
            let path = ctx.launcher().generate(&ctx.store.current(), &ctx.install_dir)?;
            println!("✓ Launcher script written to {}", path.display());
            Ok(())
        }
        Command::Autostart(sub) => cmd_autostart(&ctx, sub),
        Command::Watch { interval } => cmd_watch(&ctx, interval).await,
    }
}

async fn cmd_status(ctx: &Context, json: bool) -> anyhow::Result<()> {
    let sup = ctx.supervisor.clone();
    let report = tokio::task::spawn_blocking(move || sup.report()).await?;
    let config = ctx.store.current();

    let reachable = if report.state == ServiceState::Running {
        Some(endpoint_reachable_async(&config.connect_addr(), LIVENESS_TIMEOUT).await)
    } else {
        None
    };

    if json {
        let mut value = serde_json::to_value(&report)?;
        value["url"] = serde_json::Value::String(config.base_url());
        value["reachable"] = serde_json::json!(reachable);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_report(&report, &config, reachable);
    }
    Ok(())
}

fn print_report(report: &StatusReport, config: &ServiceConfig, reachable: Option<bool>) {
    println!("Service: {}", report.state);
    if let Some(pid) = report.pid {
        println!("  PID:     {}", pid);
    }
    if let Some(command) = &report.command {
        println!("  Command: {}", command);
    }
    if let Some(detail) = &report.detail {
        println!("  Detail:  {}", detail);
    }
    match reachable {
        Some(true) => println!("  URL:     {} (responding)", config.base_url()),
        Some(false) => println!("  URL:     {} (not responding)", config.base_url()),
        None => println!("  URL:     {}", config.base_url()),
    }
}

fn cmd_config_set(ctx: &Context, args: ConfigSetArgs) -> anyhow::Result<()> {
    if args.host.is_none() && args.port.is_none() && args.locale.is_none() {
        anyhow::bail!("nothing to change (use --host, --port or --locale)");
    }

    let mut config = ctx.store.current();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(locale) = args.locale {
        config.locale = locale;
    }
    ctx.store.save(&config)?;
    println!("✓ Saved {}", ctx.store.path().display());

    // 실행 중인 서비스는 재시작해야 새 주소가 적용됨
    if ctx.supervisor.status() == ServiceState::Running {
        println!("  Service is running; run `wms-control restart` to apply");
    }
    refresh_launcher_if_present(ctx, &config);
    Ok(())
}

/// 자동 시작 스크립트가 이미 있으면 새 설정으로 다시 생성
fn refresh_launcher_if_present(ctx: &Context, config: &ServiceConfig) {
    let launcher = ctx.launcher();
    if !launcher.script_path(&ctx.install_dir).exists() {
        return;
    }
    match launcher.generate(config, &ctx.install_dir) {
        Ok(path) => println!("  Launcher script updated: {}", path.display()),
        Err(e) => tracing::warn!("Failed to refresh launcher script: {}", e),
    }
}

fn cmd_autostart(ctx: &Context, sub: AutostartCommand) -> anyhow::Result<()> {
    let registrar = AutoStartRegistrar::native();
    let task = ctx.task_name.as_str();

    match sub {
        AutostartCommand::Enable => {
            let script = ctx.launcher().generate(&ctx.store.current(), &ctx.install_dir)?;
            let descriptor = AutoStartTaskDescriptor::at_logon(task, script);
            if let Err(e) = registrar.enable(&descriptor) {
                if e.is_permission_denied() {
                    eprintln!("  Hint: registering a logon task needs administrator rights");
                }
                return Err(e.into());
            }
            println!("✓ Auto-start enabled ({}: {})", registrar.backend(), task);
        }
        AutostartCommand::Disable => {
            registrar.disable(task)?;
            println!("✓ Auto-start disabled ({})", task);
        }
        AutostartCommand::Status => {
            let state = if registrar.is_enabled(task) { "enabled" } else { "disabled" };
            println!("Auto-start: {} ({}: {})", state, registrar.backend(), task);
        }
        AutostartCommand::Run => {
            // 스케줄러 대신 supervisor로 띄워야 PID 기록이 남음
            let record = match registrar.run_tracked(task, &ctx.supervisor, &ctx.store.current()) {
                Ok(record) => record,
                Err(AutoStartError::Launch(e)) => return Err(e.into()),
                Err(e) => return Err(e.into()),
            };
            println!("✓ Auto-start task '{}' started WMS service (pid {})", task, record.pid);
        }
    }
    Ok(())
}

async fn cmd_watch(ctx: &Context, interval: u64) -> anyhow::Result<()> {
    let options = PollerOptions {
        interval: Duration::from_secs(interval.max(1)),
        ..PollerOptions::default()
    };
    let poller = StatusPoller::spawn(ctx.supervisor.clone(), options);
    let mut rx = poller.subscribe();
    println!("Watching {} (Ctrl+C to exit)", ctx.supervisor.pid_file().display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *rx.borrow_and_update();
                if let Some(state) = state {
                    println!("Service: {}", state);
                }
            }
        }
    }

    poller.shutdown().await;
    Ok(())
}

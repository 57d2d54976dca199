use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use toolhost::backend::{BackendConfig, BackendController, ServerController};
use toolhost::config::Settings;
use toolhost::process::{ProcessInspector, SystemInspector};
use toolhost::registry::{result_text, ToolServerRegistry};

#[derive(Parser)]
#[command(name = "toolhost")]
#[command(about = "Launch MCP tool-servers and supervise local inference backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: nearest .toolhost.toml)
    #[arg(long, global = true, env = "TOOLHOST_CONFIG")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and exercise MCP tool-servers from a registry file
    Servers {
        /// Registry file (default: settings `registry`, then nearest .mcp.json)
        #[arg(long, env = "TOOLHOST_REGISTRY")]
        registry: Option<PathBuf>,

        #[command(subcommand)]
        command: ServerCommands,
    },
    /// Manage a local inference backend
    Backend {
        #[command(flatten)]
        opts: BackendOpts,

        #[command(subcommand)]
        command: BackendCommands,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// List registered servers
    List,
    /// List tools (one server, or every enabled server)
    Tools {
        server: Option<String>,
    },
    /// Call a tool on a server
    Call {
        server: String,
        tool: String,
        /// Arguments as JSON
        #[arg(long, short)]
        args: Option<String>,
    },
    /// Start every enabled server and verify it answers tools/list
    Check,
}

#[derive(Args)]
struct BackendOpts {
    /// Backend name from settings, or a kind (ollama, llama-cpp, comfy-ui)
    #[arg(long, env = "TOOLHOST_BACKEND")]
    backend: Option<String>,

    #[arg(long, env = "TOOLHOST_MODEL")]
    model: Option<String>,

    #[arg(long, env = "TOOLHOST_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "TOOLHOST_EXECUTABLE")]
    executable: Option<String>,

    #[arg(long, env = "TOOLHOST_MODELS_DIR")]
    models_dir: Option<String>,
}

impl BackendOpts {
    fn apply(&self, config: &mut BackendConfig) {
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        if let Some(url) = &self.base_url {
            config.base_url = Some(url.clone());
        }
        if let Some(exe) = &self.executable {
            config.executable_path = Some(exe.clone());
        }
        if let Some(dir) = &self.models_dir {
            config.models_dir = Some(dir.clone());
        }
    }
}

#[derive(Subcommand)]
enum BackendCommands {
    /// Show health and port owners
    Status,
    /// Start the backend if it is not answering
    Start,
    /// Make sure the backend is up (exit code 1 otherwise)
    Ensure {
        /// Stop every other configured backend first
        #[arg(long)]
        exclusive: bool,
        /// Also pull and load the configured model
        #[arg(long)]
        prepare: bool,
    },
    /// Stop the backend
    Stop,
    /// Kill every process that looks like the backend or holds its port
    Kill,
    /// Pull the configured model if missing
    Pull,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    toolhost::logging::init_tracing("toolhost", toolhost::logging::verbosity_level(cli.verbose))?;

    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Servers { registry, command } => {
            let path = registry
                .or_else(|| settings.registry_path())
                .context("No MCP registry found (use --registry or create .mcp.json)")?;
            run_servers(ToolServerRegistry::new(path), command).await?;
        }
        Commands::Backend { opts, command } => {
            run_backend(&settings, &opts, command).await?;
        }
    }

    Ok(())
}

async fn run_servers(registry: ToolServerRegistry, command: ServerCommands) -> Result<()> {
    match command {
        ServerCommands::List => {
            for (name, descriptor) in registry.descriptors()? {
                let state = if descriptor.disabled { " (disabled)" } else { "" };
                println!("{}{}: {} {}", name, state, descriptor.command, descriptor.args.join(" "));
            }
        }
        ServerCommands::Tools { server } => {
            let mut handles = match server {
                Some(name) => vec![registry.load(&name, None).await?],
                None => registry.load_all().await,
            };
            for handle in handles.iter_mut() {
                match handle.tools().await {
                    Ok(tools) => {
                        println!("{}:", handle.name());
                        for tool in tools {
                            println!(
                                "  {} - {}",
                                tool.name,
                                tool.description.unwrap_or_default()
                            );
                        }
                    }
                    Err(e) => eprintln!("{}: {}", handle.name(), e),
                }
                handle.close().await;
            }
        }
        ServerCommands::Call { server, tool, args } => {
            let arguments = args
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("Arguments must be valid JSON")?;

            let mut handle = registry.load(&server, None).await?;
            let result = handle.call_tool(&tool, arguments).await;
            handle.close().await;
            let result = result?;

            println!("{}", result_text(&result));
            if result.is_error == Some(true) {
                std::process::exit(1);
            }
        }
        ServerCommands::Check => {
            let mut failures = 0;
            for mut handle in registry.load_all().await {
                match handle.tools().await {
                    Ok(tools) => println!("✓ {} ({} tools)", handle.name(), tools.len()),
                    Err(e) => {
                        failures += 1;
                        println!("✗ {}: {}", handle.name(), e);
                    }
                }
                handle.close().await;
            }
            if failures > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run_backend(settings: &Settings, opts: &BackendOpts, command: BackendCommands) -> Result<()> {
    let (name, mut config) = settings.backend(opts.backend.as_deref())?;
    opts.apply(&mut config);
    let mut controller = BackendController::new(config)?;

    match command {
        BackendCommands::Status => {
            let endpoint = controller.endpoint();
            let healthy = controller.check_status().await;
            println!("backend:  {} ({})", name, controller.kind());
            println!("endpoint: {}", endpoint.base_url);
            println!("healthy:  {}", if healthy { "yes" } else { "no" });

            let owners = SystemInspector::new()
                .processes_on_port(endpoint.port)
                .await;
            for owner in owners {
                println!("port {}:  {} (pid {})", endpoint.port, owner.name, owner.pid);
            }
        }
        BackendCommands::Start => {
            let started = controller.start_server().await?;
            println!("{}: {}", name, controller.state());
            if !started {
                std::process::exit(1);
            }
        }
        BackendCommands::Ensure { exclusive, prepare } => {
            let ready = if exclusive {
                let mut set = settings.backend_set()?;
                set.insert(name.clone(), Box::new(controller));
                let ready = set.activate(&name).await?;
                if ready && prepare {
                    if let Some(active) = set.get_mut(&name) {
                        prepare_and_warm(active).await;
                    }
                }
                ready
            } else {
                let ready = controller.ensure_server_running().await?;
                if ready && prepare {
                    prepare_and_warm(&mut controller).await;
                }
                ready
            };

            if !ready {
                eprintln!("{} backend is not ready", name);
                std::process::exit(1);
            }
            println!("{} backend is ready", name);
        }
        BackendCommands::Stop => {
            if !controller.stop_server().await {
                eprintln!("Some {} processes could not be stopped", name);
                std::process::exit(1);
            }
        }
        BackendCommands::Kill => {
            let killed = controller.kill_existing_process().await;
            println!("Killed {} process(es)", killed);
        }
        BackendCommands::Pull => {
            if !controller.prepare_model().await {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Pull the configured model if needed, then load it. Failures only degrade.
async fn prepare_and_warm(controller: &mut dyn ServerController) {
    if controller.prepare_model().await {
        controller.warm_model().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use toolhost::backend::{BackendKind, BackendResult, BackendState};

    struct Counting {
        prepared: bool,
        prepares: usize,
        warms: AtomicUsize,
    }

    #[async_trait]
    impl ServerController for Counting {
        fn kind(&self) -> BackendKind {
            BackendKind::Ollama
        }

        fn state(&self) -> BackendState {
            BackendState::Healthy
        }

        fn startup_attempts(&self) -> u32 {
            1
        }

        async fn check_status(&self) -> bool {
            true
        }

        async fn start_server(&mut self) -> BackendResult<bool> {
            Ok(true)
        }

        async fn ensure_server_running(&mut self) -> BackendResult<bool> {
            Ok(true)
        }

        async fn stop_server(&mut self) -> bool {
            true
        }

        async fn kill_existing_process(&mut self) -> usize {
            0
        }

        async fn prepare_model(&mut self) -> bool {
            self.prepares += 1;
            self.prepared
        }

        async fn warm_model(&self) -> bool {
            self.warms.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn counting(prepared: bool) -> Counting {
        Counting {
            prepared,
            prepares: 0,
            warms: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_prepare_and_warm_through_trait_object() {
        let mut set = toolhost::backend::BackendSet::new();
        set.insert("ollama", Box::new(counting(true)));
        let active = set.get_mut("ollama").unwrap();
        prepare_and_warm(active).await;

        let mut direct = counting(true);
        prepare_and_warm(&mut direct).await;
        assert_eq!(direct.prepares, 1);
        assert_eq!(direct.warms.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_prepare_skips_warm() {
        let mut controller = counting(false);
        prepare_and_warm(&mut controller).await;
        assert_eq!(controller.prepares, 1);
        assert_eq!(controller.warms.load(Ordering::SeqCst), 0);
    }
}

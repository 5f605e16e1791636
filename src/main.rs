use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use devpush::build::{BuildParameters, BuildPipeline, InterruptSupervisor};
use devpush::cluster::{ClusterClient, KubectlClient};
use devpush::component::{ComponentAdapter, PushParameters};
use devpush::config::EngineConfig;
use devpush::deploy::{DeployParameters, ManifestApplier};
use devpush::devfile::{CommandOverrides, Devfile};
use devpush::sync::{ArchiveSync, SyncAdapter};
use devpush::AppError;
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Push, build and deploy devfile components
#[derive(Parser)]
#[command(name = "devpush")]
#[command(about = "Run devfile components on a Kubernetes/OpenShift cluster")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Devfile path, relative to the context directory
    #[arg(long, global = true, default_value = "devfile.yaml")]
    devfile: PathBuf,

    /// Component source directory
    #[arg(long, global = true, default_value = ".")]
    context: PathBuf,

    /// Target namespace, overrides the configuration
    #[arg(long, global = true)]
    namespace: Option<String>,

    /// Component name, defaults to the devfile name
    #[arg(long, global = true)]
    name: Option<String>,

    /// Engine configuration file
    #[arg(long, global = true, env = "DEVPUSH_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the component and run its commands
    Push {
        #[arg(long)]
        init_command: Option<String>,
        #[arg(long)]
        build_command: Option<String>,
        #[arg(long)]
        run_command: Option<String>,
        #[arg(long)]
        debug_command: Option<String>,
        /// Run the debug command instead of the run command
        #[arg(long)]
        debug: bool,
        #[arg(long)]
        debug_port: Option<u16>,
        /// Push all files and re-run commands
        #[arg(long = "force-build")]
        force_build: bool,
        /// Show command output
        #[arg(long = "show-log")]
        show_log: bool,
    },

    /// Build an image from the context directory
    Build {
        /// registryHost/namespace/repository[:tag]; empty targets the component image stream
        #[arg(long, default_value = "")]
        tag: String,
        /// Use the builder pod even when cluster builds are available
        #[arg(long)]
        rootless: bool,
    },

    /// Apply a deploy manifest
    Deploy {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long, default_value = "")]
        tag: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },

    /// Delete the objects of the last deploy
    DeployDelete {
        /// Defaults to the local manifest mirror
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Delete the component
    Delete,

    /// Run a command in the component's run container
    Exec {
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Run the devfile test command
    Test {
        #[arg(long)]
        test_command: Option<String>,
        #[arg(long = "show-log")]
        show_log: bool,
    },

    /// Show the logs of the run (or debug) container
    Log {
        #[arg(long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e
                .downcast_ref::<AppError>()
                .map(AppError::is_interrupted)
                .unwrap_or(false)
            {
                warn!("🛑 {}", e);
                return ExitCode::SUCCESS;
            }
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn component_name(explicit: Option<&str>, devfile: &Devfile, context: &Path) -> String {
    if let Some(name) = explicit {
        return name.to_string();
    }
    let from_devfile = devfile.component_type();
    if !from_devfile.is_empty() {
        return from_devfile.to_string();
    }
    context
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()))
        .unwrap_or_else(|| "component".to_string())
}

async fn run(cli: Cli) -> Result<()> {
    let global = cli.global;
    let mut config = EngineConfig::load(global.config.as_deref(), &global.context).await?;
    if let Some(namespace) = global.namespace {
        config.namespace = namespace;
    }

    let devfile_path = global.context.join(&global.devfile);
    let devfile = Devfile::from_path(&devfile_path)
        .await
        .with_context(|| format!("unable to load devfile {}", devfile_path.display()))?;
    let name = component_name(global.name.as_deref(), &devfile, &global.context);

    let cluster: Arc<dyn ClusterClient> = Arc::new(KubectlClient::from_config(&config));
    let sync: Arc<dyn SyncAdapter> = Arc::new(ArchiveSync::new(cluster.clone()));

    match cli.command {
        Commands::Push {
            init_command,
            build_command,
            run_command,
            debug_command,
            debug,
            debug_port,
            force_build,
            show_log,
        } => {
            let adapter = ComponentAdapter::new(&name, devfile, config, cluster, sync)?;
            let params = PushParameters {
                path: global.context.clone(),
                overrides: CommandOverrides {
                    init: init_command,
                    build: build_command,
                    run: run_command,
                    debug: debug_command,
                    test: None,
                },
                debug,
                debug_port,
                force_build,
                show: show_log,
            };
            adapter.push(&params).await?;
        }
        Commands::Build { tag, rootless } => {
            let supervisor = InterruptSupervisor::os();
            let pipeline = BuildPipeline::new(&name, config, cluster, sync, supervisor.clone());
            let params = BuildParameters {
                tag,
                rootless,
                context_dir: global.context.clone(),
                docker_config: None,
            };
            let result = pipeline.build(&params).await;
            // the signal handler outlives the build guard; exit like an unhandled SIGINT
            supervisor.spawn_fallback(|| std::process::exit(130));
            let outcome = result?;
            info!("✅ Built {} with {}", outcome.image, outcome.strategy);
        }
        Commands::Deploy {
            manifest,
            tag,
            port,
        } => {
            let source = tokio::fs::read(&manifest)
                .await
                .with_context(|| format!("unable to read manifest {}", manifest.display()))?;
            let applier = ManifestApplier::new(&name, config, cluster);
            let params = DeployParameters {
                manifest: source,
                tag,
                port,
            };
            applier.deploy(&params).await?;
        }
        Commands::DeployDelete { manifest } => {
            let path = manifest.unwrap_or_else(|| config.manifest_mirror_path());
            let source = tokio::fs::read(&path)
                .await
                .with_context(|| format!("unable to read manifest {}", path.display()))?;
            ManifestApplier::new(&name, config, cluster)
                .deploy_delete(&source)
                .await?;
            info!("✅ Successfully deleted deployed component {}", name);
        }
        Commands::Delete => {
            ComponentAdapter::new(&name, devfile, config, cluster, sync)?
                .delete()
                .await?;
        }
        Commands::Exec { command } => {
            let adapter = ComponentAdapter::new(&name, devfile, config, cluster, sync)?;
            let output = adapter.exec(&command).await?;
            print!("{}", output);
        }
        Commands::Test {
            test_command,
            show_log,
        } => {
            ComponentAdapter::new(&name, devfile, config, cluster, sync)?
                .test(test_command.as_deref(), show_log)
                .await?;
        }
        Commands::Log { debug } => {
            let logs = ComponentAdapter::new(&name, devfile, config, cluster, sync)?
                .log(debug)
                .await?;
            print!("{}", logs);
        }
    }
    Ok(())
}

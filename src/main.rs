use anyhow::{Context, Result};
use capstan::{BuildContext, ProcessorRegistry, Rest, RuntimeBuilder, RuntimeError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "capstan")]
#[command(about = "Composable microservice runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve register/login/logout backed by one JSON file per user.
    Serve {
        #[arg(long, default_value = "capstan")]
        name: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long, default_value = "fs")]
        users_dir: PathBuf,
        /// Directory holding `<name>.json` (log level, broker endpoint).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Also run the in-process broker.
        #[arg(long)]
        broker: bool,
        /// Processor to install, by name.
        #[arg(long)]
        plugin: Option<String>,
        /// PEM certificate chain; serves HTTPS together with `--tls-key`.
        #[arg(long, requires = "tls_key")]
        tls_cert: Option<PathBuf>,
        #[arg(long, requires = "tls_cert")]
        tls_key: Option<PathBuf>,
    },
    /// List the processors compiled into this binary.
    Plugins,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            name,
            port,
            users_dir,
            config,
            broker,
            plugin,
            tls_cert,
            tls_key,
        } => {
            let tls = tls_cert.zip(tls_key);
            serve(name, port, users_dir, config, broker, plugin, tls).await
        }
        Command::Plugins => {
            for name in ProcessorRegistry::builtin().names() {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

async fn serve(
    name: String,
    port: u16,
    users_dir: PathBuf,
    config: Option<PathBuf>,
    broker: bool,
    plugin: Option<String>,
    tls: Option<(PathBuf, PathBuf)>,
) -> Result<()> {
    let mut builder = RuntimeBuilder::new()
        .name(&name)
        .transport_with(move |ctx: &BuildContext<'_>| -> capstan::Result<Rest> {
            let rest = Rest::new()
                .name(&ctx.service.name)
                .with_port(port)
                .with_logger(ctx.logger);
            Ok(match tls {
                Some((cert, key)) => rest.with_tls(cert, key),
                None => rest,
            })
        })
        .default_authn(users_dir);
    if let Some(dir) = config {
        builder = builder.local_configuration().config_path(dir);
    }
    if broker {
        builder = builder.default_broker();
    }
    if let Some(plugin) = plugin {
        builder = builder.plugin(&ProcessorRegistry::builtin(), &plugin);
    }

    let mut runtime = builder.build().context("failed to assemble runtime")?;
    info!(id = %runtime.id(), name = %runtime.name(), "runtime assembled");

    match runtime.run().await {
        Ok(()) => Ok(()),
        Err(err @ RuntimeError::FatalStartup { .. }) => {
            error!(error = %err, "startup failed");
            std::process::exit(1);
        }
        Err(err) => Err(err).context("runtime stopped with errors"),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("capstan=debug,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

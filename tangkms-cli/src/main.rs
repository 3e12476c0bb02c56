//! Entry point: assembles the resolver, cryptor, and RPC services from
//! environment configuration and runs them until a shutdown signal or a
//! terminal error (spec.md §6).
//!
//! Grounded on `original_source/cmd/server/main.go`'s `main()`: load config,
//! build the advertiser/thumbprinter/crypter for the configured version,
//! start the metrics/health/plugin managers, and run them to completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tangkms_core::{Config, NetworkAdvertiser, StaticThumbprinter};
use tangkms_core::config::KmsVersion;
use tangkms_node::kms::{proto_v1, proto_v2};
use tangkms_node::{Health, Metrics, Plugin, PluginVersion, V1Service, V2Service};
use tonic::transport::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "tangkms-plugin",
    about = "A KMS plugin wrapping data encryption keys through a Tang server",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the gRPC plugin, health, and metrics servers (the default).
    Serve,
    /// Encrypts stdin to stdout, either through a running plugin socket or
    /// directly against a Tang server.
    Encrypt {
        /// Dial this plugin socket instead of talking to Tang directly.
        #[arg(long)]
        grpc: Option<String>,
        /// Tang server URL, used when `--grpc` is not given.
        #[arg(long)]
        tang: Option<String>,
        /// `verify/derive` thumbprint pair, used when `--grpc` is not given.
        #[arg(long)]
        thumbprint: Option<String>,
    },
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Encrypt {
            grpc,
            tang,
            thumbprint,
        } => {
            if let Err(e) = encrypt(grpc, tang, thumbprint).await {
                eprintln!(">> {e}");
                std::process::exit(1);
            }
        }
    }
}

async fn serve() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => abend("unable to read environment", &e),
    };

    init_tracing(&config.log_level);
    tracing::info!(
        thumbprints = %config.thumbprints,
        unix_socket = %config.unix_socket,
        tang_url = %config.tang_url,
        "configuration",
    );

    let advertiser: Arc<dyn tangkms_core::Advertiser> =
        Arc::new(NetworkAdvertiser::new(config.tang_url.clone()));
    let thumbprinter: Arc<dyn tangkms_core::Thumbprinter> =
        match StaticThumbprinter::new(&config.thumbprints) {
            Ok(t) => Arc::new(t),
            Err(e) => abend("malformed thumbprints", &e),
        };
    let cryptor = Arc::new(tangkms_core::Cryptor::new());

    let (metrics, counters) = Metrics::new(config.metrics_port, config.metrics_path.clone());
    let counters = Arc::new(counters);
    let metrics_errors = metrics.start();

    let plugin_version = match config.version {
        KmsVersion::V1 => PluginVersion::V1,
        KmsVersion::V2 => PluginVersion::V2,
    };

    let router = match config.version {
        KmsVersion::V1 => {
            let exchange = match tangkms_core::resolve_with_refresh(
                advertiser.as_ref(),
                thumbprinter.as_ref(),
            )
            .await
            {
                Ok(e) => e,
                Err(e) => abend("unable to resolve exchange key", &e),
            };
            let service = V1Service::new(exchange, cryptor, counters.clone());
            Server::builder().add_service(
                proto_v1::key_management_service_server::KeyManagementServiceServer::new(service),
            )
        }
        KmsVersion::V2 => {
            let service = V2Service::new(advertiser, thumbprinter, cryptor, counters.clone());
            Server::builder().add_service(
                proto_v2::key_management_service_server::KeyManagementServiceServer::new(service),
            )
        }
    };

    let plugin = Plugin::new(config.unix_socket.clone());
    let (plugin_shutdown, plugin_errors) = match plugin.start(router) {
        Ok(handles) => handles,
        Err(e) => abend("unable to start plugin socket", &e),
    };

    let health = Health::new(
        PathBuf::from(&config.unix_socket),
        Duration::from_millis(config.healthz_grpc_call_timeout),
        plugin_version,
        config.healthz_port,
        config.healthz_path.clone(),
    );
    let health_errors = health.start();

    if let Err(e) = tangkms_node::supervisor::run(
        plugin_shutdown,
        plugin_errors,
        Some(health_errors),
        Some(metrics_errors),
    )
    .await
    {
        abend("abend", &e);
    }
}

fn abend(message: &str, err: &dyn std::fmt::Display) -> ! {
    tracing::error!(error = %err, "{message}");
    std::process::exit(1);
}

async fn encrypt(
    grpc: Option<String>,
    tang: Option<String>,
    thumbprint: Option<String>,
) -> anyhow::Result<()> {
    use std::io::Read;
    let mut input = Vec::new();
    std::io::stdin().read_to_end(&mut input)?;

    if let Some(socket) = grpc {
        let channel = tonic::transport::Endpoint::try_from("http://[::]:50051")?
            .connect_with_connector(tangkms_node::plugin::unix_connector(PathBuf::from(socket)))
            .await?;
        let mut client =
            proto_v1::key_management_service_client::KeyManagementServiceClient::new(channel);
        let version = client
            .version(proto_v1::VersionRequest::default())
            .await?
            .into_inner();
        eprintln!("{version:?}");
        let cipher = client
            .encrypt(proto_v1::EncryptRequest { plain: input })
            .await?
            .into_inner()
            .cipher;
        println!("{}", String::from_utf8_lossy(&cipher));
    } else {
        let advertiser = NetworkAdvertiser::new(tang.unwrap_or_default());
        let thumbprinter = StaticThumbprinter::new(&thumbprint.unwrap_or_default())?;
        let exchange = tangkms_core::resolve_with_refresh(&advertiser, &thumbprinter).await?;
        let cryptor = tangkms_core::Cryptor::new();
        let compact = cryptor.encrypt(&exchange, &input)?;
        println!("{}", String::from_utf8_lossy(&compact));
    }
    Ok(())
}

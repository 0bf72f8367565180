//! minirpc node - demo greeting server and client.
//!
//! `serve` hosts the greeting service and publishes its address in a name
//! service; `call` resolves the name and invokes it.

mod hello;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hello::{HelloService, HelloServiceImpl};
use minirpc::config::ServerConfig;
use minirpc::{AccessPoint, ServiceInterface};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "minirpc-node")]
#[command(about = "Greeting server and client built on minirpc")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the greeting service until Ctrl-C
    Serve {
        /// Host to bind to and advertise
        #[arg(long, default_value = ServerConfig::DEFAULT_HOST)]
        host: String,

        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value_t = ServerConfig::DEFAULT_PORT)]
        port: u16,

        /// Name service URI (`sqlite:<path>`, `sqlite:` for the default database)
        #[arg(long, default_value = "sqlite:")]
        name_service: Url,
    },
    /// Look up the greeting service and call it once
    Call {
        /// Name service URI
        #[arg(long, default_value = "sqlite:")]
        name_service: Url,

        /// Who to greet
        #[arg(long, default_value = "Master MQ")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            host,
            port,
            name_service,
        } => serve(host, port, &name_service).await,
        Command::Call { name_service, name } => call(&name_service, name).await,
    }
}

async fn serve(host: String, port: u16, name_service_uri: &Url) -> Result<()> {
    let service_name = <dyn HelloService as ServiceInterface>::NAME;
    let access_point = AccessPoint::builder().host(host).port(port).build()?;

    info!("Starting access point");
    let server = access_point.start_server().await?;
    let name_service = access_point.name_service(name_service_uri).await?;

    info!("Registering {} provider", service_name);
    let uri = access_point.add_service_provider::<dyn HelloService>(Arc::new(HelloServiceImpl))?;
    name_service.register_service(service_name, &uri).await?;
    info!("Serving {} at {}, press Ctrl-C to exit", service_name, uri);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    name_service.unregister_service(service_name, &uri).await?;
    name_service.close().await;
    server.stop();
    access_point.close().await;
    info!("Bye!");
    Ok(())
}

async fn call(name_service_uri: &Url, name: String) -> Result<()> {
    let service_name = <dyn HelloService as ServiceInterface>::NAME;
    let access_point = AccessPoint::new()?;
    let name_service = access_point.name_service(name_service_uri).await?;

    let uri = name_service.lookup_service(service_name).await?;
    info!("Found {} at {}", service_name, uri);

    let hello = access_point
        .get_remote_service::<dyn HelloService>(&uri)
        .await?;
    info!("Calling hello, name: {}", name);
    let response = hello.hello(name).await;

    name_service.close().await;
    access_point.close().await;

    let response = response?;
    info!("Received response: {}", response);
    println!("{}", response);
    Ok(())
}

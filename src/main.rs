use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use vmgate::configuration::config::Config;
use vmgate::controller::controller_handler::Controller;
use vmgate::tunnel::relay;

#[derive(Parser, Debug)]
#[command(name = "vmgate")]
#[command(version = "0.1.0")]
#[command(about = "Ephemeral emulator sessions over WebSocket")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve client sessions
    Serve {
        config_file: PathBuf,
        /// Base location the emulator downloads VM images from
        #[arg(long, env = "IMAGE_BASE_URL")]
        image_base_url: Option<String>,
    },
    /// Relay WebSocket clients on one port to a local TCP port
    Tunnel {
        #[arg(long)]
        listen_port: u16,
        #[arg(long)]
        target_port: u16,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    let code = match args.command {
        Command::Serve {
            config_file,
            image_base_url,
        } => serve(config_file, image_base_url).await,
        Command::Tunnel {
            listen_port,
            target_port,
        } => match relay::serve(listen_port, target_port).await {
            Ok(()) => 0,
            Err(e) => {
                error!("Tunnel worker failed: {}", e);
                1
            }
        },
    };
    std::process::exit(code);
}

async fn serve(config_file: PathBuf, image_base_url: Option<String>) -> i32 {
    println!(
        "
██╗   ██╗███╗   ███╗ ██████╗  █████╗ ████████╗███████╗
██║   ██║████╗ ████║██╔════╝ ██╔══██╗╚══██╔══╝██╔════╝
██║   ██║██╔████╔██║██║  ███╗███████║   ██║   █████╗
╚██╗ ██╔╝██║╚██╔╝██║██║   ██║██╔══██║   ██║   ██╔══╝
 ╚████╔╝ ██║ ╚═╝ ██║╚██████╔╝██║  ██║   ██║   ███████╗
  ╚═══╝  ╚═╝     ╚═╝ ╚═════╝ ╚═╝  ╚═╝   ╚═╝   ╚══════╝
=====================================================
     Ephemeral emulator sessions over WebSocket
=====================================================
"
    );

    info!("Importing configuration");
    let mut config = match Config::from_file(&config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            return 1;
        }
    };
    if let Some(url) = image_base_url {
        config.emulator.image_base_url = url;
    }
    info!("Configuration imported successfully");

    let controller = match Controller::new(config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            return 1;
        }
    };

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for the interrupt signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Interrupted, shutting down");
    };

    match controller.run(interrupted).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Error occured in the controller process: {}, exiting...", e);
            1
        }
    }
}

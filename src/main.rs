use clap::{Parser, Subcommand};

use tran::config::Config;

#[derive(Parser)]
#[command(name = "tran")]
#[command(about = "Securely transfer files and folders between computers", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file or folder
    Send {
        /// Path to the file or folder to send
        path: String,
    },
    /// Receive a file or folder
    Receive {
        /// Transfer password from the sender (will prompt if not provided)
        password: Option<String>,
    },
    /// Run a relay server
    Relay {
        /// Port to bind to
        #[arg(short, long, default_value = "7021")]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Configure logging based on verbose flag
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let config = Config::load();

    let result = match cli.command {
        Commands::Send { path } => tran::commands::send::run(&path, &config).await,
        Commands::Receive { password } => tran::commands::receive::run(password, &config).await,
        Commands::Relay { port } => tran::commands::relay::run(port).await,
    };

    if let Err(error) = result {
        eprintln!("tran: {}", error);
        if cli.verbose {
            let mut source = std::error::Error::source(&error);
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
        }
        std::process::exit(error.exit_code());
    }
}

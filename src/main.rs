use clap::{Parser, Subcommand};
use std::path::PathBuf;

use miktos_gateway::{config, pid, server};

#[derive(Parser)]
#[command(name = "mgw")]
#[command(about = "Miktos Gateway - multi-provider LLM orchestration service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to ~/.miktos-gateway/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway service
    Start {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Stop the gateway service
    Stop,
    /// Restart the gateway service
    Restart,
    /// Check service status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = config::AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Start { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }

            if let Err(e) = pid::write_pid() {
                eprintln!("Warning: Failed to write PID file: {}", e);
            }

            tracing::info!("Starting Miktos Gateway on port {}", config.server.port);
            println!("Miktos Gateway v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Listening on {}:{}",
                config.server.host, config.server.port
            );
            println!("Press Ctrl+C to stop");

            // Cleanup PID file on exit
            let result = server::run(config).await;
            let _ = pid::cleanup_pid();
            result?;
        }
        Commands::Stop => {
            println!("Stopping Miktos Gateway...");
            match pid::read_pid() {
                Ok(process_id) => {
                    if pid::is_process_running(process_id) {
                        #[cfg(unix)]
                        {
                            use nix::sys::signal::{kill, Signal};
                            use nix::unistd::Pid;

                            if let Err(e) = kill(Pid::from_raw(process_id as i32), Signal::SIGTERM)
                            {
                                eprintln!("Failed to stop service: {}", e);
                            } else {
                                println!("Service stopped");
                                let _ = pid::cleanup_pid();
                            }
                        }
                        #[cfg(windows)]
                        {
                            use std::process::Command;
                            let _ = Command::new("taskkill")
                                .args(&["/PID", &process_id.to_string(), "/F"])
                                .output();
                            println!("Service stopped");
                            let _ = pid::cleanup_pid();
                        }
                    } else {
                        println!("Service is not running");
                        let _ = pid::cleanup_pid();
                    }
                }
                Err(_) => {
                    println!("Service is not running (no PID file found)");
                }
            }
        }
        Commands::Restart => {
            println!("Restarting Miktos Gateway...");

            match pid::read_pid() {
                Ok(process_id) => {
                    if pid::is_process_running(process_id) {
                        println!("Stopping existing service...");
                        #[cfg(unix)]
                        {
                            use nix::sys::signal::{kill, Signal};
                            use nix::unistd::Pid;

                            let _ = kill(Pid::from_raw(process_id as i32), Signal::SIGTERM);
                        }
                        #[cfg(windows)]
                        {
                            use std::process::Command;
                            let _ = Command::new("taskkill")
                                .args(&["/PID", &process_id.to_string(), "/F"])
                                .output();
                        }
                        // Wait a bit for the process to exit
                        tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
                    }
                }
                Err(_) => {
                    println!("No existing service found");
                }
            }
            let _ = pid::cleanup_pid();

            // Start the service detached
            println!("Starting service...");
            use std::process::Command;

            let exe_path = std::env::current_exe()?;
            let mut cmd = Command::new(&exe_path);
            cmd.arg("start");

            if let Some(config_path) = cli.config {
                cmd.arg("--config").arg(config_path);
            }

            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                unsafe {
                    cmd.pre_exec(|| {
                        // Create a new process group
                        nix::libc::setsid();
                        Ok(())
                    });
                }
            }

            cmd.stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null());

            match cmd.spawn() {
                Ok(_) => {
                    tokio::time::sleep(tokio::time::Duration::from_millis(1000)).await;
                    println!("Service restarted");
                }
                Err(e) => {
                    eprintln!("Failed to restart service: {}", e);
                }
            }
        }
        Commands::Status => {
            println!("Checking service status...");
            match pid::read_pid() {
                Ok(process_id) => {
                    if pid::is_process_running(process_id) {
                        println!("Service is running (PID: {})", process_id);
                    } else {
                        println!("Service is not running (stale PID file)");
                        let _ = pid::cleanup_pid();
                    }
                }
                Err(_) => {
                    println!("Service is not running");
                }
            }
        }
    }

    Ok(())
}

//! rcon-console
//!
//! Runs commands on a game server over Source RCON, either once from the
//! command line or interactively, one command per line of stdin.

use clap::Parser;
use rcon_console::{
    session::{Session, Submission},
    CommandClient, ConnectionSettings, RconConfig, RconResponse,
};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

/// Used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "info,rcon_console=debug";

/// rcon-console
#[derive(Parser, Debug)]
#[command(name = "rcon-console")]
#[command(about = "Run commands on a game server over Source RCON")]
#[command(version)]
struct Args {
    /// Server hostname or address
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// RCON port
    #[arg(short, long, default_value_t = 27015)]
    port: u16,

    /// RCON password
    #[arg(short = 'P', long, env = "RCON_PASSWORD", hide_env_values = true)]
    password: String,

    /// Timeout for opening the TCP connection, in milliseconds
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Timeout for the authentication handshake, in milliseconds
    #[arg(long, default_value_t = 5000)]
    auth_timeout_ms: u64,

    /// Timeout for a command's complete output, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    response_timeout_ms: u64,

    /// Print every result as a {"success", "data"} JSON object
    #[arg(long)]
    json: bool,

    /// Run this command and exit instead of reading commands from stdin
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

impl Args {
    fn config(&self) -> RconConfig {
        RconConfig::builder()
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .auth_timeout(Duration::from_millis(self.auth_timeout_ms))
            .response_timeout(Duration::from_millis(self.response_timeout_ms))
            .build()
    }

    fn settings(&self) -> ConnectionSettings {
        ConnectionSettings::new(self.host.clone(), self.port, self.password.clone())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let client = CommandClient::new(args.config());

    if let Err(err) = client.connect(args.settings()).await {
        tracing::error!("Failed to connect: {}", err);
        print_response(&RconResponse::failure(&err), args.json);
        return ExitCode::FAILURE;
    }

    let code = if args.command.is_empty() {
        run_interactive(&client, args.json).await
    } else {
        run_once(&client, &args.command.join(" "), args.json).await
    };

    client.disconnect().await;
    code
}

async fn run_once(client: &CommandClient, command: &str, json: bool) -> ExitCode {
    let response = match client.execute(command).await {
        Ok(output) => RconResponse::success(output),
        Err(err) => RconResponse::failure(&err),
    };
    print_response(&response, json);

    if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_interactive(client: &CommandClient, json: bool) -> ExitCode {
    let mut session = Session::new(client.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return ExitCode::SUCCESS,
            Err(err) => {
                tracing::error!("Failed to read stdin: {}", err);
                return ExitCode::FAILURE;
            }
        };

        match session.submit(&line).await {
            Ok(Submission::Output(entry)) => {
                print_response(&RconResponse::success(entry.result), json);
            }
            Ok(Submission::Cleared) => tracing::info!("History cleared"),
            Ok(Submission::Ignored) => {}
            Err(err) => {
                print_response(&RconResponse::failure(&err), json);
                if err.is_fatal() {
                    return ExitCode::FAILURE;
                }
            }
        }
    }
}

fn print_response(response: &RconResponse, json: bool) {
    if json {
        match response.to_json() {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::error!("Failed to encode response: {}", err),
        }
    } else if response.success {
        println!("{}", response.data.trim_end());
    } else {
        eprintln!("error: {}", response.data);
    }
}

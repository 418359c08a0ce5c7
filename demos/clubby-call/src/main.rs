//! Send one command to a Clubby peer and print the response.
//!
//! ```text
//! CLUBBY_DEVICE_ID=//api.cesanta.com/d/dev1 CLUBBY_DEVICE_PSK=secret \
//!     clubby-call /v1/Hello '{"name": "world"}'
//! ```

use std::process::ExitCode;

use clap::Parser;
use clubby::prelude::*;
use clubby::ClubbyConfig;
use serde_json::Value;

/// Issue a single Clubby command and print the response as JSON
#[derive(Parser, Debug)]
#[command(name = "clubby-call")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Command name, e.g. /v1/Hello
    command: String,

    /// Command arguments as JSON
    #[arg(value_parser = parse_json)]
    args: Option<Value>,

    /// Destination address (default: the backend)
    #[arg(short, long)]
    dst: Option<String>,

    /// WebSocket server address [env: CLUBBY_SERVER]
    #[arg(short, long)]
    server: Option<String>,

    /// Backend address [env: CLUBBY_BACKEND]
    #[arg(short, long)]
    backend: Option<String>,

    /// Device id [env: CLUBBY_DEVICE_ID]
    #[arg(long)]
    device_id: Option<String>,

    /// Device pre-shared key [env: CLUBBY_DEVICE_PSK]
    #[arg(long)]
    psk: Option<String>,

    /// Response timeout in seconds, 0 for none [env: CLUBBY_TIMEOUT_SECS]
    #[arg(short, long)]
    timeout: Option<u32>,
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("arguments are not valid JSON: {e}"))
}

impl Cli {
    fn config(&self) -> Result<ClubbyConfig, clubby::ConfigError> {
        let mut builder = ClubbyBuilder::from_env()?;
        if let Some(server) = &self.server {
            builder = builder.server_address(server);
        }
        if let Some(backend) = &self.backend {
            builder = builder.backend(backend);
        }
        if let Some(id) = &self.device_id {
            builder = builder.device_id(id);
        }
        if let Some(psk) = &self.psk {
            builder = builder.device_psk(psk);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout_secs(timeout);
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    clubby::tracing_setup::init_tracing();
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(response) => {
            match serde_json::to_string_pretty(&response) {
                Ok(text) => println!("{text}"),
                Err(_) => println!("{response}"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("clubby-call: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<Value, Box<dyn std::error::Error>> {
    let config = cli.config()?;
    tracing::info!(server = %config.server_address, command = %cli.command, "connecting");

    let clubby = Clubby::new(config);
    clubby.connect_and_wait().await?;

    let args = cli.args.clone().unwrap_or(Value::Null);
    let dst = cli.dst.clone().unwrap_or_else(|| clubby.backend().to_string());
    let reply = clubby.request::<_, Value>(&dst, &cli.command, &args, None)?;
    let result = reply.await;

    clubby.close().await?;
    Ok(result?)
}

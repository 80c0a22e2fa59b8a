//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod chat;
pub mod say;
pub mod serve;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::core::config::data::path_display;
use crate::core::config::{Config, ConfigOverrides};
use crate::core::gateway::gemini::GeminiGateway;
use crate::core::gateway::relay::RelayGateway;
use crate::core::gateway::ModelGateway;
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "sifra")]
#[command(about = "Streaming chat with Gemini from the terminal, or as an HTTP relay")]
#[command(
    long_about = "Sifra streams chat completions from Google's Gemini API. It can answer a \
single prompt, run a line-oriented chat session, or serve a plain-text streaming relay \
endpoint for other clients.\n\n\
Environment Variables:\n\
  GEMINI_API_KEY    Your Gemini API key (the variable name is configurable)\n\
  RUST_LOG          Diagnostic log filter (defaults to sifra=info)\n\n\
Chat commands:\n\
  /regenerate       Ask again for the last answer\n\
  /quit             Leave the session\n\
  Ctrl+C            Stop the answer being streamed"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use (e.g. gemini-pro)
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Root URL of the generative-language API
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// System instruction sent with every request
    #[arg(short = 's', long = "system", global = true, value_name = "TEXT")]
    pub system_prompt: Option<String>,

    /// Address for `serve` to listen on
    #[arg(long, global = true, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a line-oriented chat session (default)
    Chat {
        /// Send requests through a running `sifra serve` instance at this URL
        #[arg(long, value_name = "URL")]
        server: Option<String>,
        /// Append the transcript to this file
        #[arg(short = 'l', long, value_name = "FILE")]
        log: Option<PathBuf>,
    },
    /// Answer a single prompt and exit
    Say {
        /// The prompt (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
        /// Wait for the full answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Serve the streaming relay endpoint over HTTP
    Serve,
    /// Show the configuration file location and effective settings
    Config {
        /// Save the effective settings (including flag overrides) to the file
        #[arg(long)]
        write: bool,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            system_prompt: self.system_prompt.clone(),
            bind: self.bind.clone(),
        }
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::get_config_path()?,
    };
    let mut config = Config::load_from_path(&config_path)?;
    config.apply_overrides(args.overrides());
    debug!(path = %path_display(&config_path), model = config.model(), "configuration loaded");

    match args.command {
        Some(Commands::Say { prompt, no_stream }) => {
            let gateway = gemini_gateway(&config);
            let prompt = prompt.join(" ");
            let mut stdout = std::io::stdout();
            say::run_say(gateway, &prompt, config.system_prompt(), no_stream, &mut stdout).await
        }
        Some(Commands::Serve) => serve::run_serve(&config).await,
        Some(Commands::Config { write }) => {
            if write {
                config.save_to_path(&config_path)?;
                println!("Saved configuration to {}", path_display(&config_path));
            } else {
                print_config(&config, &config_path);
            }
            Ok(())
        }
        Some(Commands::Chat { server, log }) => {
            let gateway = match server {
                Some(url) => relay_gateway(url),
                None => gemini_gateway(&config),
            };
            chat::run_chat(gateway, config.system_prompt(), log).await
        }
        None => chat::run_chat(gemini_gateway(&config), config.system_prompt(), None).await,
    }
}

fn gemini_gateway(config: &Config) -> Arc<dyn ModelGateway> {
    Arc::new(GeminiGateway::from_config(reqwest::Client::new(), config))
}

fn relay_gateway(url: String) -> Arc<dyn ModelGateway> {
    Arc::new(RelayGateway::new(reqwest::Client::new(), url))
}

fn print_config(config: &Config, path: &std::path::Path) {
    println!("Config file: {}", path_display(path));
    println!("  model: {}", config.model());
    println!("  base_url: {}", config.base_url());
    println!("  system_prompt: {}", config.system_prompt());
    println!("  bind: {}", config.bind());
    let key_status = if config.api_key().is_some() {
        "set"
    } else {
        "not set"
    };
    println!("  api_key_env: {} ({key_status})", config.api_key_env());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_become_overrides() {
        let args = Args::try_parse_from([
            "sifra",
            "say",
            "--model",
            "gemini-1.5-flash",
            "--system",
            "Be brief.",
            "hello",
            "there",
        ])
        .expect("valid arguments");

        let overrides = args.overrides();
        assert_eq!(overrides.model.as_deref(), Some("gemini-1.5-flash"));
        assert_eq!(overrides.system_prompt.as_deref(), Some("Be brief."));
        assert!(overrides.base_url.is_none());
        match args.command {
            Some(Commands::Say { prompt, no_stream }) => {
                assert_eq!(prompt, vec!["hello", "there"]);
                assert!(!no_stream);
            }
            _ => panic!("expected say command"),
        }
    }

    #[test]
    fn chat_accepts_relay_server_and_log() {
        let args = Args::try_parse_from([
            "sifra",
            "chat",
            "--server",
            "http://127.0.0.1:3000",
            "--log",
            "chat.log",
        ])
        .expect("valid arguments");

        match args.command {
            Some(Commands::Chat { server, log }) => {
                assert_eq!(server.as_deref(), Some("http://127.0.0.1:3000"));
                assert_eq!(log, Some(PathBuf::from("chat.log")));
            }
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn say_requires_a_prompt() {
        assert!(Args::try_parse_from(["sifra", "say"]).is_err());
    }
}

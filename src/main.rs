use anyhow::Result;
use artifacts_keyring::config::{load_settings, Settings};
use artifacts_keyring::{logging, ArtifactsKeyring, KeyringBackend};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "artifacts-keyring")]
#[command(version, about = "Credentials for Azure Artifacts package feeds")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML settings file; environment variables still override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the password for a feed URL
    Get {
        service: String,
        #[arg(default_value = "")]
        username: String,
    },

    /// Print username and password, one per line
    Credential {
        service: String,
        #[arg(long)]
        username: Option<String>,
    },

    /// Remove stored credentials for a feed URL
    Del { service: String, username: String },
}

fn main() -> Result<ExitCode> {
    logging::init()?;

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => load_settings(path)?,
        None => Settings::from_env(),
    };
    let keyring = ArtifactsKeyring::from_settings(settings)?;

    match cli.command {
        Command::Get { service, username } => match keyring.get_password(&service, &username)? {
            Some(password) => {
                println!("{}", password);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("No credentials for {}", service);
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Credential { service, username } => {
            match keyring.get_credential(&service, username.as_deref())? {
                Some(credential) => {
                    println!("{}", credential.username);
                    println!("{}", credential.secret.expose());
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("No credentials for {}", service);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Del { service, username } => {
            keyring.delete_password(&service, &username)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

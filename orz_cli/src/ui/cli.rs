use clap::{Parser, Subcommand};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use log::info;
use orz_core::connections::endpoint::instance_id_from_attach_url;
use orz_core::{
    AttachExit, CloudConfig, CloudError, CloudManager, Credential, RemoteInstance, TunnelSession,
};
use tokio::io;

/// Enable raw mode via crossterm.
/// This disables line-buffering and echo on all supported platforms.
fn set_raw_mode() -> Result<(), CloudError> {
    enable_raw_mode().map_err(CloudError::Terminal)
}

/// Restore normal terminal mode.
fn restore_mode() {
    let _ = disable_raw_mode();
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "orz", version, about = "Run and attach to orz cloud instances", subcommand_required = true)]
pub struct Args {
    /// Control-plane base URL [default: $ORZBOB_API_URL, else the public control plane]
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,
    /// Log debug output to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Exchange a GitHub token for an API token and store it
    Login {
        /// GitHub access token, or an API token with --no-exchange
        #[arg(long, env = "ORZBOB_TOKEN", hide_env_values = true)]
        token: String,
        /// Store --token as the API token without asking the control plane
        #[arg(long)]
        no_exchange: bool,
        /// Days until a --no-exchange token expires
        #[arg(long, default_value_t = 90)]
        expires_in_days: i64,
    },
    /// Forget the stored API token
    Logout,
    /// Show who the stored token belongs to
    Whoami,
    /// Manage cloud instances
    #[command(subcommand)]
    Cloud(CloudCommand),
}

#[derive(Subcommand, Debug)]
pub enum CloudCommand {
    /// List your instances
    List,
    /// Create an instance and attach to it
    New {
        /// Instance size
        #[arg(long, default_value = "small")]
        tier: String,
        /// Only create, do not attach
        #[arg(long)]
        no_attach: bool,
    },
    /// Attach to an instance by id or attach URL
    Attach {
        /// Instance id, or a full attach URL
        target: String,
    },
    /// Delete an instance
    Kill {
        /// Instance id
        id: String,
    },
}

pub async fn run_cli(args: Args) -> Result<(), CloudError> {
    let config = match args.api_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => CloudConfig::new(url)?,
        _ => CloudConfig::from_env()?,
    };
    info!("Using control plane {}", config.api_url);
    let manager = CloudManager::new(config)?;

    let result = match args.command {
        Command::Login {
            token,
            no_exchange,
            expires_in_days,
        } => {
            if no_exchange {
                store_api_token(&manager, &token, expires_in_days)
            } else {
                login(&manager, &token).await
            }
        }
        Command::Logout => {
            if manager.logout()? {
                println!("Logged out.");
            } else {
                println!("Not logged in.");
            }
            Ok(())
        }
        Command::Whoami => whoami(&manager),
        Command::Cloud(cmd) => run_cloud(&manager, cmd).await,
    };

    manager.close_all().await;
    result
}

async fn login(manager: &CloudManager, github_token: &str) -> Result<(), CloudError> {
    let github_token = github_token.trim();
    if github_token.is_empty() {
        return Err(CloudError::Config("empty GitHub token".into()));
    }
    let credential = manager.exchange_token(github_token).await?;
    let user = credential.user.unwrap_or_default();
    println!("Logged in. Token expires {}.", credential.expires_at.format("%Y-%m-%d"));
    if !user.org_id.is_empty() {
        println!("Organization: {}", user.org_id);
    }
    if !user.plan.is_empty() {
        println!("Plan:         {}", user.plan);
    }
    Ok(())
}

fn store_api_token(
    manager: &CloudManager,
    token: &str,
    expires_in_days: i64,
) -> Result<(), CloudError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(CloudError::Config("empty API token".into()));
    }
    if expires_in_days <= 0 {
        return Err(CloudError::Config("--expires-in-days must be positive".into()));
    }
    let credential = Credential::valid_for(token, chrono::Duration::days(expires_in_days));
    manager.login(&credential)?;
    println!(
        "Logged in. Token expires {}.",
        credential.expires_at.format("%Y-%m-%d")
    );
    Ok(())
}

fn whoami(manager: &CloudManager) -> Result<(), CloudError> {
    let credential = manager.whoami()?;
    match &credential.user {
        Some(user) if !user.login.is_empty() => {
            println!("Logged in as {}", user.login);
            if !user.email.is_empty() {
                println!("Email:   {}", user.email);
            }
            if !user.org_id.is_empty() {
                println!("Org:     {}", user.org_id);
            }
            if !user.plan.is_empty() {
                println!("Plan:    {}", user.plan);
            }
        }
        _ => println!("Logged in (no account details stored)"),
    }
    println!(
        "Expires: {}",
        credential.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}

async fn run_cloud(manager: &CloudManager, cmd: CloudCommand) -> Result<(), CloudError> {
    match cmd {
        CloudCommand::List => {
            let instances = manager.list_instances().await?;
            print_instances(&instances);
        }
        CloudCommand::New { tier, no_attach } => {
            let instance = manager.create_instance(&tier).await?;
            println!("Created instance {} ({})", instance.id, instance.tier);
            match instance.attach_url.as_deref() {
                Some(url) if !no_attach && !url.is_empty() => {
                    let session = manager.attach_url(&instance.id, url).await?;
                    run_interactive(manager, session).await?;
                }
                _ => println!("Attach with: orz cloud attach {}", instance.id),
            }
        }
        CloudCommand::Attach { target } => {
            let session = if target.contains("://") {
                let id = instance_id_from_attach_url(&target).ok_or_else(|| {
                    CloudError::Protocol("no instance id in attach URL".into())
                })?;
                manager.attach_url(&id, &target).await?
            } else {
                manager.attach(&target).await?
            };
            run_interactive(manager, session).await?;
        }
        CloudCommand::Kill { id } => {
            manager.delete_instance(&id).await?;
            println!("Instance {id} deleted.");
        }
    }
    Ok(())
}

fn print_instances(instances: &[RemoteInstance]) {
    if instances.is_empty() {
        println!("No instances.");
        return;
    }
    println!("{:<38} {:<12} {:<8} CREATED", "ID", "STATUS", "TIER");
    for instance in instances {
        let created = instance
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<38} {:<12} {:<8} {}",
            instance.id,
            instance.status.to_string(),
            instance.tier,
            created
        );
    }
}

/// Bridges the terminal to `session` until detach, Ctrl+C or remote close.
///
/// Ctrl+A then 'x' detaches. The session is closed afterwards either way.
async fn run_interactive(manager: &CloudManager, session: TunnelSession) -> Result<(), CloudError> {
    let id = session.instance_id().to_string();
    eprintln!("Attached to {id}. Press Ctrl+A then 'x' to detach.");
    set_raw_mode()?;
    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let exit = manager
        .run_attached(session, io::stdin(), io::stdout(), cancel)
        .await;
    restore_mode();
    info!("Terminal mode restored.");

    match exit? {
        AttachExit::Detached => eprintln!("\nDetached from {id}."),
        AttachExit::Cancelled => eprintln!("\nInterrupted."),
        AttachExit::RemoteClosed => eprintln!("\nConnection to {id} closed."),
    }
    Ok(())
}

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use scholaris_auth::{Capability, NavNode, navigation};
use scholaris_core::{MenuId, SubmenuId};
use scholaris_observability::LogFormat;
use scholaris_session::{Access, Authority, SessionConfig, SessionSnapshot, VerifyOutcome};

#[derive(Parser)]
#[command(name = "scholaris", about = "Session and permission client for Scholaris")]
struct Cli {
    /// Base URL of the authority (overrides SCHOLARIS_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Token file (overrides SCHOLARIS_TOKEN_PATH).
    #[arg(long, global = true)]
    token_path: Option<PathBuf>,

    /// Default log directive when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and store the session token.
    Login {
        /// E-mail or username.
        identifier: String,

        #[arg(long, env = "SCHOLARIS_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Verify the stored token and print the user and navigation.
    Status {
        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check one capability on a menu or submenu.
    Can {
        menu: MenuId,

        #[arg(long)]
        submenu: Option<SubmenuId>,

        /// view | create | edit | delete (ver, crear, editar, eliminar).
        capability: Capability,

        /// Print the full explanation as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Re-read the user record of the current session.
    Refresh,

    /// Remove the stored token.
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    scholaris_observability::tracing::init(LogFormat::Compact, &cli.log);

    let mut config = SessionConfig::from_env();
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(path) = cli.token_path {
        config.token_path = path;
    }
    tracing::debug!(api_url = %config.api_url, token_path = %config.token_path.display(), "configuration loaded");

    let authority = Authority::from_config(&config);

    match cli.command {
        Command::Login {
            identifier,
            password,
        } => {
            let user = match authority.login(&identifier, &password).await {
                Ok(user) => user,
                Err(err) if err.is_rejection() => {
                    eprintln!("Login refused: {err}");
                    return Ok(ExitCode::FAILURE);
                }
                Err(err) => return Err(err).context("login failed"),
            };
            println!("Signed in as {} <{}> ({})", user.full_name(), user.email, user.role_name);
            print_navigation(&authority.snapshot());
            Ok(ExitCode::SUCCESS)
        }

        Command::Status { json } => {
            let outcome = authority.verify_session().await;
            let snapshot = authority.snapshot();

            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
                return Ok(exit_for(snapshot.is_authenticated()));
            }

            match outcome {
                VerifyOutcome::Anonymous => println!("Not signed in"),
                VerifyOutcome::Rejected(err) => println!("Not signed in ({err})"),
                VerifyOutcome::Verified | VerifyOutcome::Superseded => {
                    if let Some(user) = &snapshot.user {
                        println!("Signed in as {} <{}> ({})", user.full_name(), user.email, user.role_name);
                        print_navigation(&snapshot);
                    }
                }
            }
            Ok(exit_for(snapshot.is_authenticated()))
        }

        Command::Can {
            menu,
            submenu,
            capability,
            json,
        } => {
            authority.verify_session().await;
            let snapshot = authority.snapshot();
            let node = match submenu {
                Some(submenu) => NavNode::submenu(menu, submenu),
                None => NavNode::menu(menu),
            };

            let access = snapshot.gate(node, capability);
            if json {
                let explanation = snapshot.permissions.explain(node, capability);
                println!("{}", serde_json::to_string_pretty(&explanation)?);
            } else {
                match access {
                    Access::Allowed => println!("allowed: {capability} on {node}"),
                    Access::Denied if snapshot.user.is_none() => {
                        println!("denied: not signed in")
                    }
                    Access::Denied | Access::Pending => {
                        let explanation = snapshot.permissions.explain(node, capability);
                        println!("denied: {}", explanation.reason);
                    }
                }
            }
            Ok(exit_for(access == Access::Allowed))
        }

        Command::Refresh => {
            if !matches!(authority.verify_session().await, VerifyOutcome::Verified) {
                println!("Not signed in");
                return Ok(ExitCode::FAILURE);
            }

            match authority.refresh_user().await.context("refresh failed")? {
                Some(user) => println!("Refreshed {} <{}>", user.full_name(), user.email),
                None => println!("Session changed during refresh; nothing updated"),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Logout => {
            authority.logout();
            println!("Signed out");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn exit_for(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn print_navigation(snapshot: &SessionSnapshot) {
    let menus = navigation(&snapshot.permissions);
    if menus.is_empty() {
        println!("(no viewable menus)");
        return;
    }

    for menu in menus {
        let marker = if menu.viewable { "" } else { " (submenus only)" };
        println!("  [{}] {} {}{}", menu.menu_id, menu.name, menu.route, marker);
        for submenu in menu.submenus {
            println!("      [{}] {} {}", submenu.submenu_id, submenu.name, submenu.route);
        }
    }
}

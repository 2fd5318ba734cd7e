//! CLI commands for plugin management.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result, bail},
    clap::Subcommand,
    iitcm_core::{Manager, PluginAction, UserScript},
};

#[derive(Subcommand)]
pub enum PluginCommand {
    /// List the plugins of the current channel.
    List {
        /// Show only enabled plugins.
        #[arg(long)]
        enabled: bool,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the stored record of a plugin.
    Info {
        /// Plugin uid.
        uid: String,
    },
    /// Enable a plugin, downloading it first if needed.
    On { uid: String },
    /// Disable a plugin.
    Off { uid: String },
    /// Delete a user plugin (restores the catalog version it shadowed).
    Delete { uid: String },
    /// Install or refresh user scripts from files.
    Add {
        /// `.user.js` files.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

pub async fn handle_plugins(manager: &Arc<Manager>, action: PluginCommand) -> Result<()> {
    match action {
        PluginCommand::List { enabled, json } => {
            let plugins = manager.plugins().await?;
            let plugins = plugins
                .iter()
                .filter(|(_, p)| !enabled || p.is_on())
                .map(|(uid, p)| (uid.clone(), p.clone()));

            if json {
                let entries: serde_json::Map<String, serde_json::Value> = plugins
                    .map(|(uid, mut p)| {
                        p.code = None;
                        Ok::<_, serde_json::Error>((uid, serde_json::to_value(p)?))
                    })
                    .collect::<Result<_, serde_json::Error>>()?;
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            let mut count = 0usize;
            for (uid, p) in plugins {
                let mark = if p.is_on() {
                    "on "
                } else {
                    "off"
                };
                let origin = match (p.user, p.overridden) {
                    (true, true) => " [override]",
                    (true, false) => " [user]",
                    _ => "",
                };
                println!(
                    "  {mark} {uid} {version} ({category}){origin}",
                    version = p.version.as_deref().unwrap_or("-"),
                    category = p.category.as_deref().unwrap_or("-"),
                );
                count += 1;
            }
            if count == 0 {
                println!("No plugins. Run `iitcm run --once` to fetch the catalog.");
            }
        },
        PluginCommand::Info { uid } => {
            let Some(mut plugin) = manager.get_plugin_info(&uid).await? else {
                bail!("plugin not found: {uid}");
            };
            plugin.code = None;
            println!("{}", serde_json::to_string_pretty(&plugin)?);
        },
        PluginCommand::On { uid } => {
            manager.manage_plugin(&uid, PluginAction::On).await?;
            report(manager, &uid).await?;
        },
        PluginCommand::Off { uid } => {
            manager.manage_plugin(&uid, PluginAction::Off).await?;
            report(manager, &uid).await?;
        },
        PluginCommand::Delete { uid } => {
            manager.manage_plugin(&uid, PluginAction::Delete).await?;
            println!("Deleted {uid}");
        },
        PluginCommand::Add { paths } => {
            let mut scripts = Vec::with_capacity(paths.len());
            for path in &paths {
                let code = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let Some(script) = UserScript::from_code(code) else {
                    bail!("{}: no ==UserScript== header", path.display());
                };
                scripts.push(script);
            }
            let added = manager.add_user_scripts(scripts).await?;
            for (uid, p) in &added {
                println!(
                    "  + {uid} {}",
                    p.version.as_deref().unwrap_or("-"),
                );
            }
        },
    }
    Ok(())
}

async fn report(manager: &Manager, uid: &str) -> Result<()> {
    match manager.get_plugin_info(uid).await? {
        Some(p) => println!("{uid}: {}", if p.is_on() { "on" } else { "off" }),
        None => println!("{uid}: gone"),
    }
    Ok(())
}

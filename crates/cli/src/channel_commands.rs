//! CLI subcommands for update channels and check intervals.

use std::sync::Arc;

use {
    anyhow::Result,
    clap::Subcommand,
    iitcm_core::{Channel, Manager},
};

#[derive(Subcommand)]
pub enum ChannelAction {
    /// Show the current channel and repository URLs.
    Status,
    /// Switch to another channel and reconcile it.
    Switch {
        /// release, beta or custom.
        channel: Channel,
    },
    /// Point the custom channel at another repository.
    SetUrl { url: String },
    /// Set how often a channel's catalog is checked.
    Interval {
        /// Period in seconds.
        secs: u64,
        /// Channel to configure (defaults to the current one).
        #[arg(long)]
        channel: Option<Channel>,
        /// Configure the external user-script check instead.
        #[arg(long, conflicts_with = "channel")]
        external: bool,
    },
}

pub async fn handle_channel(manager: &Arc<Manager>, action: ChannelAction) -> Result<()> {
    match action {
        ChannelAction::Status => {
            manager.init().await?;
            let current = manager.channel();
            let hosts = manager.network_host();
            for channel in Channel::ALL {
                let mark = if channel == current {
                    "*"
                } else {
                    " "
                };
                println!("{mark} {channel:<8} {}", hosts.get(channel));
            }
        },
        ChannelAction::Switch { channel } => {
            manager.set_channel(channel).await?;
            println!("Switched to {channel}");
        },
        ChannelAction::SetUrl { url } => {
            manager.set_custom_channel_url(&url).await?;
            println!("custom -> {url}");
        },
        ChannelAction::Interval {
            secs,
            channel,
            external,
        } => {
            if external {
                manager.set_external_update_check_interval(secs).await?;
            } else {
                manager.init().await?;
                let channel = channel.unwrap_or_else(|| manager.channel());
                manager.set_update_check_interval(secs, channel).await?;
            }
        },
    }
    Ok(())
}

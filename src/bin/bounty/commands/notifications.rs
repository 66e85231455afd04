//! Notification inbox command

use crate::client::BountyClient;
use crate::style::*;
use anyhow::Result;

pub async fn run(client: &BountyClient, unread_only: bool, mark_read: bool) -> Result<()> {
    client.actor()?;
    let notifications: Vec<_> = client
        .notifications()
        .await?
        .into_iter()
        .filter(|n| !unread_only || !n.is_read)
        .collect();

    print_header("Notifications");
    if notifications.is_empty() {
        print_info("Nothing new.");
        return Ok(());
    }

    for notification in &notifications {
        let title = if notification.is_read {
            style_dim(&notification.title)
        } else {
            style_bold(&notification.title)
        };
        println!(
            "{}  {:<20}  {}",
            style_dim(&notification.record.created_at.format("%m-%d %H:%M").to_string()),
            notification.kind.as_str(),
            title
        );
    }

    if mark_read {
        for notification in notifications.iter().filter(|n| !n.is_read) {
            client.mark_read(notification.record.id).await?;
        }
        println!();
        print_success("Marked as read");
    }
    Ok(())
}

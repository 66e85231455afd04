//! Application commands

use crate::client::BountyClient;
use crate::style::*;
use anyhow::Result;
use uuid::Uuid;

pub async fn apply(client: &BountyClient, bounty_id: Uuid, note: Option<String>) -> Result<()> {
    client.actor()?;
    let application = client.apply(bounty_id, note).await?;
    print_success(&format!(
        "Applied to bounty {} (application {})",
        short_id(&bounty_id),
        application.id()
    ));
    Ok(())
}

pub async fn approve(client: &BountyClient, application_id: Uuid) -> Result<()> {
    client.actor()?;
    let application = client.approve(application_id).await?;
    print_success(&format!(
        "Approved {}; they are now the receiver of bounty {}",
        application.user_id,
        short_id(&application.bounty_id)
    ));
    Ok(())
}

pub async fn reject(client: &BountyClient, application_id: Uuid) -> Result<()> {
    client.actor()?;
    client.reject(application_id).await?;
    print_success(&format!("Rejected application {}", short_id(&application_id)));
    Ok(())
}

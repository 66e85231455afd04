//! Like, rate and comment commands

use crate::client::BountyClient;
use crate::style::*;
use anyhow::Result;
use uuid::Uuid;

pub async fn like(client: &BountyClient, bounty_id: Uuid) -> Result<()> {
    client.actor()?;
    client.like(bounty_id).await?;
    print_success("Liked");
    Ok(())
}

pub async fn unlike(client: &BountyClient, bounty_id: Uuid) -> Result<()> {
    client.actor()?;
    client.unlike(bounty_id).await?;
    print_success("Like removed");
    Ok(())
}

pub async fn rate(client: &BountyClient, bounty_id: Uuid, score: f64) -> Result<()> {
    client.actor()?;
    let rating = client.rate(bounty_id, score).await?;
    print_success(&format!("Rated {:.1}", rating.score));

    let interaction = client.interaction(bounty_id).await?;
    if interaction.liked {
        print_info("You also like this bounty");
    }
    Ok(())
}

pub async fn comment(client: &BountyClient, bounty_id: Uuid, content: &str) -> Result<()> {
    client.actor()?;
    client.comment(bounty_id, content).await?;
    print_success("Comment posted");
    Ok(())
}

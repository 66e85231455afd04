//! Milestone confirmation and settlement commands

use crate::client::{BountyClient, CancelRole};
use crate::style::*;
use anyhow::Result;
use bounty_market::models::Bounty;
use uuid::Uuid;

fn report(action: &str, bounty: &Bounty) {
    print_success(&format!(
        "{}: bounty {} is now {}",
        action,
        short_id(&bounty.id()),
        style_status(bounty.status)
    ));
}

pub async fn confirm(client: &BountyClient, bounty_id: Uuid) -> Result<()> {
    client.actor()?;
    let bounty = client.confirm(bounty_id).await?;
    report("Milestones confirmed", &bounty);
    Ok(())
}

pub async fn verify(client: &BountyClient, bounty_id: Uuid) -> Result<()> {
    client.actor()?;
    let bounty = client.verify(bounty_id).await?;
    report("Milestones verified", &bounty);
    Ok(())
}

pub async fn request_settlement(client: &BountyClient, bounty_id: Uuid) -> Result<()> {
    client.actor()?;
    let bounty = client.request_settlement(bounty_id).await?;
    report("Settlement requested", &bounty);
    Ok(())
}

/// Cancels as publisher or receiver, whichever the actor is
pub async fn cancel(client: &BountyClient, bounty_id: Uuid) -> Result<()> {
    let actor = client.actor()?;
    let bounty = client.get_bounty(bounty_id).await?;
    let role = if bounty.is_publisher(actor) {
        CancelRole::Publisher
    } else {
        CancelRole::Receiver
    };

    let bounty = client.cancel(bounty_id, role).await?;
    report("Settlement cancelled", &bounty);
    Ok(())
}

pub async fn settle(client: &BountyClient, bounty_id: Uuid) -> Result<()> {
    client.actor()?;
    let settlement = client.settle(bounty_id).await?;

    print_header("Settlement");
    for payout in &settlement.payouts {
        println!(
            "{}  {:>10}",
            payout.user_id,
            style_green(&payout.amount.to_string())
        );
    }
    println!();
    print_success(&format!(
        "Paid {} to {} applicant(s)",
        settlement.payouts.iter().map(|p| p.amount).sum::<i64>(),
        settlement.payouts.len()
    ));
    Ok(())
}

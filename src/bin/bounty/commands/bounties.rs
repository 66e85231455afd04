//! Bounty listing and detail commands

use crate::client::BountyClient;
use crate::style::*;
use anyhow::Result;
use bounty_market::models::{BountyFilter, BountyStatus};
use uuid::Uuid;

pub async fn list(
    client: &BountyClient,
    status: Option<BountyStatus>,
    mine: bool,
    limit: Option<u32>,
) -> Result<()> {
    let filter = BountyFilter {
        status,
        publisher_id: if mine { Some(client.actor()?) } else { None },
        limit,
        ..Default::default()
    };
    let bounties = client.list_bounties(&filter).await?;

    print_header("Bounties");
    if bounties.is_empty() {
        print_info("No bounties match.");
        return Ok(());
    }

    println!();
    println!(
        "{:<8}  {:<32}  {:>10}  {:>6}  Status",
        "ID", "Title", "Reward", "Likes"
    );
    println!("{}", "─".repeat(75));

    for bounty in &bounties {
        println!(
            "{:<8}  {:<32}  {:>10}  {:>6}  {}",
            style_dim(&short_id(&bounty.id())),
            truncate(&bounty.title, 32),
            bounty.reward,
            bounty.likes_count,
            style_status(bounty.status)
        );
    }

    println!();
    println!("Total: {}", bounties.len());
    Ok(())
}

pub async fn show(client: &BountyClient, id: Uuid) -> Result<()> {
    let bounty = client.get_bounty(id).await?;
    let milestones = client.get_milestones(id).await?;
    let approved = client.get_public_applications(id).await?;
    let comments = client.get_comments(id).await?;

    print_header(&bounty.title);
    if !bounty.description.is_empty() {
        println!("{}", bounty.description);
        println!();
    }
    println!("ID:        {}", bounty.id());
    println!("Status:    {}", style_status(bounty.status));
    println!("Payment:   {}", bounty.payment_status);
    println!("Reward:    {}", style_bold(&bounty.reward.to_string()));
    println!("Deadline:  {}", bounty.deadline.format("%Y-%m-%d %H:%M UTC"));
    println!("Publisher: {}", bounty.publisher_id);
    match bounty.receiver_id {
        Some(receiver) => println!("Receiver:  {}", style_cyan(&receiver.to_string())),
        None => println!("Receiver:  {}", style_dim("unassigned")),
    }
    println!(
        "Activity:  {} likes, {} comments, {} views, rated {:.1} ({})",
        bounty.likes_count,
        bounty.comments_count,
        bounty.view_count,
        bounty.average_rating,
        bounty.rating_count
    );

    if !milestones.is_empty() {
        print_header("Milestones");
        for milestone in &milestones {
            let mark = if milestone.is_completed {
                style_green("✓")
            } else {
                style_dim("○")
            };
            println!(
                "{} {}  {}",
                mark,
                milestone.title,
                style_dim(&milestone.due_date.format("%Y-%m-%d").to_string())
            );
        }
    }

    if !approved.is_empty() {
        print_header("Approved applicants");
        for application in &approved {
            println!("{}  {}", short_id(&application.id()), application.user_id);
        }
    }

    if !comments.is_empty() {
        print_header("Comments");
        for comment in comments.iter().take(10) {
            println!(
                "{}  {}",
                style_dim(&short_id(&comment.user_id)),
                truncate(&comment.content, 70)
            );
        }
    }

    Ok(())
}

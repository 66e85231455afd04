//! Bounty Market API Client
//!
//! Thin reqwest wrapper over the server's JSON routes. The acting user is
//! sent in the `x-actor-id` header on every request.

use anyhow::{anyhow, Context, Result};
use bounty_market::models::{
    Application, Bounty, BountyFilter, BountyInteraction, Comment, Milestone, Notification, Rating,
};
use bounty_market::server::{ErrorBody, ACTOR_HEADER};
use bounty_market::settlement::Settlement;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Which side of a settling bounty is cancelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRole {
    Publisher,
    Receiver,
}

impl CancelRole {
    fn path(self) -> &'static str {
        match self {
            CancelRole::Publisher => "publisher",
            CancelRole::Receiver => "receiver",
        }
    }
}

pub struct BountyClient {
    client: Client,
    base_url: String,
    actor: Option<Uuid>,
}

impl BountyClient {
    pub fn new(base_url: &str, actor: Option<Uuid>) -> Self {
        // Build HTTP client with timeout, falling back to default client if builder fails
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            actor,
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn actor(&self) -> Result<Uuid> {
        self.actor
            .ok_or_else(|| anyhow!("No actor set; pass --actor or set BOUNTY_ACTOR"))
    }

    fn with_actor(&self, request: RequestBuilder) -> RequestBuilder {
        match self.actor {
            Some(actor) => request.header(ACTOR_HEADER, actor.to_string()),
            None => request,
        }
    }

    async fn check(what: &str, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let error_text = resp.text().await.unwrap_or_else(|_| "Unknown error".into());
        let message = serde_json::from_str::<ErrorBody>(&error_text)
            .map(|body| body.message)
            .unwrap_or(error_text);
        Err(anyhow!("{} failed ({}): {}", what, status, message))
    }

    async fn fetch<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<T> {
        let resp = self.with_actor(request).send().await?;
        let resp = Self::check(what, resp).await?;
        resp.json()
            .await
            .with_context(|| format!("{}: unexpected response body", what))
    }

    async fn execute(&self, what: &str, request: RequestBuilder) -> Result<()> {
        let resp = self.with_actor(request).send().await?;
        Self::check(what, resp).await?;
        Ok(())
    }

    // Bounties

    pub async fn list_bounties(&self, filter: &BountyFilter) -> Result<Vec<Bounty>> {
        let request = self.client.get(self.api_url("bounties")).query(filter);
        self.fetch("Listing bounties", request).await
    }

    pub async fn get_bounty(&self, id: Uuid) -> Result<Bounty> {
        let request = self.client.get(self.api_url(&format!("bounties/{}", id)));
        self.fetch("Fetching bounty", request).await
    }

    pub async fn get_milestones(&self, id: Uuid) -> Result<Vec<Milestone>> {
        let request = self
            .client
            .get(self.api_url(&format!("bounties/{}/milestones", id)));
        self.fetch("Fetching milestones", request).await
    }

    pub async fn get_public_applications(&self, id: Uuid) -> Result<Vec<Application>> {
        let request = self
            .client
            .get(self.api_url(&format!("bounties/{}/applications/public", id)));
        self.fetch("Fetching applications", request).await
    }

    pub async fn get_comments(&self, id: Uuid) -> Result<Vec<Comment>> {
        let request = self
            .client
            .get(self.api_url(&format!("bounties/{}/comments", id)));
        self.fetch("Fetching comments", request).await
    }

    // Applications

    pub async fn apply(&self, bounty_id: Uuid, note: Option<String>) -> Result<Application> {
        let request = self
            .client
            .post(self.api_url(&format!("bounties/{}/applications", bounty_id)))
            .json(&json!({ "note": note }));
        self.fetch("Applying", request).await
    }

    pub async fn approve(&self, application_id: Uuid) -> Result<Application> {
        let request = self
            .client
            .post(self.api_url(&format!("applications/{}/approve", application_id)));
        self.fetch("Approving application", request).await
    }

    pub async fn reject(&self, application_id: Uuid) -> Result<Application> {
        let request = self
            .client
            .post(self.api_url(&format!("applications/{}/reject", application_id)));
        self.fetch("Rejecting application", request).await
    }

    // Lifecycle

    pub async fn confirm(&self, bounty_id: Uuid) -> Result<Bounty> {
        let request = self
            .client
            .post(self.api_url(&format!("bounties/{}/confirm", bounty_id)));
        self.fetch("Confirming milestones", request).await
    }

    pub async fn verify(&self, bounty_id: Uuid) -> Result<Bounty> {
        let request = self
            .client
            .post(self.api_url(&format!("bounties/{}/verify", bounty_id)));
        self.fetch("Verifying milestones", request).await
    }

    pub async fn request_settlement(&self, bounty_id: Uuid) -> Result<Bounty> {
        let request = self
            .client
            .post(self.api_url(&format!("bounties/{}/settlement", bounty_id)));
        self.fetch("Requesting settlement", request).await
    }

    pub async fn cancel(&self, bounty_id: Uuid, role: CancelRole) -> Result<Bounty> {
        let request = self.client.post(self.api_url(&format!(
            "bounties/{}/cancel/{}",
            bounty_id,
            role.path()
        )));
        self.fetch("Cancelling settlement", request).await
    }

    pub async fn settle(&self, bounty_id: Uuid) -> Result<Settlement> {
        let request = self
            .client
            .post(self.api_url(&format!("bounties/{}/settle", bounty_id)));
        self.fetch("Settling bounty", request).await
    }

    // Interactions

    pub async fn like(&self, bounty_id: Uuid) -> Result<()> {
        let request = self
            .client
            .post(self.api_url(&format!("bounties/{}/like", bounty_id)));
        self.execute("Liking bounty", request).await
    }

    pub async fn unlike(&self, bounty_id: Uuid) -> Result<()> {
        let request = self
            .client
            .delete(self.api_url(&format!("bounties/{}/like", bounty_id)));
        self.execute("Unliking bounty", request).await
    }

    pub async fn rate(&self, bounty_id: Uuid, score: f64) -> Result<Rating> {
        let request = self
            .client
            .post(self.api_url(&format!("bounties/{}/rating", bounty_id)))
            .json(&json!({ "score": score }));
        self.fetch("Rating bounty", request).await
    }

    pub async fn comment(&self, bounty_id: Uuid, content: &str) -> Result<Comment> {
        let request = self
            .client
            .post(self.api_url(&format!("bounties/{}/comments", bounty_id)))
            .json(&json!({ "content": content }));
        self.fetch("Posting comment", request).await
    }

    pub async fn interaction(&self, bounty_id: Uuid) -> Result<BountyInteraction> {
        let request = self
            .client
            .get(self.api_url(&format!("bounties/{}/interaction", bounty_id)));
        self.fetch("Fetching interaction", request).await
    }

    // Notifications

    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        let request = self.client.get(self.api_url("notifications"));
        self.fetch("Fetching notifications", request).await
    }

    pub async fn mark_read(&self, notification_id: Uuid) -> Result<()> {
        let request = self
            .client
            .post(self.api_url(&format!("notifications/{}/read", notification_id)));
        self.execute("Marking notification read", request).await
    }
}

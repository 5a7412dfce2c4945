//! # Negotiation Demo
//!
//! One enquiry on an offer listing, walked from the first message to a
//! confirmed handover against the in-memory store. Effects land in a local
//! queue and a small worker decodes them the way a real one would.
//!
//! ```text
//! RUST_LOG=info,haggle_core=debug cargo run -p negotiation-demo
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use haggle_core::{
    AcceptanceStatus, AnyCommand, ClaimedJob, ClosingStatus, CommandRegistry, Community,
    ConversationService, InMemoryStore, JobQueue, JobSpec, Listing, ListingType,
    NewConversation, NewMessageNotification, PersonId, ServiceConfig, TransitionEffect,
};
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

// ============================================================================
// Queue
// ============================================================================

/// Holds jobs in memory until the worker drains them.
#[derive(Default)]
struct LocalQueue {
    jobs: Mutex<Vec<ClaimedJob>>,
}

impl LocalQueue {
    async fn drain(&self) -> Vec<ClaimedJob> {
        std::mem::take(&mut *self.jobs.lock().await)
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn enqueue(&self, payload: serde_json::Value, spec: JobSpec) -> Result<Uuid> {
        let id = Uuid::new_v4();
        tracing::info!(
            job_type = spec.job_type,
            key = ?spec.idempotency_key,
            priority = spec.priority,
            "job queued"
        );
        self.jobs.lock().await.push(ClaimedJob {
            id,
            job_type: spec.job_type.to_string(),
            payload,
            version: spec.version,
            attempt: 1,
        });
        Ok(id)
    }

    async fn schedule(
        &self,
        payload: serde_json::Value,
        spec: JobSpec,
        _run_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        self.enqueue(payload, spec).await
    }
}

// ============================================================================
// Worker
// ============================================================================

fn describe(command: &dyn AnyCommand) -> String {
    if let Some(effect) = command.as_any().downcast_ref::<TransitionEffect>() {
        format!(
            "{} by {} at {}",
            effect.kind, effect.acting_user_id, effect.revision
        )
    } else if let Some(note) = command.as_any().downcast_ref::<NewMessageNotification>() {
        format!("tell {} about message {}", note.recipient_id, note.message_id)
    } else {
        "unrecognised command".to_string()
    }
}

async fn run_worker(queue: &LocalQueue, registry: &CommandRegistry) {
    for job in queue.drain().await {
        match registry.deserialize(&job) {
            Ok(command) => println!("  worker: {}", describe(command.as_ref())),
            Err(e) => println!("  worker: dropping {} ({:?})", job.job_type, e.failure_kind()),
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,negotiation_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let alice = PersonId::new();
    let bob = PersonId::new();
    let listing = Listing::new(alice, ListingType::Offer);
    let community = Community::new(true);

    let store = Arc::new(InMemoryStore::new());
    store.put_listing(listing.clone());

    let queue = Arc::new(LocalQueue::default());
    let service = ConversationService::new(Arc::clone(&store), queue.clone())
        .with_config(ServiceConfig::default().with_notification_priority(10));
    let registry = CommandRegistry::with_haggle_effects();

    println!("Bob asks about Alice's drill");
    let conversation = service
        .start_conversation(NewConversation {
            title: "Cordless drill".to_string(),
            listing_id: listing.id,
            sender_id: bob,
            recipient_ids: vec![alice],
            content: "Could I borrow it this weekend?".to_string(),
        })
        .await?;
    let id = conversation.id();
    service.notify_participants(id, &community).await?;
    println!("  unread for alice: {}", service.unread_count(alice).await?);
    run_worker(&queue, &registry).await;

    println!("Alice replies and reads the thread");
    service
        .reply(id, alice, "Sure, pick it up Saturday.".to_string())
        .await?;
    service.mark_read(id, alice).await?;
    service.notify_participants(id, &community).await?;
    println!(
        "  unread for alice: {} (pending enquiries on her own listing stay unread)",
        service.unread_count(alice).await?
    );
    println!("  unread for bob: {}", service.unread_count(bob).await?);
    run_worker(&queue, &registry).await;

    println!("Alice accepts and closes the listing");
    let accepted = service
        .accept_or_reject(id, alice, &community, true, AcceptanceStatus::Accepted)
        .await?;
    println!(
        "  status {} at {}, listing open: {}",
        accepted.conversation.status(),
        accepted.revision,
        store.listing(listing.id).is_some_and(|l| l.open)
    );
    println!(
        "  payment required: {}",
        accepted.conversation.requires_payment(&community)
    );
    run_worker(&queue, &registry).await;

    println!("Bob confirms without leaving feedback");
    let confirmed = service
        .confirm_or_cancel(id, bob, &community, false, ClosingStatus::Confirmed)
        .await?;
    let c = &confirmed.conversation;
    println!(
        "  status {}, bob skipped feedback: {}, alice still owes feedback: {}",
        c.status(),
        c.feedback_skipped_by(bob)?,
        !c.has_feedback_from(alice)?
    );
    println!("  can be cancelled: {}", c.can_be_cancelled());
    run_worker(&queue, &registry).await;

    service.give_feedback(id, alice).await?;
    let c = service.conversation(id).await?;
    println!(
        "Alice leaves feedback; can be cancelled: {}",
        c.can_be_cancelled()
    );

    Ok(())
}

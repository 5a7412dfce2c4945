//! # Haggle
//!
//! Negotiation threads between the people behind a marketplace listing:
//! who is in the conversation, who has read what, where the transaction
//! stands, and which follow-up work each step hands to a job queue.
//!
//! ## Core Concepts
//!
//! - [`Conversation`] = the aggregate: title, status, participations and
//!   messages, loaded and saved whole
//! - [`Participation`] = one person's view (read flag, feedback flags,
//!   last sent/received timestamps)
//! - [`Transition`] = what a lifecycle step decided; becomes a
//!   [`TransitionEffect`] once saved
//! - [`Command`] = a deferred effect with its own [`JobSpec`]
//!
//! The key principle: **save first, then hand off**. A transition is
//! complete once its state is persisted; the effect goes to the queue
//! afterwards, keyed by the saved revision so retries deduplicate.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!   │
//!   ▼
//! ConversationService ── per-conversation Mutex (DashMap lock table)
//!   │
//!   ├─► ConversationStore.load()
//!   │
//!   ├─► Conversation.accept_or_reject() / confirm_or_cancel()   (pure)
//!   │         │
//!   │         └─► Transition
//!   │
//!   ├─► ConversationStore.save(expected revision)
//!   │
//!   └─► EffectDispatcher ─► JobQueue.enqueue(TransitionEffect)
//!                                  │
//!                                  ▼
//!                          worker: JobStore.claim_ready()
//!                                  │
//!                                  ▼
//!                          CommandRegistry.deserialize()
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Titles are 1..=120 characters** - checked on create and update
//! 2. **One participation per person** - duplicates are rejected, never merged
//! 3. **Status is one of six values** - unknown strings are rejected
//! 4. **Transitions carry their status** - the status write and the flag
//!    updates happen in one step
//! 5. **Saves are revision-checked** - concurrent writers get
//!    [`HaggleError::Conflict`]
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use haggle_core::{
//!     AcceptanceStatus, Community, ConversationService, InMemoryStore, Listing, ListingType,
//!     NewConversation, PersonId,
//! };
//!
//! let store = Arc::new(InMemoryStore::new());
//! let owner = PersonId::new();
//! let neighbour = PersonId::new();
//! let listing = Listing::new(owner, ListingType::Offer);
//! store.put_listing(listing.clone());
//!
//! let service = ConversationService::new(store, Arc::new(my_queue));
//! let conversation = service
//!     .start_conversation(NewConversation {
//!         title: "Can I borrow the ladder?".into(),
//!         listing_id: listing.id,
//!         sender_id: neighbour,
//!         recipient_ids: vec![owner],
//!         content: "Saturday morning?".into(),
//!     })
//!     .await?;
//!
//! let outcome = service
//!     .accept_or_reject(conversation.id(), owner, &community, true, AcceptanceStatus::Accepted)
//!     .await?;
//! assert!(outcome.job_id.is_some());
//! ```
//!
//! ## What This Is Not
//!
//! Haggle does not send mail, move money, or render anything. Those are
//! the job queue's consumers.

mod command_macro;
mod config;
mod conversation;
mod core;
mod dispatch;
mod effect;
mod error;
mod id;
mod listing;
mod memory;
mod message;
mod notify;
mod participation;
mod service;
mod status;
mod store;
mod transition;

// Job interfaces (policy-light)
pub mod job;

// The unread rule, shared by store implementations
pub mod unread;


pub use crate::core::{AnyCommand, Command, ExecutionMode, JobSpec};

pub use config::ServiceConfig;

pub use conversation::{Conversation, ConversationSnapshot, Participations, MAX_TITLE_CHARS};

pub use dispatch::{EffectDispatcher, JobQueue, NoOpJobQueue};

pub use effect::{
    EffectKind, NewMessageNotification, TransitionEffect, ACCEPTED_OR_REJECTED,
    CONFIRMED_OR_CANCELLED, NEW_MESSAGE_NOTIFICATION,
};

pub use error::{HaggleError, Result, StoreError};

pub use id::{kind, CommunityId, ConversationId, Id, ListingId, MessageId, PersonId};

pub use job::{ClaimedJob, CommandRegistry, DeserializationError, FailureKind, JobStore};

pub use listing::{Community, Listing, ListingType};

pub use memory::InMemoryStore;

pub use message::{Message, NewMessage};

pub use notify::{NotificationPreferences, NotifyEveryone};

pub use participation::Participation;

pub use service::{ConversationService, NewConversation, TransitionOutcome};

pub use status::{AcceptanceStatus, ClosingStatus, ConversationStatus, VALID_STATUSES};

pub use store::{ConversationStore, ListingStore, Revision};

pub use transition::Transition;

pub use async_trait::async_trait;

//! Quota billing around relay attempts
//!
//! Every attempt reserves quota for its prompt before the upstream call and
//! settles afterwards: a charge for the tokens actually produced, or a full
//! refund when nothing was produced. A `QuotaTicket` is moved into exactly
//! one of `consume` or `undo`, so an attempt can never do both.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{channel::ChannelId, error::AppResult};

/// Token usage of one attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// What an attempt wants to reserve
#[derive(Debug, Clone, Serialize)]
pub struct QuotaRequest {
    pub token_id: i64,
    pub user_id: i64,
    pub channel_id: ChannelId,
    pub group: String,
    pub model: String,
    pub prompt_tokens: u32,
}

/// Outstanding reservation
///
/// Deliberately not `Clone`: settling consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct QuotaTicket {
    pub id: String,
    pub prompt_tokens: u32,
}

/// Billing collaborator
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Reserve quota before the upstream call
    async fn pre_consume(&self, request: &QuotaRequest) -> AppResult<QuotaTicket>;

    /// Charge for produced tokens and release the reservation
    async fn consume(&self, ticket: QuotaTicket, usage: &Usage, is_stream: bool) -> AppResult<()>;

    /// Refund the whole reservation
    async fn undo(&self, ticket: QuotaTicket) -> AppResult<()>;
}

/// Settlement recorded by `InMemoryQuotaLedger`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    Reserved { ticket: String, channel_id: ChannelId, prompt_tokens: u32 },
    Consumed { ticket: String, usage: Usage, is_stream: bool },
    Refunded { ticket: String },
}

/// Process-local ledger that records every call
#[derive(Default)]
pub struct InMemoryQuotaLedger {
    entries: Mutex<Vec<LedgerEntry>>,
    next_id: AtomicU64,
}

impl InMemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().clone()
    }

    pub fn consumed(&self) -> Vec<Usage> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match e {
                LedgerEntry::Consumed { usage, .. } => Some(*usage),
                _ => None,
            })
            .collect()
    }

    pub fn refunds(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| matches!(e, LedgerEntry::Refunded { .. }))
            .count()
    }
}

#[async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn pre_consume(&self, request: &QuotaRequest) -> AppResult<QuotaTicket> {
        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries.lock().push(LedgerEntry::Reserved {
            ticket: id.clone(),
            channel_id: request.channel_id,
            prompt_tokens: request.prompt_tokens,
        });
        Ok(QuotaTicket {
            id,
            prompt_tokens: request.prompt_tokens,
        })
    }

    async fn consume(&self, ticket: QuotaTicket, usage: &Usage, is_stream: bool) -> AppResult<()> {
        self.entries.lock().push(LedgerEntry::Consumed {
            ticket: ticket.id,
            usage: *usage,
            is_stream,
        });
        Ok(())
    }

    async fn undo(&self, ticket: QuotaTicket) -> AppResult<()> {
        self.entries
            .lock()
            .push(LedgerEntry::Refunded { ticket: ticket.id });
        Ok(())
    }
}

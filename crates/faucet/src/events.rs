//! Faucet and ledger events, plus live subscription.
//!
//! Every committed transition appends its events to the database log and then
//! publishes them to subscribers over a broadcast channel.

use drip_common::{Address, Amount, Timestamp};
use drip_token::LedgerEvent;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Events emitted by the faucet and its ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Ledger balance movement; mints come from the zero address
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    /// Ledger allowance set
    Approval {
        owner: Address,
        spender: Address,
        amount: Amount,
    },
    /// A successful claim
    TokensClaimed {
        recipient: Address,
        amount: Amount,
        timestamp: Timestamp,
    },
    /// Pause flag written by the admin
    FaucetPaused { paused: bool },
    /// Ledger bound to the faucet
    TokenConfigured { token: Address },
}

impl Event {
    /// Whether `address` takes part in this event
    pub fn involves(&self, address: &Address) -> bool {
        match self {
            Event::Transfer { from, to, .. } => from == address || to == address,
            Event::Approval { owner, spender, .. } => owner == address || spender == address,
            Event::TokensClaimed { recipient, .. } => recipient == address,
            Event::TokenConfigured { token } => token == address,
            Event::FaucetPaused { .. } => false,
        }
    }
}

impl From<LedgerEvent> for Event {
    fn from(event: LedgerEvent) -> Self {
        match event {
            LedgerEvent::Transfer { from, to, amount } => Event::Transfer { from, to, amount },
            LedgerEvent::Approval { owner, spender, amount } => Event::Approval { owner, spender, amount },
        }
    }
}

/// A logged event with its position in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic log position
    pub sequence: u64,
    /// Time of the transition that produced the event
    pub timestamp: Timestamp,
    pub event: Event,
}

/// Subscription ID
pub type SubscriptionId = u64;

/// Event subscriber handle
pub struct EventSubscriber {
    id: SubscriptionId,
    address: Option<Address>,
    receiver: broadcast::Receiver<EventRecord>,
}

impl EventSubscriber {
    /// Receive the next matching event. Returns `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<EventRecord> {
        loop {
            match self.receiver.recv().await {
                Ok(record) => {
                    if self.matches(&record) {
                        return Some(record);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber {} lagged, skipped {} events", self.id, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Get subscription ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    fn matches(&self, record: &EventRecord) -> bool {
        match &self.address {
            Some(address) => record.event.involves(address),
            None => true,
        }
    }
}

/// Broadcasts committed events to subscribers
pub struct EventPublisher {
    sender: broadcast::Sender<EventRecord>,
    next_id: AtomicU64,
}

impl EventPublisher {
    /// Create new event publisher
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to every event, or only those involving `address`
    pub fn subscribe(&self, address: Option<Address>) -> EventSubscriber {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!("New subscription created: {}", id);

        EventSubscriber {
            id,
            address,
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish event to all subscribers
    pub fn publish(&self, record: EventRecord) {
        if let Err(e) = self.sender.send(record) {
            debug!("No subscribers to receive event: {:?}", e.0.event);
        }
    }

    /// Get subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

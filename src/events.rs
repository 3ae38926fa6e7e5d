//! Event delivery from device workers to the presentation layer.
//!
//! Workers hold an [`EventSender`] (cheap to clone, usable from plain
//! threads); the single consumer owns the [`EventReceiver`] and drains it on
//! a fixed tick, folding each event into a [`Tally`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

// ---------------------------------------------------------------------------
// Event records
// ---------------------------------------------------------------------------

/// One accepted bank note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillEvent {
    pub value: u32,
    pub timestamp: DateTime<Utc>,
}

impl BillEvent {
    pub fn now(value: u32) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Event {
    Status(String),
    Bill(BillEvent),
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Unbounded FIFO, many producers, one consumer.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Queue an event. Dropped silently once the consumer is gone.
    pub fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("Event consumer gone, event dropped");
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.send(Event::Status(text.into()));
    }

    pub fn bill(&self, value: u32) {
        self.send(Event::Bill(BillEvent::now(value)));
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
    /// Take everything queued right now, in arrival order. Never blocks.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    /// Wait for the next event. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Display state built from drained events. Owned by the consumer only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub status: Option<String>,
    pub last_bill: Option<u32>,
    pub bill_count: usize,
    pub total: u64,
}

impl Tally {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Status(text) => self.status = Some(text.clone()),
            Event::Bill(bill) => {
                self.last_bill = Some(bill.value);
                self.bill_count += 1;
                self.total += u64::from(bill.value);
            }
        }
    }

    pub fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) {
        for event in events {
            self.apply(event);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

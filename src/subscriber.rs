//! RPC polling subscribers for slots, account transactions and Drift events.
//!
//! Each subscriber polls on its own tokio task at a fixed interval. Poll
//! failures never stop the task; they are forwarded to the client error
//! channel and the next tick tries again.

use crate::sdk::Subscriber;

use anyhow::{Result, anyhow};
use drift_rs::{
    Pubkey, RpcClient,
    event_subscriber::{DriftEvent, EventSubscriber as DriftEventSubscriber},
};
use futures_util::StreamExt;
use log::debug;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub signature: String,
    pub slot: u64,
    pub failed: bool,
}

/// Settings for [`EventSubscriber`].
#[derive(Debug, Clone)]
pub struct EventSubscriberConfig {
    /// Transactions kept in memory, newest first.
    pub max_tx: usize,
    /// Events kept in memory for each event type, newest first.
    pub max_events_per_type: usize,
    pub poll_interval: Duration,
}

impl Default for EventSubscriberConfig {
    fn default() -> Self {
        Self {
            max_tx: 8192,
            max_events_per_type: 8192,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Event type name, taken from the variant name of its `Debug` output.
fn event_kind(event: &impl Debug) -> String {
    let repr = format!("{:?}", event);
    repr.split(|c: char| !c.is_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Events grouped by type, each group newest first and capped.
#[derive(Debug)]
pub struct EventBuffer<T> {
    max_per_type: usize,
    by_kind: BTreeMap<String, VecDeque<T>>,
}

impl<T> EventBuffer<T> {
    pub fn new(max_per_type: usize) -> Self {
        Self {
            max_per_type,
            by_kind: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, kind: String, event: T) {
        let events = self.by_kind.entry(kind).or_default();
        events.push_front(event);
        events.truncate(self.max_per_type);
    }

    pub fn latest(&self, kind: &str) -> Option<&T> {
        self.by_kind.get(kind).and_then(|events| events.front())
    }

    /// Buffered event count per type.
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.by_kind
            .iter()
            .map(|(kind, events)| (kind.clone(), events.len()))
            .collect()
    }
}

/// Prepends the records in `fetched` (newest first) that are newer than the
/// head of `buffer`, then trims `buffer` to `max` entries.
fn merge_newest(buffer: &mut VecDeque<TxRecord>, fetched: Vec<TxRecord>, max: usize) -> usize {
    let newest_known = buffer.front().map(|r| r.signature.clone());
    let fresh: Vec<TxRecord> = fetched
        .into_iter()
        .take_while(|r| Some(&r.signature) != newest_known.as_ref())
        .collect();

    let added = fresh.len();
    for record in fresh.into_iter().rev() {
        buffer.push_front(record);
    }
    buffer.truncate(max);
    added
}

/// Tracks transactions touching an account, ordered by chain position
/// descending, and the Drift events they emitted, grouped by type.
pub struct EventSubscriber {
    rpc: Arc<RpcClient>,
    address: Pubkey,
    config: EventSubscriberConfig,
    records: Arc<Mutex<VecDeque<TxRecord>>>,
    events: Arc<Mutex<EventBuffer<DriftEvent>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    errors: UnboundedSender<anyhow::Error>,
}

impl EventSubscriber {
    pub fn new(
        rpc: Arc<RpcClient>,
        address: Pubkey,
        config: EventSubscriberConfig,
        errors: UnboundedSender<anyhow::Error>,
    ) -> Self {
        let events = EventBuffer::new(config.max_events_per_type);
        Self {
            rpc,
            address,
            config,
            records: Arc::new(Mutex::new(VecDeque::new())),
            events: Arc::new(Mutex::new(events)),
            task: Mutex::new(None),
            event_task: Mutex::new(None),
            errors,
        }
    }

    pub fn event_counts(&self) -> Vec<(String, usize)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counts()
    }

    pub fn latest_event(&self, kind: &str) -> Option<DriftEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest(kind)
            .cloned()
    }

    pub fn tx_count(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn latest(&self) -> Option<TxRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    async fn poll(rpc: &RpcClient, address: &Pubkey) -> Result<Vec<TxRecord>> {
        let statuses = rpc.get_signatures_for_address(address).await?;
        Ok(statuses
            .into_iter()
            .map(|s| TxRecord {
                signature: s.signature,
                slot: s.slot,
                failed: s.err.is_some(),
            })
            .collect())
    }

    fn is_running(task: &Mutex<Option<JoinHandle<()>>>) -> bool {
        task.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Feeds the drift-rs polled event stream for the account into the buffer.
    fn spawn_event_stream(&self) {
        if Self::is_running(&self.event_task) {
            return;
        }

        let rpc = RpcClient::new_with_commitment(self.rpc.url(), self.rpc.commitment());
        let mut stream = DriftEventSubscriber::subscribe_polled(rpc, self.address);
        let events = Arc::clone(&self.events);
        let errors = self.errors.clone();
        let address = self.address;

        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let kind = event_kind(&event);
                debug!("{} event for {}", kind, address);
                events
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(kind, event);
            }
            let _ = errors.send(anyhow!("event stream for {} ended", address));
        });

        *self.event_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

impl Subscriber for EventSubscriber {
    async fn subscribe(&self) -> Result<()> {
        if Self::is_running(&self.task) {
            return Ok(());
        }

        let first = Self::poll(&self.rpc, &self.address).await?;
        self.spawn_event_stream();
        {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            merge_newest(&mut records, first, self.config.max_tx);
        }

        let rpc = Arc::clone(&self.rpc);
        let address = self.address;
        let records = Arc::clone(&self.records);
        let errors = self.errors.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(config.poll_interval).await;
                match Self::poll(&rpc, &address).await {
                    Ok(fetched) => {
                        let mut records = records.lock().unwrap_or_else(PoisonError::into_inner);
                        let added = merge_newest(&mut records, fetched, config.max_tx);
                        if added > 0 {
                            debug!("{} new transactions for {}", added, address);
                        }
                    }
                    Err(e) => {
                        if errors.send(e.context("event subscriber poll failed")).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }
}

/// Latest confirmed slot, refreshed every poll interval.
pub struct SlotSubscriber {
    rpc: Arc<RpcClient>,
    poll_interval: Duration,
    slot: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
    errors: UnboundedSender<anyhow::Error>,
}

impl SlotSubscriber {
    pub fn new(
        rpc: Arc<RpcClient>,
        poll_interval: Duration,
        errors: UnboundedSender<anyhow::Error>,
    ) -> Self {
        Self {
            rpc,
            poll_interval,
            slot: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
            errors,
        }
    }

    pub fn current_slot(&self) -> u64 {
        self.slot.load(Ordering::Relaxed)
    }
}

impl Subscriber for SlotSubscriber {
    async fn subscribe(&self) -> Result<()> {
        if self.task.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
            return Ok(());
        }

        let first = self
            .rpc
            .get_slot()
            .await
            .map_err(|e| anyhow!("slot subscriber: {}", e))?;
        self.slot.store(first, Ordering::Relaxed);

        let rpc = Arc::clone(&self.rpc);
        let slot = Arc::clone(&self.slot);
        let errors = self.errors.clone();
        let interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match rpc.get_slot().await {
                    Ok(s) => slot.store(s, Ordering::Relaxed),
                    Err(e) => {
                        if errors.send(anyhow!("slot subscriber poll failed: {}", e)).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }
}

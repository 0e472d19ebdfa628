//! In-process reference ledger.
//!
//! Keeps world state per namespace, commits one block per successful
//! submit and broadcasts the block's event to live subscribers. The block
//! log is retained so subscriptions can replay from any height.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use super::tx;
use crate::interfaces::ledger::{EventFeed, EventStream, Ledger, LedgerError, LedgerEvent, Result};
use crate::models::{ledger_timestamp, CreditHistory, Novel, UserCredit};

/// Default capacity of the live event channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct WorldState {
    novels: BTreeMap<String, Novel>,
    credits: BTreeMap<String, UserCredit>,
    histories: Vec<CreditHistory>,
    blocks: Vec<LedgerEvent>,
}

/// Reference ledger used by the standalone process and the test suite.
pub struct InMemoryLedger {
    state: Mutex<WorldState>,
    sender: RwLock<Option<broadcast::Sender<LedgerEvent>>>,
    fail_submits: AtomicBool,
    fail_evaluates: AtomicBool,
    fail_subscribe: AtomicBool,
    /// Transactions rejected regardless of arguments.
    rejected: RwLock<HashSet<String>>,
    /// Delay applied after a submit commits, before it answers.
    reply_delay: RwLock<Option<Duration>>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(WorldState::default()),
            sender: RwLock::new(Some(sender)),
            fail_submits: AtomicBool::new(false),
            fail_evaluates: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            rejected: RwLock::new(HashSet::new()),
            reply_delay: RwLock::new(None),
        }
    }

    /// Make every submit fail with a connection error.
    pub fn set_fail_submits(&self, fail: bool) {
        self.fail_submits.store(fail, Ordering::SeqCst);
    }

    /// Make every evaluate fail with a connection error.
    pub fn set_fail_evaluates(&self, fail: bool) {
        self.fail_evaluates.store(fail, Ordering::SeqCst);
    }

    /// Make opening a subscription fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Reject one transaction name without touching state.
    pub async fn reject(&self, tx_name: &str) {
        self.rejected.write().await.insert(tx_name.to_string());
    }

    /// Hold submit replies back after commit. Models a lost confirmation.
    pub async fn set_reply_delay(&self, delay: Option<Duration>) {
        *self.reply_delay.write().await = delay;
    }

    /// End the event feed. Open subscriptions finish after the events
    /// already delivered to them.
    pub async fn close_feed(&self) {
        self.sender.write().await.take();
    }

    /// Height of the block log.
    pub async fn height(&self) -> u64 {
        self.state.lock().await.blocks.len() as u64
    }

    /// Number of credit history entries committed.
    pub async fn history_count(&self) -> usize {
        self.state.lock().await.histories.len()
    }

    async fn commit(&self, tx_name: &str, args: &[String]) -> Result<Vec<u8>> {
        let mut state = self.state.lock().await;
        let payload = apply(&mut state, tx_name, args)?;

        let block_number = state.blocks.len() as u64 + 1;
        let event = LedgerEvent::new(tx_name, payload, block_number);
        state.blocks.push(event.clone());

        // Sent under the state lock so live delivery follows block order.
        if let Some(sender) = self.sender.read().await.as_ref() {
            let _ = sender.send(event);
        }
        debug!(tx_name, block_number, "Block committed");
        Ok(Vec::new())
    }
}

fn rejected(tx_name: &str, message: impl Into<String>) -> LedgerError {
    LedgerError::Rejected {
        tx_name: tx_name.to_string(),
        message: message.into(),
    }
}

fn arg<'a>(tx_name: &str, args: &'a [String], index: usize) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| rejected(tx_name, format!("expected at least {} arguments", index + 1)))
}

fn int_arg(tx_name: &str, args: &[String], index: usize) -> Result<i64> {
    let raw = arg(tx_name, args, index)?;
    raw.parse()
        .map_err(|_| rejected(tx_name, format!("argument {} is not an integer: {}", index, raw)))
}

fn encode<T: Serialize>(tx_name: &str, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|source| LedgerError::Decode {
        tx_name: tx_name.to_string(),
        source,
    })
}

fn novel_from_args(tx_name: &str, args: &[String]) -> Result<Novel> {
    Ok(Novel {
        id: arg(tx_name, args, 0)?.to_string(),
        author: arg(tx_name, args, 1)?.to_string(),
        story_outline: arg(tx_name, args, 2)?.to_string(),
        subsections: arg(tx_name, args, 3)?.to_string(),
        characters: arg(tx_name, args, 4)?.to_string(),
        items: arg(tx_name, args, 5)?.to_string(),
        total_scenes: arg(tx_name, args, 6)?.to_string(),
        ..Default::default()
    })
}

fn credit_from_args(tx_name: &str, args: &[String]) -> Result<UserCredit> {
    Ok(UserCredit {
        user_id: arg(tx_name, args, 0)?.to_string(),
        credit: int_arg(tx_name, args, 1)?,
        total_used: int_arg(tx_name, args, 2)?,
        total_recharge: int_arg(tx_name, args, 3)?,
        ..Default::default()
    })
}

/// Apply a mutating transaction and return its event payload.
fn apply(state: &mut WorldState, tx_name: &str, args: &[String]) -> Result<Vec<u8>> {
    let now = ledger_timestamp();
    match tx_name {
        tx::CREATE_NOVEL => {
            let mut novel = novel_from_args(tx_name, args)?;
            if state.novels.contains_key(&novel.id) {
                return Err(rejected(tx_name, format!("novel {} already exists", novel.id)));
            }
            novel.created_at = now.clone();
            novel.updated_at = now;
            let payload = encode(tx_name, &novel)?;
            state.novels.insert(novel.id.clone(), novel);
            Ok(payload)
        }
        tx::UPDATE_NOVEL => {
            let mut novel = novel_from_args(tx_name, args)?;
            let Some(existing) = state.novels.get(&novel.id) else {
                return Err(rejected(tx_name, format!("novel {} does not exist", novel.id)));
            };
            novel.created_at = existing.created_at.clone();
            novel.updated_at = now;
            let payload = encode(tx_name, &novel)?;
            state.novels.insert(novel.id.clone(), novel);
            Ok(payload)
        }
        tx::DELETE_NOVEL => {
            let id = arg(tx_name, args, 0)?;
            match state.novels.remove(id) {
                Some(novel) => encode(tx_name, &novel),
                None => Err(rejected(tx_name, format!("novel {} does not exist", id))),
            }
        }
        tx::CREATE_USER_CREDIT => {
            let mut credit = credit_from_args(tx_name, args)?;
            if state.credits.contains_key(&credit.user_id) {
                return Err(rejected(
                    tx_name,
                    format!("user credit {} already exists", credit.user_id),
                ));
            }
            credit.created_at = now.clone();
            credit.updated_at = now;
            let payload = encode(tx_name, &credit)?;
            state.credits.insert(credit.user_id.clone(), credit);
            Ok(payload)
        }
        tx::UPDATE_USER_CREDIT => {
            let mut credit = credit_from_args(tx_name, args)?;
            let Some(existing) = state.credits.get(&credit.user_id) else {
                return Err(rejected(
                    tx_name,
                    format!("user credit {} does not exist", credit.user_id),
                ));
            };
            credit.created_at = existing.created_at.clone();
            credit.updated_at = now;
            let payload = encode(tx_name, &credit)?;
            state.credits.insert(credit.user_id.clone(), credit);
            Ok(payload)
        }
        tx::DELETE_USER_CREDIT => {
            let user_id = arg(tx_name, args, 0)?;
            match state.credits.remove(user_id) {
                Some(credit) => encode(tx_name, &credit),
                None => Err(rejected(
                    tx_name,
                    format!("user credit {} does not exist", user_id),
                )),
            }
        }
        tx::CREATE_CREDIT_HISTORY => {
            let history = CreditHistory {
                user_id: arg(tx_name, args, 0)?.to_string(),
                amount: int_arg(tx_name, args, 1)?,
                kind: arg(tx_name, args, 2)?.to_string(),
                description: arg(tx_name, args, 3)?.to_string(),
                timestamp: now,
                novel_id: args.get(4).cloned().unwrap_or_default(),
            };
            let payload = encode(tx_name, &history)?;
            state.histories.push(history);
            Ok(payload)
        }
        other => Err(rejected(other, "unknown transaction")),
    }
}

fn query(state: &WorldState, tx_name: &str, args: &[String]) -> Result<Vec<u8>> {
    match tx_name {
        tx::READ_NOVEL => {
            let id = arg(tx_name, args, 0)?;
            match state.novels.get(id) {
                Some(novel) => encode(tx_name, novel),
                None => Err(rejected(tx_name, format!("novel {} is not found", id))),
            }
        }
        tx::GET_ALL_NOVELS => {
            let novels: Vec<&Novel> = state.novels.values().collect();
            encode(tx_name, &novels)
        }
        tx::READ_USER_CREDIT => {
            let user_id = arg(tx_name, args, 0)?;
            match state.credits.get(user_id) {
                Some(credit) => encode(tx_name, credit),
                None => Err(rejected(tx_name, format!("{} is not existed", user_id))),
            }
        }
        tx::GET_ALL_USER_CREDITS => {
            let credits: Vec<&UserCredit> = state.credits.values().collect();
            encode(tx_name, &credits)
        }
        other => Err(rejected(other, "unknown query")),
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn submit(&self, tx_name: &str, args: &[String]) -> Result<Vec<u8>> {
        if self.fail_submits.load(Ordering::SeqCst) {
            return Err(LedgerError::Connection("injected submit failure".to_string()));
        }
        if self.rejected.read().await.contains(tx_name) {
            return Err(rejected(tx_name, "injected rejection"));
        }

        let response = self.commit(tx_name, args).await?;

        let delay = *self.reply_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }

    async fn evaluate(&self, tx_name: &str, args: &[String]) -> Result<Vec<u8>> {
        if self.fail_evaluates.load(Ordering::SeqCst) {
            return Err(LedgerError::Connection("injected evaluate failure".to_string()));
        }
        let state = self.state.lock().await;
        query(&state, tx_name, args)
    }
}

#[async_trait]
impl EventFeed for InMemoryLedger {
    async fn subscribe(&self, start_block: Option<u64>) -> Result<EventStream> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(LedgerError::Subscription(
                "injected subscription failure".to_string(),
            ));
        }

        // Backlog and live receiver are taken under the state lock, so no
        // block is missed or delivered twice.
        let state = self.state.lock().await;
        let backlog: Vec<LedgerEvent> = match start_block {
            Some(start) => state
                .blocks
                .iter()
                .filter(|e| e.block_number >= start)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let receiver = match self.sender.read().await.as_ref() {
            Some(sender) => Some(sender.subscribe()),
            None => None,
        };
        drop(state);

        let live = match receiver {
            Some(receiver) => BroadcastStream::new(receiver)
                .filter_map(|item| async move {
                    match item {
                        Ok(event) => Some(event),
                        Err(BroadcastStreamRecvError::Lagged(count)) => {
                            warn!(count, "Event subscriber lagged, events skipped");
                            None
                        }
                    }
                })
                .boxed(),
            None => stream::empty().boxed(),
        };

        Ok(stream::iter(backlog).chain(live).boxed())
    }
}

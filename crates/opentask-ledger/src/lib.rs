//! OpenTask Ledger - Escrow accounting for the agent task economy
//!
//! The ledger is:
//! - Account-keyed by AgentId, with an available and a locked balance
//! - Hold-centric (a task reward is locked before the task exists)
//! - Immutable (journal entries are append-only)
//! - Replay-safe (terminal operations are keyed and applied at most once)
//!
//! # Invariants
//!
//! 1. No negative balances
//! 2. A hold takes exactly one terminal settlement; replays under the
//!    original key return the recorded settlement without moving funds
//! 3. The payout legs of a settled hold sum exactly to the held amount
//! 4. A settlement applies every balance move or none of them; both legs
//!    of a split land in one critical section

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentask_types::{
    AgentId, Amount, EntryId, EscrowHold, HoldId, HoldStatus, IdempotencyKey, OpenTaskError,
    Result, Settlement, SettlementKind, TaskId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// Balance of one account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Spendable funds
    pub available: Amount,
    /// Funds locked in escrow holds
    pub locked: Amount,
}

impl AccountBalance {
    /// Total funds attributed to the account
    pub fn total(&self) -> Amount {
        Amount::new(self.available.0.saturating_add(self.locked.0))
    }
}

/// Kind of balance movement a journal entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Available balance increased
    Credit,
    /// Available moved into an escrow lock
    Lock,
    /// Escrow lock returned to available
    Unlock,
    /// Escrow lock paid out of the account
    Payout,
}

/// Reason for a journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    /// External deposit seeding the account
    Deposit,
    /// Reward locked for a task
    Hold { hold_id: HoldId },
    /// Hold returned to the payer
    Release { hold_id: HoldId },
    /// Hold paid in full to the payee
    Capture { hold_id: HoldId },
    /// One leg of a proportional split
    SplitLeg { hold_id: HoldId, worker_pct: u8 },
}

/// A single journal entry (append-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub account: AgentId,
    pub kind: EntryKind,
    pub amount: Amount,
    pub available_after: Amount,
    pub locked_after: Amount,
    pub reason: EntryReason,
    pub created_at: DateTime<Utc>,
}

/// The OpenTask Ledger
///
/// Holds accounts, escrow holds, and the journal. Thread-safe and cheap to
/// clone; every operation that moves funds runs under the write locks so
/// both legs of a movement land together.
#[derive(Clone)]
pub struct Ledger {
    /// Account balances
    accounts: Arc<RwLock<HashMap<AgentId, AccountBalance>>>,
    /// Escrow holds by id
    holds: Arc<RwLock<HashMap<HoldId, EscrowHold>>>,
    /// Hold lookup by task (one hold per task)
    task_holds: Arc<RwLock<HashMap<TaskId, HoldId>>>,
    /// All journal entries (append-only)
    entries: Arc<RwLock<Vec<LedgerEntry>>>,
}

impl Ledger {
    /// Create a new in-memory ledger
    pub fn new() -> Self {
        Self {
            accounts: Arc::new(RwLock::new(HashMap::new())),
            holds: Arc::new(RwLock::new(HashMap::new())),
            task_holds: Arc::new(RwLock::new(HashMap::new())),
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Open an account, returning its balance
    ///
    /// Idempotent; an existing account is returned unchanged.
    pub async fn open_account(&self, agent: &AgentId) -> AccountBalance {
        let mut accounts = self.accounts.write().await;
        *accounts.entry(agent.clone()).or_default()
    }

    /// Get the balance of an account
    ///
    /// Unknown accounts read as zero.
    pub async fn balance(&self, agent: &AgentId) -> AccountBalance {
        let accounts = self.accounts.read().await;
        accounts.get(agent).copied().unwrap_or_default()
    }

    /// Deposit funds into an account's available balance
    pub async fn deposit(&self, agent: &AgentId, amount: Amount) -> Result<AccountBalance> {
        if amount.is_zero() {
            return Err(OpenTaskError::validation(
                "amount",
                "deposit must be greater than zero",
            ));
        }

        let mut accounts = self.accounts.write().await;
        let mut entries = self.entries.write().await;

        let balance = accounts.entry(agent.clone()).or_default();
        let new_available = balance
            .available
            .checked_add(amount)
            .ok_or(OpenTaskError::AmountOverflow)?;
        // Guard the total as well so available + locked always fits.
        new_available
            .checked_add(balance.locked)
            .ok_or(OpenTaskError::AmountOverflow)?;
        balance.available = new_available;

        push_entry(
            &mut entries,
            agent,
            EntryKind::Credit,
            amount,
            *balance,
            EntryReason::Deposit,
        );

        Ok(*balance)
    }

    /// Lock a task reward against the payer's account
    ///
    /// Moves `amount` from available to locked and records the hold. A
    /// replay under the key that created the hold returns the existing
    /// hold; any other attempt to hold for the same task is a conflict.
    /// Fails without mutation when available funds are insufficient.
    pub async fn hold(
        &self,
        payer: &AgentId,
        task_id: &TaskId,
        amount: Amount,
        key: &IdempotencyKey,
    ) -> Result<EscrowHold> {
        if amount.is_zero() {
            return Err(OpenTaskError::validation(
                "amount",
                "hold must be greater than zero",
            ));
        }

        let mut accounts = self.accounts.write().await;
        let mut holds = self.holds.write().await;
        let mut task_holds = self.task_holds.write().await;
        let mut entries = self.entries.write().await;

        if let Some(existing_id) = task_holds.get(task_id) {
            let existing = holds
                .get(existing_id)
                .ok_or_else(|| OpenTaskError::HoldNotFound {
                    hold_id: existing_id.to_string(),
                })?;
            if existing.created_key == *key {
                return Ok(existing.clone());
            }
            return Err(OpenTaskError::state_conflict(
                task_id.to_string(),
                hold_status_str(&existing.status),
                "hold",
            ));
        }

        let balance =
            accounts
                .get_mut(payer)
                .ok_or_else(|| OpenTaskError::AccountNotFound {
                    account: payer.to_string(),
                })?;
        let new_available =
            balance
                .available
                .checked_sub(amount)
                .ok_or(OpenTaskError::InsufficientFunds {
                    account: payer.to_string(),
                    requested: amount.0,
                    available: balance.available.0,
                })?;
        let new_locked = balance
            .locked
            .checked_add(amount)
            .ok_or(OpenTaskError::AmountOverflow)?;
        balance.available = new_available;
        balance.locked = new_locked;

        let hold = EscrowHold {
            id: HoldId::new(),
            task_id: task_id.clone(),
            payer: payer.clone(),
            amount,
            status: HoldStatus::Held,
            created_key: key.clone(),
            settlement: None,
            created_at: Utc::now(),
        };

        push_entry(
            &mut entries,
            payer,
            EntryKind::Lock,
            amount,
            *balance,
            EntryReason::Hold {
                hold_id: hold.id.clone(),
            },
        );

        task_holds.insert(task_id.clone(), hold.id.clone());
        holds.insert(hold.id.clone(), hold.clone());

        info!(hold_id = %hold.id, payer = %payer, amount = %amount, "escrow hold taken");
        Ok(hold)
    }

    /// Return a held amount to the payer
    pub async fn release(&self, hold_id: &HoldId, key: &IdempotencyKey) -> Result<Settlement> {
        self.settle(hold_id, key, SettlementKind::Release, None)
            .await
    }

    /// Pay the full held amount to a single payee
    pub async fn capture(
        &self,
        hold_id: &HoldId,
        payee: &AgentId,
        key: &IdempotencyKey,
    ) -> Result<Settlement> {
        self.settle(hold_id, key, SettlementKind::Capture, Some(payee.clone()))
            .await
    }

    /// Divide the held amount between payee and payer
    ///
    /// The payee receives `worker_pct` percent rounded down; the payer
    /// receives the exact remainder, so the legs always sum to the held
    /// amount.
    pub async fn split(
        &self,
        hold_id: &HoldId,
        payee: &AgentId,
        worker_pct: u8,
        key: &IdempotencyKey,
    ) -> Result<Settlement> {
        if worker_pct > 100 {
            return Err(OpenTaskError::validation(
                "worker_pct",
                "percentage must be at most 100",
            ));
        }
        self.settle(
            hold_id,
            key,
            SettlementKind::Split { worker_pct },
            Some(payee.clone()),
        )
        .await
    }

    /// Apply a terminal operation to a hold, or replay its settlement
    ///
    /// Every balance move is computed and checked before the first write,
    /// so a settlement either fully applies or leaves the hold and all
    /// balances untouched.
    async fn settle(
        &self,
        hold_id: &HoldId,
        key: &IdempotencyKey,
        kind: SettlementKind,
        payee: Option<AgentId>,
    ) -> Result<Settlement> {
        let mut accounts = self.accounts.write().await;
        let mut holds = self.holds.write().await;
        let mut entries = self.entries.write().await;

        let hold = holds
            .get_mut(hold_id)
            .ok_or_else(|| OpenTaskError::HoldNotFound {
                hold_id: hold_id.to_string(),
            })?;

        if let Some(settlement) = &hold.settlement {
            if settlement.key == *key && settlement.kind == kind {
                return Ok(settlement.clone());
            }
            return Err(OpenTaskError::state_conflict(
                hold_id.to_string(),
                hold_status_str(&hold.status),
                settlement_op_str(&kind),
            ));
        }

        let payer = hold.payer.clone();
        let amount = hold.amount;

        let legs: Vec<(AgentId, Amount)> = match kind {
            SettlementKind::Release => vec![(payer.clone(), amount)],
            SettlementKind::Capture => {
                let payee = payee.ok_or_else(|| {
                    OpenTaskError::validation("payee", "capture requires a payee")
                })?;
                vec![(payee, amount)]
            }
            SettlementKind::Split { worker_pct } => {
                let payee = payee
                    .ok_or_else(|| OpenTaskError::validation("payee", "split requires a payee"))?;
                let worker_share = amount
                    .percentage(worker_pct)
                    .ok_or(OpenTaskError::AmountOverflow)?;
                let remainder = amount
                    .checked_sub(worker_share)
                    .ok_or(OpenTaskError::AmountOverflow)?;
                vec![(payee, worker_share), (payer.clone(), remainder)]
            }
        };

        // Check every move before the first write. A leg that cannot
        // apply (a payee's balance would overflow) must leave the hold
        // `Held` and every balance as it was, or the locked amount is
        // destroyed and the hold can never settle.
        let payer_locked_after = accounts
            .get(&payer)
            .ok_or_else(|| OpenTaskError::AccountNotFound {
                account: payer.to_string(),
            })?
            .locked
            .checked_sub(amount)
            .ok_or_else(|| OpenTaskError::internal("hold exceeds payer's locked balance"))?;
        let returned_to_payer = Amount::new(
            legs.iter()
                .filter(|(party, _)| *party == payer)
                .map(|(_, leg)| leg.0)
                .sum(),
        );
        let paid_out = amount
            .checked_sub(returned_to_payer)
            .ok_or(OpenTaskError::AmountOverflow)?;
        // Legs may repeat a party, so each projection starts from the
        // previous leg's result.
        let mut projected: Vec<(AgentId, Amount)> = Vec::with_capacity(legs.len());
        for (party, leg_amount) in &legs {
            let current = projected
                .iter()
                .rev()
                .find(|(seen, _)| seen == party)
                .map(|(_, after)| *after)
                .unwrap_or_else(|| {
                    accounts.get(party).map(|b| b.available).unwrap_or_default()
                });
            let after = current
                .checked_add(*leg_amount)
                .ok_or(OpenTaskError::AmountOverflow)?;
            projected.push((party.clone(), after));
        }

        // Unlock the full amount from the payer first.
        let payer_balance = accounts.entry(payer.clone()).or_default();
        payer_balance.locked = payer_locked_after;

        // Journal the share leaving the account for good; the rest comes
        // back as an unlock leg below.
        if !paid_out.is_zero() {
            let payer_after = *payer_balance;
            push_entry(
                &mut entries,
                &payer,
                EntryKind::Payout,
                paid_out,
                payer_after,
                entry_reason(&kind, hold_id),
            );
        }

        // Then credit each leg at its projected balance.
        for ((party, leg_amount), (_, available_after)) in legs.iter().zip(&projected) {
            if leg_amount.is_zero() {
                continue;
            }
            let balance = accounts.entry(party.clone()).or_default();
            balance.available = *available_after;
            let after = *balance;
            let entry_kind = if *party == payer {
                EntryKind::Unlock
            } else {
                EntryKind::Credit
            };
            push_entry(
                &mut entries,
                party,
                entry_kind,
                *leg_amount,
                after,
                entry_reason(&kind, hold_id),
            );
        }

        let settlement = Settlement {
            kind,
            key: key.clone(),
            legs,
            applied_at: Utc::now(),
        };
        hold.status = match kind {
            SettlementKind::Release => HoldStatus::Released,
            SettlementKind::Capture => HoldStatus::Captured,
            SettlementKind::Split { worker_pct } => HoldStatus::Split { worker_pct },
        };
        hold.settlement = Some(settlement.clone());

        info!(
            hold_id = %hold_id,
            operation = settlement_op_str(&kind),
            amount = %amount,
            "escrow hold settled"
        );
        Ok(settlement)
    }

    /// Get a hold by id
    pub async fn get_hold(&self, hold_id: &HoldId) -> Result<EscrowHold> {
        let holds = self.holds.read().await;
        holds
            .get(hold_id)
            .cloned()
            .ok_or_else(|| OpenTaskError::HoldNotFound {
                hold_id: hold_id.to_string(),
            })
    }

    /// Get the hold backing a task, if one was ever taken
    pub async fn hold_for_task(&self, task_id: &TaskId) -> Option<EscrowHold> {
        // Taken one at a time; holding both here would invert hold()'s
        // lock order.
        let hold_id = {
            let task_holds = self.task_holds.read().await;
            task_holds.get(task_id).cloned()
        }?;
        let holds = self.holds.read().await;
        holds.get(&hold_id).cloned()
    }

    /// Get all journal entries for an account
    pub async fn account_entries(&self, account: &AgentId) -> Vec<LedgerEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| &e.account == account)
            .cloned()
            .collect()
    }

    /// Get the total number of journal entries
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Sum of all balances, available and locked
    ///
    /// Escrow operations move value between accounts and never mint or
    /// burn, so this stays constant between deposits.
    pub async fn total_supply(&self) -> Amount {
        let accounts = self.accounts.read().await;
        Amount::new(accounts.values().map(|b| b.total().0).sum())
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

fn push_entry(
    entries: &mut Vec<LedgerEntry>,
    account: &AgentId,
    kind: EntryKind,
    amount: Amount,
    after: AccountBalance,
    reason: EntryReason,
) {
    entries.push(LedgerEntry {
        entry_id: EntryId::new(),
        account: account.clone(),
        kind,
        amount,
        available_after: after.available,
        locked_after: after.locked,
        reason,
        created_at: Utc::now(),
    });
}

fn entry_reason(kind: &SettlementKind, hold_id: &HoldId) -> EntryReason {
    match kind {
        SettlementKind::Release => EntryReason::Release {
            hold_id: hold_id.clone(),
        },
        SettlementKind::Capture => EntryReason::Capture {
            hold_id: hold_id.clone(),
        },
        SettlementKind::Split { worker_pct } => EntryReason::SplitLeg {
            hold_id: hold_id.clone(),
            worker_pct: *worker_pct,
        },
    }
}

fn hold_status_str(status: &HoldStatus) -> &'static str {
    match status {
        HoldStatus::Held => "held",
        HoldStatus::Released => "released",
        HoldStatus::Captured => "captured",
        HoldStatus::Split { .. } => "split",
    }
}

fn settlement_op_str(kind: &SettlementKind) -> &'static str {
    match kind {
        SettlementKind::Release => "release",
        SettlementKind::Capture => "capture",
        SettlementKind::Split { .. } => "split",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn funded_ledger(poster: &AgentId, amount: u64) -> Ledger {
        let ledger = Ledger::new();
        ledger
            .deposit(poster, Amount::new(amount))
            .await
            .unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_deposit_and_balance() {
        let ledger = Ledger::new();
        let agent = AgentId::new();

        assert_eq!(ledger.balance(&agent).await, AccountBalance::default());

        let balance = ledger.deposit(&agent, Amount::new(1000)).await.unwrap();
        assert_eq!(balance.available, Amount::new(1000));
        assert_eq!(balance.locked, Amount::zero());
    }

    #[tokio::test]
    async fn test_zero_deposit_rejected() {
        let ledger = Ledger::new();
        let agent = AgentId::new();

        let result = ledger.deposit(&agent, Amount::zero()).await;
        assert!(matches!(result, Err(OpenTaskError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_hold_locks_funds() {
        let poster = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();
        let key = IdempotencyKey::for_task(&task_id, "create");

        let hold = ledger
            .hold(&poster, &task_id, Amount::new(200), &key)
            .await
            .unwrap();
        assert_eq!(hold.status, HoldStatus::Held);
        assert_eq!(hold.amount, Amount::new(200));

        let balance = ledger.balance(&poster).await;
        assert_eq!(balance.available, Amount::new(300));
        assert_eq!(balance.locked, Amount::new(200));
    }

    #[tokio::test]
    async fn test_hold_insufficient_funds_mutates_nothing() {
        let poster = AgentId::new();
        let ledger = funded_ledger(&poster, 100).await;
        let task_id = TaskId::new();
        let key = IdempotencyKey::for_task(&task_id, "create");

        let result = ledger.hold(&poster, &task_id, Amount::new(200), &key).await;
        assert!(matches!(
            result,
            Err(OpenTaskError::InsufficientFunds {
                requested: 200,
                available: 100,
                ..
            })
        ));

        assert_eq!(ledger.balance(&poster).await.available, Amount::new(100));
        assert!(ledger.hold_for_task(&task_id).await.is_none());
        // Only the deposit entry exists.
        assert_eq!(ledger.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_hold_replay_same_key() {
        let poster = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();
        let key = IdempotencyKey::for_task(&task_id, "create");

        let first = ledger
            .hold(&poster, &task_id, Amount::new(200), &key)
            .await
            .unwrap();
        let replay = ledger
            .hold(&poster, &task_id, Amount::new(200), &key)
            .await
            .unwrap();

        assert_eq!(first.id, replay.id);
        // Funds were locked once.
        assert_eq!(ledger.balance(&poster).await.locked, Amount::new(200));
    }

    #[tokio::test]
    async fn test_second_hold_different_key_conflicts() {
        let poster = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();

        ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(200),
                &IdempotencyKey::new("first"),
            )
            .await
            .unwrap();
        let result = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(200),
                &IdempotencyKey::new("second"),
            )
            .await;

        assert!(matches!(result, Err(OpenTaskError::StateConflict { .. })));
    }

    #[tokio::test]
    async fn test_release_returns_funds() {
        let poster = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(200),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        let settlement = ledger
            .release(&hold.id, &IdempotencyKey::new("release"))
            .await
            .unwrap();

        assert_eq!(settlement.legs, vec![(poster.clone(), Amount::new(200))]);
        let balance = ledger.balance(&poster).await;
        assert_eq!(balance.available, Amount::new(500));
        assert_eq!(balance.locked, Amount::zero());
    }

    #[tokio::test]
    async fn test_capture_pays_payee_in_full() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(200),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        let settlement = ledger
            .capture(&hold.id, &worker, &IdempotencyKey::new("approve"))
            .await
            .unwrap();

        assert_eq!(settlement.legs, vec![(worker.clone(), Amount::new(200))]);
        assert_eq!(ledger.balance(&worker).await.available, Amount::new(200));
        assert_eq!(ledger.balance(&poster).await.available, Amount::new(300));
        assert_eq!(ledger.balance(&poster).await.locked, Amount::zero());
    }

    #[tokio::test]
    async fn test_split_conserves_the_hold() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(100),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        let settlement = ledger
            .split(&hold.id, &worker, 70, &IdempotencyKey::new("resolve"))
            .await
            .unwrap();

        assert_eq!(settlement.paid_to(&worker), Amount::new(70));
        assert_eq!(settlement.paid_to(&poster), Amount::new(30));
        assert_eq!(settlement.total(), Amount::new(100));
        assert_eq!(ledger.balance(&worker).await.available, Amount::new(70));
        assert_eq!(ledger.balance(&poster).await.available, Amount::new(430));
    }

    #[tokio::test]
    async fn test_split_rounds_down_for_the_worker() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(101),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        let settlement = ledger
            .split(&hold.id, &worker, 33, &IdempotencyKey::new("resolve"))
            .await
            .unwrap();

        // 33% of 101 floors to 33; the payer keeps the odd unit.
        assert_eq!(settlement.paid_to(&worker), Amount::new(33));
        assert_eq!(settlement.paid_to(&poster), Amount::new(68));
        assert_eq!(settlement.total(), Amount::new(101));
    }

    #[tokio::test]
    async fn test_split_extremes() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;

        let task_a = TaskId::new();
        let hold_a = ledger
            .hold(&poster, &task_a, Amount::new(100), &IdempotencyKey::new("a"))
            .await
            .unwrap();
        let all_worker = ledger
            .split(&hold_a.id, &worker, 100, &IdempotencyKey::new("ra"))
            .await
            .unwrap();
        assert_eq!(all_worker.paid_to(&worker), Amount::new(100));
        assert_eq!(all_worker.paid_to(&poster), Amount::zero());

        let task_b = TaskId::new();
        let hold_b = ledger
            .hold(&poster, &task_b, Amount::new(100), &IdempotencyKey::new("b"))
            .await
            .unwrap();
        let all_poster = ledger
            .split(&hold_b.id, &worker, 0, &IdempotencyKey::new("rb"))
            .await
            .unwrap();
        assert_eq!(all_poster.paid_to(&worker), Amount::zero());
        assert_eq!(all_poster.paid_to(&poster), Amount::new(100));
    }

    #[tokio::test]
    async fn test_split_rejects_pct_over_hundred() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(100),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        let result = ledger
            .split(&hold.id, &worker, 101, &IdempotencyKey::new("resolve"))
            .await;
        assert!(matches!(result, Err(OpenTaskError::Validation { .. })));
        assert_eq!(ledger.balance(&poster).await.locked, Amount::new(100));
    }

    #[tokio::test]
    async fn test_settlement_replay_same_key() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();
        let key = IdempotencyKey::for_task(&task_id, "approve");

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(200),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        let first = ledger.capture(&hold.id, &worker, &key).await.unwrap();
        let entries_after_first = ledger.entry_count().await;
        let replay = ledger.capture(&hold.id, &worker, &key).await.unwrap();

        assert_eq!(first, replay);
        // The worker was paid exactly once and no new entries appeared.
        assert_eq!(ledger.balance(&worker).await.available, Amount::new(200));
        assert_eq!(ledger.entry_count().await, entries_after_first);
    }

    #[tokio::test]
    async fn test_second_terminal_op_conflicts() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(200),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        ledger
            .capture(&hold.id, &worker, &IdempotencyKey::new("approve"))
            .await
            .unwrap();

        // Different key, same op.
        let retry = ledger
            .capture(&hold.id, &worker, &IdempotencyKey::new("approve-2"))
            .await;
        assert!(matches!(retry, Err(OpenTaskError::StateConflict { .. })));

        // Different op entirely.
        let release = ledger
            .release(&hold.id, &IdempotencyKey::new("approve"))
            .await;
        assert!(matches!(release, Err(OpenTaskError::StateConflict { .. })));
    }

    #[tokio::test]
    async fn test_capture_overflow_mutates_nothing() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        // A payee sitting near the ceiling cannot absorb the payout.
        ledger
            .deposit(&worker, Amount::new(u64::MAX - 10))
            .await
            .unwrap();
        let task_id = TaskId::new();

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(200),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        let entries_before = ledger.entry_count().await;

        let result = ledger
            .capture(&hold.id, &worker, &IdempotencyKey::new("approve"))
            .await;
        assert!(matches!(result, Err(OpenTaskError::AmountOverflow)));

        // Nothing moved: the payer still holds the locked amount, the
        // worker kept its balance, and no entry was journaled.
        let balance = ledger.balance(&poster).await;
        assert_eq!(balance.available, Amount::new(300));
        assert_eq!(balance.locked, Amount::new(200));
        assert_eq!(
            ledger.balance(&worker).await.available,
            Amount::new(u64::MAX - 10)
        );
        assert_eq!(ledger.entry_count().await, entries_before);
        let hold = ledger.get_hold(&hold.id).await.unwrap();
        assert_eq!(hold.status, HoldStatus::Held);
        assert!(hold.settlement.is_none());

        // The hold is still live: releasing it returns the funds.
        ledger
            .release(&hold.id, &IdempotencyKey::new("cancel"))
            .await
            .unwrap();
        let balance = ledger.balance(&poster).await;
        assert_eq!(balance.available, Amount::new(500));
        assert_eq!(balance.locked, Amount::zero());
    }

    #[tokio::test]
    async fn test_split_overflow_applies_neither_leg() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        ledger
            .deposit(&worker, Amount::new(u64::MAX - 10))
            .await
            .unwrap();
        let task_id = TaskId::new();

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(100),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();

        let result = ledger
            .split(&hold.id, &worker, 70, &IdempotencyKey::new("resolve"))
            .await;
        assert!(matches!(result, Err(OpenTaskError::AmountOverflow)));

        // The worker leg failed, so the payer leg must not land either.
        let balance = ledger.balance(&poster).await;
        assert_eq!(balance.available, Amount::new(400));
        assert_eq!(balance.locked, Amount::new(100));
        assert_eq!(
            ledger.balance(&worker).await.available,
            Amount::new(u64::MAX - 10)
        );
        assert_eq!(
            ledger.get_hold(&hold.id).await.unwrap().status,
            HoldStatus::Held
        );
    }

    #[tokio::test]
    async fn test_supply_is_conserved() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 1000).await;
        assert_eq!(ledger.total_supply().await, Amount::new(1000));

        let task_id = TaskId::new();
        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(300),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        assert_eq!(ledger.total_supply().await, Amount::new(1000));

        ledger
            .split(&hold.id, &worker, 55, &IdempotencyKey::new("resolve"))
            .await
            .unwrap();
        assert_eq!(ledger.total_supply().await, Amount::new(1000));
    }

    #[tokio::test]
    async fn test_journal_records_both_split_legs() {
        let poster = AgentId::new();
        let worker = AgentId::new();
        let ledger = funded_ledger(&poster, 500).await;
        let task_id = TaskId::new();

        let hold = ledger
            .hold(
                &poster,
                &task_id,
                Amount::new(100),
                &IdempotencyKey::new("create"),
            )
            .await
            .unwrap();
        ledger
            .split(&hold.id, &worker, 70, &IdempotencyKey::new("resolve"))
            .await
            .unwrap();

        let worker_entries = ledger.account_entries(&worker).await;
        assert_eq!(worker_entries.len(), 1);
        assert_eq!(worker_entries[0].kind, EntryKind::Credit);
        assert_eq!(worker_entries[0].amount, Amount::new(70));

        let poster_entries = ledger.account_entries(&poster).await;
        // Deposit, lock, payout, unlock of the remainder.
        assert_eq!(poster_entries.len(), 4);
        assert!(poster_entries
            .iter()
            .any(|e| e.kind == EntryKind::Unlock && e.amount == Amount::new(30)));
    }

    #[tokio::test]
    async fn test_hold_unknown_account() {
        let ledger = Ledger::new();
        let result = ledger
            .hold(
                &AgentId::new(),
                &TaskId::new(),
                Amount::new(10),
                &IdempotencyKey::new("create"),
            )
            .await;
        assert!(matches!(result, Err(OpenTaskError::AccountNotFound { .. })));
    }
}

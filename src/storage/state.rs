//! Row-level ledger state shared by the memory and file backends.
//!
//! Every method is one atomic statement from the point of view of the
//! callers: the backend holds its mutex (memory) or latch (file) around it.

use crate::core::{
    Account, AccountId, Entry, EntryId, LedgerError, Result, TraceEvent, TraceKind, WorkerContext,
    checked_total,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    accounts: BTreeMap<AccountId, Account>,
    entries: Vec<Entry>,
    trace: Vec<TraceEvent>,
    next_entry_id: u64,
    next_seq: u64,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_account(&mut self, id: AccountId) -> Account {
        self.accounts
            .entry(id)
            .or_insert_with(|| Account::new(id))
            .clone()
    }

    pub fn account(&self, id: AccountId) -> Result<Account> {
        self.accounts
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(id))
    }

    fn account_mut(&mut self, id: AccountId) -> Result<&mut Account> {
        self.accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Append an entry and bump the account's entries counter.
    pub fn create_entry(&mut self, id: AccountId, amount: i64) -> Result<Entry> {
        let account = self.account_mut(id)?;
        account.entries_count += 1;
        account.touch();

        self.next_entry_id += 1;
        let entry = Entry {
            id: EntryId(self.next_entry_id),
            account_id: id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn entries(&self, id: AccountId) -> Result<Vec<Entry>> {
        self.account(id)?;
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.account_id == id)
            .cloned()
            .collect())
    }

    /// Remove every entry of the account; the counter follows the ledger.
    pub fn delete_all_entries(&mut self, id: AccountId) -> Result<usize> {
        let account = self.account_mut(id)?;
        account.entries_count = 0;
        account.touch();

        let before = self.entries.len();
        self.entries.retain(|entry| entry.account_id != id);
        Ok(before - self.entries.len())
    }

    pub fn set_balance(&mut self, id: AccountId, value: i64) -> Result<()> {
        let account = self.account_mut(id)?;
        account.balance = value;
        account.touch();
        Ok(())
    }

    pub fn sum_entries(&self, id: AccountId) -> Result<i64> {
        self.account(id)?;
        checked_total(
            id,
            self.entries
                .iter()
                .filter(|entry| entry.account_id == id)
                .map(|entry| entry.amount),
        )
    }

    /// Add `delta` to the stored balance without reading it first.
    pub fn increment_balance(&mut self, id: AccountId, delta: i64) -> Result<i64> {
        let account = self.account_mut(id)?;
        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or(LedgerError::BalanceOverflow { account: id })?;
        account.touch();
        Ok(account.balance)
    }

    pub fn touch(&mut self, id: AccountId) -> Result<()> {
        self.account_mut(id)?.touch();
        Ok(())
    }

    pub fn record_event(
        &mut self,
        id: AccountId,
        ctx: &WorkerContext,
        kind: TraceKind,
    ) -> Result<TraceEvent> {
        self.account(id)?;
        self.next_seq += 1;
        let event = TraceEvent {
            seq: self.next_seq,
            worker: ctx.index(),
            account: id,
            kind,
            at: Utc::now(),
        };
        self.trace.push(event.clone());
        Ok(event)
    }

    pub fn trace(&self, id: AccountId) -> Vec<TraceEvent> {
        self.trace
            .iter()
            .filter(|event| event.account == id)
            .cloned()
            .collect()
    }

    pub fn clear_trace(&mut self, id: AccountId) {
        self.trace.retain(|event| event.account != id);
    }
}

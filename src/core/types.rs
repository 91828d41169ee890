use super::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Account row holding the derived aggregate.
///
/// `balance` is expected to equal the sum of the account's entries, but weak
/// balance strategies can break that under contention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: i64,
    pub entries_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: 0,
            entries_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Sum `amounts` for `account`, failing instead of wrapping.
pub fn checked_total(account: AccountId, amounts: impl IntoIterator<Item = i64>) -> Result<i64> {
    amounts
        .into_iter()
        .try_fold(0i64, |total, amount| total.checked_add(amount))
        .ok_or(LedgerError::BalanceOverflow { account })
}

/// Identity of one worker, passed explicitly through every call.
///
/// Workers may be tasks in one process or separate processes, so the
/// identity can't live in thread-local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerContext {
    index: usize,
}

impl WorkerContext {
    pub fn new(index: usize) -> Self {
        Self { index }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_is_empty() {
        let account = Account::new(AccountId(3));
        assert_eq!(account.balance, 0);
        assert_eq!(account.entries_count, 0);
        assert_eq!(account.created_at, account.updated_at);
    }

    #[test]
    fn test_checked_total() {
        assert_eq!(checked_total(AccountId(1), [100, -30, 5]), Ok(75));
        assert_eq!(
            checked_total(AccountId(1), [i64::MAX, 1]),
            Err(LedgerError::BalanceOverflow {
                account: AccountId(1)
            })
        );
        assert!(checked_total(AccountId(1), [i64::MAX, 1, -2]).is_err());
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(EntryId(3).to_string(), "03");
        assert_eq!(EntryId(123).to_string(), "123");
        assert_eq!(WorkerContext::new(2).to_string(), "[2]");
    }
}

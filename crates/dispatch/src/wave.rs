//! Round-robin distribution of a recipient list across sender accounts.
//!
//! The resulting plan interleaves sends across accounts ("waves") instead of
//! draining one account's queue before starting the next, which is what lets
//! many accounts work in parallel under their individual throttles.

use waveline_core::types::{AccountId, Recipient};

/// One account's ordered share of a campaign.
#[derive(Debug, Clone)]
pub struct AccountQueue {
    pub account_id: AccountId,
    pub recipients: Vec<Recipient>,
}

/// Ephemeral distribution of one campaign across accounts. Wave `k` holds
/// the `k`-th recipient of every queue; iteration follows the account order
/// the plan was built with. Never persisted, owned by a single dispatch
/// invocation.
#[derive(Debug, Clone, Default)]
pub struct WavePlan {
    queues: Vec<AccountQueue>,
}

impl WavePlan {
    /// Number of waves, i.e. the longest queue length. Zero for an empty plan.
    pub fn max_waves(&self) -> usize {
        self.queues
            .iter()
            .map(|q| q.recipients.len())
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.max_waves() == 0
    }

    pub fn total_jobs(&self) -> usize {
        self.queues.iter().map(|q| q.recipients.len()).sum()
    }

    /// Jobs of one wave, at most one per account, in account order.
    pub fn wave(&self, wave: usize) -> impl Iterator<Item = (AccountId, &Recipient)> {
        self.queues
            .iter()
            .filter_map(move |q| q.recipients.get(wave).map(|r| (q.account_id, r)))
    }

    pub fn queues(&self) -> &[AccountQueue] {
        &self.queues
    }
}

/// Distribute `recipients` across `accounts` by round-robin single-item
/// assignment. Recipients are sorted by id first so the distribution is
/// fully determined by (recipient set, account order) and reproducible.
pub fn plan(accounts: &[AccountId], recipients: &[Recipient]) -> WavePlan {
    if accounts.is_empty() {
        // Zero waves; the caller surfaces this as "no available senders".
        return WavePlan::default();
    }

    let mut sorted: Vec<Recipient> = recipients.to_vec();
    sorted.sort_by_key(|r| r.id);

    let mut queues: Vec<AccountQueue> = accounts
        .iter()
        .map(|&account_id| AccountQueue {
            account_id,
            recipients: Vec::new(),
        })
        .collect();

    for (index, recipient) in sorted.into_iter().enumerate() {
        queues[index % accounts.len()].recipients.push(recipient);
    }

    WavePlan { queues }
}

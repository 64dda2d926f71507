//! Winner selection policies
//!
//! Selection is a pure function over the bid list, behind a trait so a
//! deployment can rank bidders (reputation, past throughput) without
//! touching the lifecycle state machine. The baseline policy awards the
//! earliest submitted bid.

use opentask_types::{AgentId, Bid};

/// Strategy for picking the winning bidder among eligible bids
pub trait SelectionPolicy: Send + Sync {
    /// Pick a winner, or None when no bid is eligible
    fn select(&self, bids: &[Bid]) -> Option<AgentId>;
}

/// First-submitted-wins selection
///
/// Deterministic: earliest `submitted_at` wins, and an exact timestamp tie
/// goes to the bid that entered the ledger first.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstSubmitted;

impl SelectionPolicy for FirstSubmitted {
    fn select(&self, bids: &[Bid]) -> Option<AgentId> {
        let mut winner: Option<&Bid> = None;
        for bid in bids.iter().filter(|b| b.is_eligible()) {
            match winner {
                Some(best) if best.submitted_at <= bid.submitted_at => {}
                _ => winner = Some(bid),
            }
        }
        winner.map(|b| b.bidder.clone())
    }
}

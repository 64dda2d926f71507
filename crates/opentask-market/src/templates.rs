//! Task templates: repeatable work at scaled difficulty
//!
//! A template describes a family of tasks whose reward grows linearly with
//! a difficulty level. Reward scaling lives here, next to the marketplace,
//! not in the settlement core: the ledger only ever sees the final amount.

use opentask_types::{Amount, OpenTaskError, Result};

use serde::{Deserialize, Serialize};

/// Reward for a task at a difficulty level: base plus level times increment
pub fn reward_for_level(
    base_reward: Amount,
    reward_per_level: Amount,
    level: u32,
) -> Result<Amount> {
    let scaled = reward_per_level
        .0
        .checked_mul(u64::from(level))
        .ok_or(OpenTaskError::AmountOverflow)?;
    base_reward
        .checked_add(Amount::new(scaled))
        .ok_or(OpenTaskError::AmountOverflow)
}

/// A reusable task description with a difficulty ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Template identifier, e.g. "translate-doc"
    pub name: String,
    /// Title for instantiated tasks
    pub title: String,
    /// Work description for instantiated tasks
    pub description: String,
    /// Reward at level 0
    pub base_reward: Amount,
    /// Reward increment per difficulty level
    pub reward_per_level: Amount,
}

/// Parameters for task creation, produced from a template
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub reward: Amount,
}

impl TaskTemplate {
    /// Produce create-task parameters at the given difficulty level
    pub fn instantiate(&self, level: u32) -> Result<TaskDraft> {
        let reward = reward_for_level(self.base_reward, self.reward_per_level, level)?;
        Ok(TaskDraft {
            title: format!("{} (level {})", self.title, level),
            description: self.description.clone(),
            reward,
        })
    }
}

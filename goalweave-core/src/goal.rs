//! Goals: objective conditions with priority-stack lifecycle metadata.

use crate::condition::Condition;
use crate::fact::FactOptional;
use crate::ontology::SetOfTypes;
use crate::world_state::WorldState;
use crate::{ActionId, FullEventId};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

/// A characteristic the agent wants the world to have.
#[derive(Debug, Clone)]
pub struct Goal {
    objective: Condition,
    is_persistent: bool,
    one_step_towards: bool,
    /// Maximum time the goal may stay outside the top of the stack.
    /// `None` means forever.
    max_time_to_keep_inactive: Option<Duration>,
    inactive_since: Option<Instant>,
    group_id: String,
    /// Fact that must hold in the world for the goal to be enabled.
    enabling_fact: Option<FactOptional>,
    // Search-pruning caches, refreshed against the domain uuid.
    pub(crate) direct_predecessors: BTreeSet<String>,
    pub(crate) action_predecessors: BTreeSet<ActionId>,
    pub(crate) event_predecessors: BTreeSet<FullEventId>,
}

impl PartialEq for Goal {
    fn eq(&self, other: &Self) -> bool {
        self.objective == other.objective
            && self.is_persistent == other.is_persistent
            && self.one_step_towards == other.one_step_towards
            && self.group_id == other.group_id
    }
}

impl Goal {
    /// Priority used when the caller does not pick one.
    pub const DEFAULT_PRIORITY: i32 = 10;

    pub fn new(objective: Condition) -> Self {
        Self {
            objective,
            is_persistent: false,
            one_step_towards: false,
            max_time_to_keep_inactive: None,
            inactive_since: None,
            group_id: String::new(),
            enabling_fact: None,
            direct_predecessors: BTreeSet::new(),
            action_predecessors: BTreeSet::new(),
            event_predecessors: BTreeSet::new(),
        }
    }

    pub fn persistent(mut self) -> Self {
        self.is_persistent = true;
        self
    }

    pub fn one_step_towards(mut self) -> Self {
        self.one_step_towards = true;
        self
    }

    pub fn with_max_time_to_keep_inactive(mut self, duration: Duration) -> Self {
        self.max_time_to_keep_inactive = Some(duration);
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_enabling_fact(mut self, fact: FactOptional) -> Self {
        self.enabling_fact = Some(fact);
        self
    }

    pub fn objective(&self) -> &Condition {
        &self.objective
    }

    pub fn is_persistent(&self) -> bool {
        self.is_persistent
    }

    pub fn is_one_step_towards(&self) -> bool {
        self.one_step_towards
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn enabling_fact(&self) -> Option<&FactOptional> {
        self.enabling_fact.as_ref()
    }

    pub fn max_time_to_keep_inactive(&self) -> Option<Duration> {
        self.max_time_to_keep_inactive
    }

    pub fn inactive_since(&self) -> Option<Instant> {
        self.inactive_since
    }

    /// The goal reached the top of its stack: clear the inactivity clock.
    pub fn notify_activity(&mut self) {
        self.inactive_since = None;
    }

    pub fn set_inactive_since_if_not_set(&mut self, now: Option<Instant>) {
        if self.inactive_since.is_none() {
            self.inactive_since = now;
        }
    }

    pub fn is_inactive_for_too_long(&self, now: Option<Instant>) -> bool {
        let (Some(limit), Some(since), Some(now)) =
            (self.max_time_to_keep_inactive, self.inactive_since, now)
        else {
            return false;
        };
        now.duration_since(since) >= limit
    }

    /// Is the enabling fact (if any) currently satisfied.
    pub fn is_enabled(&self, world: &WorldState, types: &SetOfTypes) -> bool {
        match &self.enabling_fact {
            Some(fact) => world.is_optional_fact_satisfied(fact, types),
            None => true,
        }
    }

    pub fn is_satisfied(&self, world: &WorldState, types: &SetOfTypes) -> bool {
        self.is_enabled(world, types) && self.objective.is_true_simple(world, types)
    }

    /// Can this action or event directly satisfy the objective.
    pub fn can_deduction_satisfy(&self, deduction_id: &str) -> bool {
        self.direct_predecessors.contains(deduction_id)
    }

    pub fn is_a_simple_fact_objective(&self) -> bool {
        matches!(self.objective, Condition::Fact(_))
    }

    pub fn action_predecessors(&self) -> &BTreeSet<ActionId> {
        &self.action_predecessors
    }

    pub fn event_predecessors(&self) -> &BTreeSet<FullEventId> {
        &self.event_predecessors
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_persistent {
            write!(f, "persist(")?;
        }
        if self.one_step_towards {
            write!(f, "oneStepTowards(")?;
        }
        write!(f, "{}", self.objective)?;
        if self.one_step_towards {
            write!(f, ")")?;
        }
        if self.is_persistent {
            write!(f, ")")?;
        }
        Ok(())
    }
}

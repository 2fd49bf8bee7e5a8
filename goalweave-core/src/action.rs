//! Agent-chosen actions: parameters, conditions, phased effects and the
//! successor caches the domain maintains on them.

use crate::condition::Condition;
use crate::effect::{Successions, WorldStateModification};
use crate::fact::FactOptional;
use crate::goal::Goal;
use crate::ontology::Parameter;
use crate::ActionId;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

/// Phased effect of an action, plus the goals it pushes.
#[derive(Debug, Clone, Default)]
pub struct ActionEffect {
    /// Applied when the action starts.
    pub at_start: Option<WorldStateModification>,
    /// Applied when the action finishes.
    pub at_end: Option<WorldStateModification>,
    /// Declared for planning only: applied indirectly, maybe.
    pub potentially_at_end: Option<WorldStateModification>,
    pub goals_to_add: BTreeMap<i32, Vec<Goal>>,
    pub goals_to_add_in_current_priority: Vec<Goal>,
}

impl ActionEffect {
    pub fn new(at_end: WorldStateModification) -> Self {
        Self {
            at_end: Some(at_end),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.at_start.is_none()
            && self.at_end.is_none()
            && self.potentially_at_end.is_none()
            && self.goals_to_add.is_empty()
            && self.goals_to_add_in_current_priority.is_empty()
    }

    /// Every optional fact any phase of the effect can modify.
    pub fn all_modifiable_facts(&self) -> BTreeSet<FactOptional> {
        let mut res = BTreeSet::new();
        for wsm in [&self.at_start, &self.at_end, &self.potentially_at_end]
            .into_iter()
            .flatten()
        {
            let _ = wsm.for_each_modifiable_fact(&mut |f| {
                res.insert(f.clone());
                ControlFlow::Continue(())
            });
        }
        res
    }
}

/// An action of the domain.
#[derive(Debug, Clone)]
pub struct Action {
    pub parameters: Vec<Parameter>,
    pub precondition: Option<Condition>,
    pub over_all_condition: Option<Condition>,
    pub effect: ActionEffect,
    /// Symbolic duration serialized into the PDDL `:duration` clause.
    pub duration: i32,
    /// Facts that make this action preferable without being required.
    pub prefer_in_context: Option<Condition>,
    pub high_importance_of_not_repeating: bool,
    /// False when the effect cannot change anything beyond the
    /// precondition: the planner skips the action entirely.
    pub(crate) usable: bool,
    /// Successor sets per effect leaf of `effect.at_end`.
    pub(crate) successions_at_end: Vec<Successions>,
    /// Successor sets per effect leaf of `effect.potentially_at_end`.
    pub(crate) successions_potential: Vec<Successions>,
    /// Successors that cannot help after this action (impossible or
    /// pointless successions), by action id.
    pub(crate) successions_without_interest: BTreeSet<ActionId>,
}

impl Action {
    pub fn new(precondition: Option<Condition>, effect: ActionEffect) -> Self {
        Self {
            parameters: Vec::new(),
            precondition,
            over_all_condition: None,
            effect,
            duration: 1,
            prefer_in_context: None,
            high_importance_of_not_repeating: false,
            usable: true,
            successions_at_end: Vec::new(),
            successions_potential: Vec::new(),
            successions_without_interest: BTreeSet::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_prefer_in_context(mut self, condition: Condition) -> Self {
        self.prefer_in_context = Some(condition);
        self
    }

    pub fn with_high_importance_of_not_repeating(mut self) -> Self {
        self.high_importance_of_not_repeating = true;
        self
    }

    pub fn with_duration(mut self, duration: i32) -> Self {
        self.duration = duration;
        self
    }

    pub fn is_usable(&self) -> bool {
        self.usable
    }

    pub fn successions_at_end(&self) -> &[Successions] {
        &self.successions_at_end
    }

    pub fn successions_potential(&self) -> &[Successions] {
        &self.successions_potential
    }

    pub fn successions_without_interest(&self) -> &BTreeSet<ActionId> {
        &self.successions_without_interest
    }

    /// Union of the successor ids over every effect leaf of both planning
    /// phases.
    pub fn all_successions(&self) -> Successions {
        let mut res = Successions::default();
        for s in self.successions_at_end.iter().chain(&self.successions_potential) {
            res.merge(s);
        }
        res
    }

    /// Facts mentioned positively/negatively in the precondition.
    pub fn precondition_facts(&self) -> BTreeSet<FactOptional> {
        match &self.precondition {
            Some(condition) => condition.all_opt_facts(),
            None => BTreeSet::new(),
        }
    }
}

//! Plan types: action invocations, parallel steps and plan costs.

use goalweave_core::{ActionId, Bindings, Domain, Entity, Goal, Parameter};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Tunable planner thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Abort threshold for repeating the same instantiated action across a
    /// full multi-goal plan.
    pub max_action_repetitions_in_full_plan: usize,
    /// Abort threshold for repeating the same instantiated action inside
    /// one per-goal recursion.
    pub max_action_repetitions_per_goal: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_action_repetitions_in_full_plan: 10,
            max_action_repetitions_per_goal: 1,
        }
    }
}

/// An action id with chosen parameter values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInvocation {
    pub action_id: ActionId,
    pub parameters: BTreeMap<Parameter, Entity>,
}

impl ActionInvocation {
    pub fn new(action_id: impl Into<ActionId>, parameters: BTreeMap<Parameter, Entity>) -> Self {
        Self {
            action_id: action_id.into(),
            parameters,
        }
    }

    /// Collapse set-valued bindings into one invocation, keeping the first
    /// (deterministic) value of each constrained parameter.
    pub fn from_bindings(action_id: impl Into<ActionId>, bindings: &Bindings) -> Self {
        let mut parameters = BTreeMap::new();
        for (parameter, values) in bindings {
            if let Some(first) = values.iter().next() {
                parameters.insert(parameter.clone(), first.clone());
            }
        }
        Self {
            action_id: action_id.into(),
            parameters,
        }
    }

    /// PDDL form: `(action_id v1 v2)`, parameters in declaration order.
    pub fn to_pddl(&self, domain: &Domain) -> String {
        let mut res = format!("({}", self.action_id);
        if let Some(action) = domain.action(&self.action_id) {
            for parameter in &action.parameters {
                if let Some(value) = self.parameters.get(parameter) {
                    res.push(' ');
                    res.push_str(&value.value);
                }
            }
        }
        res.push(')');
        res
    }
}

impl fmt::Display for ActionInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action_id)?;
        if !self.parameters.is_empty() {
            write!(f, "(")?;
            for (i, (parameter, value)) in self.parameters.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} -> {}", parameter.name, value.value)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl Serialize for ActionInvocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("action_id", &self.action_id)?;
        let parameters: BTreeMap<&str, &str> = self
            .parameters
            .iter()
            .map(|(p, v)| (p.name.as_str(), v.value.as_str()))
            .collect();
        map.serialize_entry("parameters", &parameters)?;
        map.end()
    }
}

/// One planner step: the invocation plus the goal that motivated it.
#[derive(Debug, Clone)]
pub struct ActionInvocationWithGoal {
    pub invocation: ActionInvocation,
    pub from_goal: Option<Goal>,
    pub from_goal_priority: i32,
}

impl ActionInvocationWithGoal {
    pub fn new(
        invocation: ActionInvocation,
        from_goal: Option<Goal>,
        from_goal_priority: i32,
    ) -> Self {
        Self {
            invocation,
            from_goal,
            from_goal_priority,
        }
    }
}

/// A set of invocations runnable in the same time slot.
#[derive(Debug, Clone, Default)]
pub struct ActionsToDoInParallel {
    pub actions: Vec<ActionInvocationWithGoal>,
}

/// Ordered list of parallel steps.
#[derive(Debug, Clone, Default)]
pub struct ParallelPlan {
    pub steps: Vec<ActionsToDoInParallel>,
}

impl ParallelPlan {
    /// Number of time slots.
    pub fn cost(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Goals motivating the plan, deduplicated in order of appearance.
    pub fn extract_satisfied_goals(&self) -> Vec<Goal> {
        let mut res: Vec<Goal> = Vec::new();
        for step in &self.steps {
            for action in &step.actions {
                if let Some(goal) = &action.from_goal {
                    if !res.contains(goal) {
                        res.push(goal.clone());
                    }
                }
            }
        }
        res
    }
}

/// Cost of a simulated plan, compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCost {
    pub success: bool,
    pub goals_not_satisfied: usize,
    pub goals_satisfied: usize,
    pub actions_done: usize,
}

impl Default for PlanCost {
    fn default() -> Self {
        Self {
            success: true,
            goals_not_satisfied: 0,
            goals_satisfied: 0,
            actions_done: 0,
        }
    }
}

impl PlanCost {
    pub fn is_better_than(&self, other: &PlanCost) -> bool {
        if self.success != other.success {
            return self.success;
        }
        if self.goals_not_satisfied != other.goals_not_satisfied {
            return self.goals_not_satisfied > other.goals_not_satisfied;
        }
        if self.goals_satisfied != other.goals_satisfied {
            return self.goals_satisfied > other.goals_satisfied;
        }
        self.actions_done < other.actions_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_cost_ordering() {
        let base = PlanCost {
            success: true,
            goals_not_satisfied: 0,
            goals_satisfied: 1,
            actions_done: 2,
        };
        let failed = PlanCost {
            success: false,
            ..base
        };
        assert!(base.is_better_than(&failed));
        assert!(!failed.is_better_than(&base));

        let longer = PlanCost {
            actions_done: 3,
            ..base
        };
        assert!(base.is_better_than(&longer));

        let more_goals = PlanCost {
            goals_satisfied: 2,
            actions_done: 5,
            ..base
        };
        assert!(more_goals.is_better_than(&base));
    }

    #[test]
    fn test_invocation_serializes_to_flat_json() {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            Parameter::new("?o", None),
            Entity::new("charger", None),
        );
        let invocation = ActionInvocation::new("goto", parameters);
        let json = serde_json::to_string(&invocation).unwrap();
        assert_eq!(
            json,
            "{\"action_id\":\"goto\",\"parameters\":{\"?o\":\"charger\"}}"
        );
    }
}

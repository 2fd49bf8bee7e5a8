//! Priority-ordered goal stack and the per-plan output bookkeeping.

use crate::domain::Domain;
use crate::goal::Goal;
use crate::ontology::SetOfTypes;
use crate::world_state::WorldState;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::time::Instant;
use tracing::debug;

/// How a plan resolution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlannerStepType {
    #[default]
    InProgress,
    FinishedOnSuccess,
    FinishedOnFailure,
}

/// Output information accumulated over a plan resolution.
#[derive(Debug, Default)]
pub struct PlanOutputInfos {
    step_type: PlannerStepType,
    not_satisfied_goals: usize,
    satisfied_goals: Vec<Goal>,
    satisfied_persistent_goals: Vec<Goal>,
    first_goal_in_success: Option<bool>,
}

impl PlanOutputInfos {
    pub fn set_type(&mut self, step_type: PlannerStepType) {
        self.step_type = step_type;
    }

    pub fn step_type(&self) -> PlannerStepType {
        self.step_type
    }

    pub fn notify_satisfied_goal(&mut self, goal: &Goal) {
        if self.first_goal_in_success.is_none() {
            self.first_goal_in_success = Some(true);
        }
        if goal.is_persistent() {
            // A persistent goal stays stacked and may be re-noticed by
            // every sweep: record it once.
            if !self.satisfied_persistent_goals.contains(goal) {
                self.satisfied_persistent_goals.push(goal.clone());
            }
        } else {
            self.satisfied_goals.push(goal.clone());
        }
    }

    pub fn notify_not_satisfied_goal(&mut self, _goal: &Goal) {
        if self.first_goal_in_success.is_none() {
            self.first_goal_in_success = Some(false);
        }
        self.not_satisfied_goals += 1;
    }

    pub fn nb_of_not_satisfied_goals(&self) -> usize {
        self.not_satisfied_goals
    }

    pub fn nb_of_satisfied_goals(&self) -> usize {
        self.satisfied_goals.len() + self.satisfied_persistent_goals.len()
    }

    pub fn is_first_goal_in_success(&self) -> bool {
        self.first_goal_in_success.unwrap_or(false)
    }

    pub fn take_goals_done(&mut self) -> Vec<Goal> {
        std::mem::take(&mut self.satisfied_goals)
    }

    pub fn goals_done(&self) -> &[Goal] {
        &self.satisfied_goals
    }
}

/// Priority-ordered stack of goals, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct GoalStack {
    goals: BTreeMap<i32, Vec<Goal>>,
    uuid_of_last_domain_refresh: Option<u64>,
}

impl GoalStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn goals(&self) -> &BTreeMap<i32, Vec<Goal>> {
        &self.goals
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// Priority of the highest non-empty bucket.
    pub fn current_priority(&self) -> i32 {
        self.goals
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Goal::DEFAULT_PRIORITY)
    }

    /// First enabled goal of the highest bucket, with its priority.
    pub fn active_goal(&self, world: &WorldState, types: &SetOfTypes) -> Option<(&Goal, i32)> {
        for (&priority, bucket) in self.goals.iter().rev() {
            for goal in bucket {
                if goal.is_enabled(world, types) {
                    return Some((goal, priority));
                }
            }
        }
        None
    }

    /// Push one goal. Re-evaluation (satisfied-goal removal, inactivity) is
    /// done right away so the stack invariants hold.
    pub fn push_goal(
        &mut self,
        goal: Goal,
        priority: i32,
        world: &WorldState,
        types: &SetOfTypes,
        now: Option<Instant>,
    ) -> bool {
        self.uuid_of_last_domain_refresh = None;
        self.goals.entry(priority).or_default().push(goal);
        self.refresh_after_world_change(world, types, now);
        true
    }

    /// Add priority-keyed goals, skipping exact duplicates already stacked.
    pub fn add_goals(
        &mut self,
        goals_to_add: &BTreeMap<i32, Vec<Goal>>,
        world: &WorldState,
        types: &SetOfTypes,
        now: Option<Instant>,
    ) -> bool {
        let mut changed = false;
        for (&priority, goals) in goals_to_add {
            for goal in goals {
                if self
                    .goals
                    .get(&priority)
                    .is_some_and(|bucket| bucket.contains(goal))
                {
                    continue;
                }
                self.goals.entry(priority).or_default().push(goal.clone());
                self.uuid_of_last_domain_refresh = None;
                changed = true;
            }
        }
        if changed {
            self.refresh_after_world_change(world, types, now);
        }
        changed
    }

    /// Add goals at the priority of the currently active bucket.
    pub fn add_goals_in_current_priority(
        &mut self,
        goals: &[Goal],
        world: &WorldState,
        types: &SetOfTypes,
        now: Option<Instant>,
    ) -> bool {
        if goals.is_empty() {
            return false;
        }
        let priority = self.current_priority();
        let mut map = BTreeMap::new();
        map.insert(priority, goals.to_vec());
        self.add_goals(&map, world, types, now)
    }

    /// Drop every goal of a group. Returns true when something was removed.
    pub fn remove_goals_of_group(&mut self, group_id: &str) -> bool {
        let mut removed = false;
        self.goals.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|g| g.group_id() != group_id);
            removed |= bucket.len() != before;
            !bucket.is_empty()
        });
        removed
    }

    /// Remove the first goal equal to the given one.
    pub fn remove_first_goal_equal_to(&mut self, goal: &Goal) -> bool {
        let mut removed = false;
        self.goals.retain(|_, bucket| {
            if !removed {
                if let Some(pos) = bucket.iter().position(|g| g == goal) {
                    bucket.remove(pos);
                    removed = true;
                }
            }
            !bucket.is_empty()
        });
        removed
    }

    /// Move the first goal equal to `goal` to another priority bucket.
    pub fn change_goal_priority(
        &mut self,
        goal: &Goal,
        new_priority: i32,
        push_front: bool,
    ) -> bool {
        let mut extracted = None;
        self.goals.retain(|_, bucket| {
            if extracted.is_none() {
                if let Some(pos) = bucket.iter().position(|g| g == goal) {
                    extracted = Some(bucket.remove(pos));
                }
            }
            !bucket.is_empty()
        });
        match extracted {
            Some(goal) => {
                let bucket = self.goals.entry(new_priority).or_default();
                if push_front {
                    bucket.insert(0, goal);
                } else {
                    bucket.push(goal);
                }
                true
            }
            None => false,
        }
    }

    /// Drop goals inactive for too long and restamp the inactivity clocks
    /// (invariants I4/I5). Satisfaction-based removal is not done here: it
    /// belongs to the recording sweeps (`drop_satisfied_goals`,
    /// `notify_action_done`, `iterate_on_goals_and_remove_non_persistent`).
    pub fn refresh_after_world_change(
        &mut self,
        world: &WorldState,
        types: &SetOfTypes,
        now: Option<Instant>,
    ) -> bool {
        let mut changed = false;
        self.goals.retain(|_, bucket| {
            bucket.retain(|goal| {
                if goal.is_inactive_for_too_long(now) {
                    debug!(goal = %goal, "dropping goal inactive for too long");
                    changed = true;
                    return false;
                }
                true
            });
            !bucket.is_empty()
        });

        // Restamp activity: the first enabled goal of the top bucket is the
        // active one, every other goal accumulates inactivity.
        let mut active_seen = false;
        for (_, bucket) in self.goals.iter_mut().rev() {
            for goal in bucket.iter_mut() {
                if !active_seen && goal.is_enabled(world, types) {
                    active_seen = true;
                    goal.notify_activity();
                } else {
                    goal.set_inactive_since_if_not_set(now);
                }
            }
        }
        changed
    }

    /// Record and drop every satisfied goal: non-persistent goals leave the
    /// stack, persistent ones stay but are recorded once.
    pub fn drop_satisfied_goals(
        &mut self,
        world: &WorldState,
        types: &SetOfTypes,
        mut out_infos: Option<&mut PlanOutputInfos>,
    ) -> bool {
        let mut changed = false;
        self.goals.retain(|_, bucket| {
            bucket.retain(|goal| {
                if goal.is_satisfied(world, types) {
                    if let Some(infos) = out_infos.as_deref_mut() {
                        infos.notify_satisfied_goal(goal);
                    }
                    if !goal.is_persistent() {
                        changed = true;
                        return false;
                    }
                }
                true
            });
            !bucket.is_empty()
        });
        changed
    }

    /// Walk goals by decreasing priority; drop satisfied non-persistent and
    /// inactivity-expired goals on the way. The callback returning true
    /// marks the goal active and stops the walk.
    pub fn iterate_on_goals_and_remove_non_persistent(
        &mut self,
        callback: &mut dyn FnMut(&Goal, i32) -> bool,
        world: &WorldState,
        types: &SetOfTypes,
        now: Option<Instant>,
        mut out_infos: Option<&mut PlanOutputInfos>,
    ) {
        let priorities: Vec<i32> = self.goals.keys().rev().copied().collect();
        let mut plan_found = false;
        for priority in priorities {
            if plan_found {
                break;
            }
            let Some(bucket) = self.goals.get(&priority) else {
                continue;
            };
            let mut kept: Vec<Goal> = Vec::with_capacity(bucket.len());
            let mut to_visit = bucket.clone();
            let mut visit_result = ControlFlow::Continue(());
            for mut goal in to_visit.drain(..) {
                if matches!(visit_result, ControlFlow::Break(())) {
                    kept.push(goal);
                    continue;
                }
                if goal.is_satisfied(world, types) {
                    if let Some(infos) = out_infos.as_deref_mut() {
                        infos.notify_satisfied_goal(&goal);
                    }
                    if goal.is_persistent() {
                        kept.push(goal);
                    }
                    continue;
                }
                if goal.is_inactive_for_too_long(now) {
                    continue;
                }
                if !goal.is_enabled(world, types) {
                    if let Some(infos) = out_infos.as_deref_mut() {
                        infos.notify_not_satisfied_goal(&goal);
                    }
                    goal.set_inactive_since_if_not_set(now);
                    kept.push(goal);
                    continue;
                }
                if callback(&goal, priority) {
                    goal.notify_activity();
                    plan_found = true;
                    visit_result = ControlFlow::Break(());
                } else {
                    if let Some(infos) = out_infos.as_deref_mut() {
                        infos.notify_not_satisfied_goal(&goal);
                    }
                    goal.set_inactive_since_if_not_set(now);
                }
                kept.push(goal);
            }
            if kept.is_empty() {
                self.goals.remove(&priority);
            } else {
                self.goals.insert(priority, kept);
            }
        }
    }

    /// Apply a planner step's goal additions and drop goals it satisfied.
    #[allow(clippy::too_many_arguments)]
    pub fn notify_action_done(
        &mut self,
        goals_to_add: Option<&BTreeMap<i32, Vec<Goal>>>,
        goals_to_add_in_current_priority: Option<&[Goal]>,
        world: &WorldState,
        types: &SetOfTypes,
        now: Option<Instant>,
        mut out_infos: Option<&mut PlanOutputInfos>,
    ) -> bool {
        let mut changed = false;
        if let Some(goals_to_add) = goals_to_add {
            changed |= self.add_goals(goals_to_add, world, types, now);
        }
        if let Some(goals) = goals_to_add_in_current_priority {
            changed |= self.add_goals_in_current_priority(goals, world, types, now);
        }

        self.goals.retain(|_, bucket| {
            bucket.retain(|goal| {
                if goal.is_satisfied(world, types) {
                    if let Some(infos) = out_infos.as_deref_mut() {
                        infos.notify_satisfied_goal(goal);
                    }
                    if !goal.is_persistent() {
                        changed = true;
                        return false;
                    }
                }
                true
            });
            !bucket.is_empty()
        });
        changed
    }

    /// Lazily refresh the per-goal predecessor caches against the domain.
    pub fn refresh_if_needed(&mut self, domain: &Domain) {
        if self.uuid_of_last_domain_refresh == Some(domain.uuid()) {
            return;
        }
        self.uuid_of_last_domain_refresh = Some(domain.uuid());
        for bucket in self.goals.values_mut() {
            for goal in bucket.iter_mut() {
                domain.compute_goal_predecessors(goal);
            }
        }
    }

    /// Every wsm of the stack's goals, for debugging displays.
    pub fn flattened(&self) -> Vec<(i32, &Goal)> {
        let mut res = Vec::new();
        for (&priority, bucket) in self.goals.iter().rev() {
            for goal in bucket {
                res.push((priority, goal));
            }
        }
        res
    }
}

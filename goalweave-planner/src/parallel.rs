//! Sequential-to-parallel plan transformation: pull later actions into
//! earlier time slots when nothing contradicts and no goal is lost.

use crate::notify::{notify_action_done, notify_action_started};
use crate::plan::{ActionInvocationWithGoal, ActionsToDoInParallel, ParallelPlan};
use goalweave_core::{
    Condition, Domain, Entity, FactOptional, Goal, Parameter, PlanOutputInfos, Problem,
    SetOfCallbacks, WorldStateModification,
};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use std::time::Instant;

/// One plan action with its instantiated condition and effects, resolved
/// lazily.
struct ActionDataForParallelisation {
    step: ActionInvocationWithGoal,
    condition: Option<Condition>,
    at_start: Option<WorldStateModification>,
    at_end: Option<WorldStateModification>,
    potentially_at_end: Option<WorldStateModification>,
    modifiable_facts: BTreeSet<FactOptional>,
}

impl ActionDataForParallelisation {
    fn new(domain: &Domain, step: ActionInvocationWithGoal) -> Option<Self> {
        let action = domain.action(&step.invocation.action_id)?;
        let parameters: BTreeMap<Parameter, Entity> = step.invocation.parameters.clone();
        let instantiate = |wsm: &Option<WorldStateModification>| {
            wsm.as_ref().map(|w| {
                if parameters.is_empty() {
                    w.clone()
                } else {
                    w.clone_with(&parameters)
                }
            })
        };
        let condition = action.precondition.as_ref().map(|c| {
            if parameters.is_empty() {
                c.clone()
            } else {
                c.clone_with(Some(&parameters), false)
            }
        });
        let at_start = instantiate(&action.effect.at_start);
        let at_end = instantiate(&action.effect.at_end);
        let potentially_at_end = instantiate(&action.effect.potentially_at_end);

        let mut modifiable_facts = BTreeSet::new();
        for wsm in [&at_start, &at_end, &potentially_at_end].into_iter().flatten() {
            let _ = wsm.for_each_modifiable_fact(&mut |f| {
                modifiable_facts.insert(f.clone());
                ControlFlow::Continue(())
            });
        }

        Some(Self {
            step,
            condition,
            at_start,
            at_end,
            potentially_at_end,
            modifiable_facts,
        })
    }

    /// No effect of one contradicts the precondition of the other.
    fn can_be_in_parallel(&self, other: &Self) -> bool {
        if let Some(condition) = &other.condition {
            if condition.has_a_contradiction_with(&self.modifiable_facts, false, None) {
                return false;
            }
        }
        if let Some(condition) = &self.condition {
            if condition.has_a_contradiction_with(&other.modifiable_facts, false, None) {
                return false;
            }
        }
        true
    }

    fn can_be_in_parallel_of_list(&self, others: &[ActionDataForParallelisation]) -> bool {
        others.iter().all(|other| self.can_be_in_parallel(other))
    }
}

/// Run the remaining steps of the plan on a scratch problem and collect the
/// goals they satisfy. `None` when a precondition no longer holds.
fn check_satisfied_goals(
    problem: &mut Problem,
    domain: &Domain,
    plan: &[Vec<ActionDataForParallelisation>],
    from_step: usize,
    action_to_skip: Option<(usize, usize)>,
    now: Option<Instant>,
) -> Option<Vec<Goal>> {
    let callbacks = SetOfCallbacks::default();
    let types = &domain.ontology().types;
    let mut out_infos = PlanOutputInfos::default();

    for (step_index, step) in plan.iter().enumerate().skip(from_step + 1) {
        for (action_index, action_data) in step.iter().enumerate() {
            if action_to_skip == Some((step_index, action_index)) {
                continue;
            }
            if let Some(condition) = &action_data.condition {
                if !condition.is_true_simple(&problem.world_state, types) {
                    return None;
                }
            }
            for wsm in [
                &action_data.at_start,
                &action_data.at_end,
                &action_data.potentially_at_end,
            ]
            .into_iter()
            .flatten()
            {
                problem.world_state.modify(
                    Some(wsm),
                    &mut problem.goal_stack,
                    domain.set_of_events(),
                    &callbacks,
                    types,
                    now,
                    true,
                );
            }
            if let Some(action) = domain.action(&action_data.step.invocation.action_id) {
                problem.goal_stack.notify_action_done(
                    Some(&action.effect.goals_to_add),
                    Some(&action.effect.goals_to_add_in_current_priority),
                    &problem.world_state,
                    types,
                    now,
                    Some(&mut out_infos),
                );
            }
        }
    }
    Some(out_infos.take_goals_done())
}

fn notify_actions_done_and_remove_corresponding_goals(
    goals: &mut Vec<Goal>,
    actions: &[ActionDataForParallelisation],
    problem: &mut Problem,
    domain: &Domain,
    callbacks: &SetOfCallbacks,
    now: Option<Instant>,
) {
    let mut out_infos = PlanOutputInfos::default();
    for action_data in actions {
        notify_action_done(
            problem,
            domain,
            callbacks,
            &action_data.step,
            now,
            Some(&mut out_infos),
        );
    }
    for satisfied in out_infos.take_goals_done() {
        goals.retain(|g| g != &satisfied);
    }
}

/// Transform a sequential plan into parallel steps.
///
/// A later action is pulled into an earlier slot iff its precondition has
/// no contradiction with the effects of the actions already in the slot
/// (both directions) and the rest of the plan still satisfies the same
/// goals. At-start effects are applied on the actual problem slot by slot.
pub fn to_parallel_plan(
    sequential_plan: Vec<ActionInvocationWithGoal>,
    parallelize_only_first_step: bool,
    problem: &mut Problem,
    domain: &Domain,
    mut goals: Vec<Goal>,
    now: Option<Instant>,
) -> ParallelPlan {
    let callbacks = SetOfCallbacks::default();
    let mut plan: Vec<Vec<ActionDataForParallelisation>> = Vec::new();
    for step in sequential_plan {
        match ActionDataForParallelisation::new(domain, step) {
            Some(data) => plan.push(vec![data]),
            None => return ParallelPlan::default(),
        }
    }

    let mut step_index = 0;
    while step_index < plan.len() {
        for action_data in &plan[step_index] {
            notify_action_started(problem, domain, &callbacks, &action_data.step, now);
        }

        let mut candidate_index = step_index + 1;
        while candidate_index < plan.len() {
            let mergeable = {
                let candidate = &plan[candidate_index][0];
                candidate.can_be_in_parallel_of_list(&plan[step_index])
                    && match &candidate.condition {
                        None => true,
                        Some(condition) => condition
                            .is_true_simple(&problem.world_state, &domain.ontology().types),
                    }
            };
            if mergeable {
                let mut tmp_problem = problem.clone();
                let mut remaining_goals = goals.clone();
                {
                    // The candidate joins the slot: the goals it satisfies
                    // leave the expected-remaining set too.
                    let candidate = &plan[candidate_index][0];
                    notify_action_started(
                        &mut tmp_problem,
                        domain,
                        &callbacks,
                        &candidate.step,
                        now,
                    );
                    let mut out_infos = PlanOutputInfos::default();
                    notify_action_done(
                        &mut tmp_problem,
                        domain,
                        &callbacks,
                        &candidate.step,
                        now,
                        Some(&mut out_infos),
                    );
                    for satisfied in out_infos.take_goals_done() {
                        remaining_goals.retain(|g| g != &satisfied);
                    }
                }
                notify_actions_done_and_remove_corresponding_goals(
                    &mut remaining_goals,
                    &plan[step_index],
                    &mut tmp_problem,
                    domain,
                    &callbacks,
                    now,
                );

                let satisfied_after = check_satisfied_goals(
                    &mut tmp_problem,
                    domain,
                    &plan,
                    step_index,
                    Some((candidate_index, 0)),
                    now,
                );
                if satisfied_after.as_deref() == Some(&remaining_goals[..]) {
                    let mut merged_step = plan.remove(candidate_index);
                    let candidate = merged_step.remove(0);
                    notify_action_started(problem, domain, &callbacks, &candidate.step, now);
                    plan[step_index].push(candidate);
                    continue;
                }
            }
            candidate_index += 1;
        }

        if parallelize_only_first_step {
            break;
        }
        notify_actions_done_and_remove_corresponding_goals(
            &mut goals,
            &plan[step_index],
            problem,
            domain,
            &callbacks,
            now,
        );
        step_index += 1;
    }

    let mut res = ParallelPlan::default();
    for step in plan {
        let actions: Vec<ActionInvocationWithGoal> =
            step.into_iter().map(|data| data.step).collect();
        if !actions.is_empty() {
            res.steps.push(ActionsToDoInParallel { actions });
        }
    }
    res
}

//! Applying planner steps back onto a problem: at-start and at-end effects,
//! goal additions and history updates.

use crate::plan::ActionInvocationWithGoal;
use goalweave_core::{
    Domain, Historical, PlanOutputInfos, Problem, SetOfCallbacks,
};
use std::time::Instant;

/// Apply the at-start effect of an action that just started.
pub fn notify_action_started(
    problem: &mut Problem,
    domain: &Domain,
    callbacks: &SetOfCallbacks,
    step: &ActionInvocationWithGoal,
    now: Option<Instant>,
) {
    let Some(action) = domain.action(&step.invocation.action_id) else {
        return;
    };
    let types = &domain.ontology().types;
    problem.world_state.apply_effect(
        &step.invocation.parameters,
        action.effect.at_start.as_ref(),
        &mut problem.goal_stack,
        domain.set_of_events(),
        callbacks,
        types,
        now,
    );
}

/// Apply the at-end effect, record the action in the history and push the
/// goals the effect carries. Returns false for unknown action ids.
pub fn notify_action_done(
    problem: &mut Problem,
    domain: &Domain,
    callbacks: &SetOfCallbacks,
    step: &ActionInvocationWithGoal,
    now: Option<Instant>,
    mut out_infos: Option<&mut PlanOutputInfos>,
) -> bool {
    let Some(action) = domain.action(&step.invocation.action_id) else {
        return false;
    };
    let types = &domain.ontology().types;
    problem
        .historical
        .notify_action_done(&step.invocation.action_id);
    problem.world_state.apply_effect(
        &step.invocation.parameters,
        action.effect.at_end.as_ref(),
        &mut problem.goal_stack,
        domain.set_of_events(),
        callbacks,
        types,
        now,
    );
    problem.goal_stack.notify_action_done(
        Some(&action.effect.goals_to_add),
        Some(&action.effect.goals_to_add_in_current_priority),
        &problem.world_state,
        types,
        now,
        out_infos.as_deref_mut(),
    );
    drop_one_step_goal(problem, step, out_infos);
    true
}

/// A one-step-towards goal is done after a single action toward it.
fn drop_one_step_goal(
    problem: &mut Problem,
    step: &ActionInvocationWithGoal,
    mut out_infos: Option<&mut PlanOutputInfos>,
) {
    if let Some(goal) = &step.from_goal {
        if goal.is_one_step_towards() && problem.goal_stack.remove_first_goal_equal_to(goal) {
            if let Some(infos) = out_infos.as_deref_mut() {
                infos.notify_satisfied_goal(goal);
            }
        }
    }
}

/// Simulate a planner step on a (usually cloned) problem: at-start effect,
/// at-end effect, goal additions and the potentially-at-end effect.
pub fn update_problem_for_next_potential_planner_result(
    problem: &mut Problem,
    goal_changed: &mut bool,
    step: &ActionInvocationWithGoal,
    domain: &Domain,
    now: Option<Instant>,
    mut global_historical: Option<&mut Historical>,
    mut out_infos: Option<&mut PlanOutputInfos>,
) {
    let Some(action) = domain.action(&step.invocation.action_id) else {
        return;
    };
    let types = &domain.ontology().types;
    let callbacks = SetOfCallbacks::default();

    if let Some(global) = global_historical.as_deref_mut() {
        global.notify_action_done(&step.invocation.action_id);
    }
    problem.world_state.apply_effect(
        &step.invocation.parameters,
        action.effect.at_start.as_ref(),
        &mut problem.goal_stack,
        domain.set_of_events(),
        &callbacks,
        types,
        now,
    );

    problem
        .historical
        .notify_action_done(&step.invocation.action_id);
    problem.world_state.apply_effect(
        &step.invocation.parameters,
        action.effect.at_end.as_ref(),
        &mut problem.goal_stack,
        domain.set_of_events(),
        &callbacks,
        types,
        now,
    );
    *goal_changed |= problem.goal_stack.notify_action_done(
        Some(&action.effect.goals_to_add),
        Some(&action.effect.goals_to_add_in_current_priority),
        &problem.world_state,
        types,
        now,
        out_infos.as_deref_mut(),
    );
    drop_one_step_goal(problem, step, out_infos.as_deref_mut());

    problem.world_state.apply_effect(
        &step.invocation.parameters,
        action.effect.potentially_at_end.as_ref(),
        &mut problem.goal_stack,
        domain.set_of_events(),
        &callbacks,
        types,
        now,
    );
}

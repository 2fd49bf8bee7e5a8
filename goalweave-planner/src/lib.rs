//! GoalWeave planner: per-goal regression search, multi-goal sequential
//! planning, event-aware notification and plan parallelization.

pub mod notify;
pub mod parallel;
pub mod plan;
mod search;

pub use notify::{
    notify_action_done, notify_action_started, update_problem_for_next_potential_planner_result,
};
pub use parallel::to_parallel_plan;
pub use plan::{
    ActionInvocation, ActionInvocationWithGoal, ActionsToDoInParallel, ParallelPlan, PlanCost,
    PlannerConfig,
};

use goalweave_core::{Domain, Goal, Historical, PlanOutputInfos, PlannerStepType, Problem};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// Find a plan advancing the highest-priority still-satisfiable goal.
///
/// Returns an empty plan when no viable action exists; the goal then stays
/// on the stack unless dropped by inactivity.
pub fn plan_for_more_important_goal_possible(
    problem: &mut Problem,
    domain: &Domain,
    try_more_optimal: bool,
    now: Option<Instant>,
    global_historical: Option<&Historical>,
    out_infos: Option<&mut PlanOutputInfos>,
) -> Vec<ActionInvocationWithGoal> {
    let config = PlannerConfig::default();
    search::plan_for_more_important_goal_internal(
        problem,
        domain,
        try_more_optimal,
        now,
        global_historical,
        out_infos,
        None,
        &config,
    )
}

/// Plan until every goal is satisfied or no more goals can be advanced.
///
/// Each chosen action is applied to the problem; satisfied goals are
/// reported through `goals_done`.
pub fn plan_for_every_goals(
    problem: &mut Problem,
    domain: &Domain,
    now: Option<Instant>,
    mut global_historical: Option<&mut Historical>,
    mut goals_done: Option<&mut Vec<Goal>>,
) -> Vec<ActionInvocationWithGoal> {
    let config = PlannerConfig::default();
    let mut action_already_in_plan: BTreeMap<String, usize> = BTreeMap::new();
    let mut res = Vec::new();
    let mut out_infos = PlanOutputInfos::default();

    while !problem.goal_stack.is_empty() {
        let sub_plan = search::plan_for_more_important_goal_internal(
            problem,
            domain,
            true,
            now,
            global_historical.as_deref(),
            Some(&mut out_infos),
            None,
            &config,
        );
        if sub_plan.is_empty() {
            break;
        }
        let mut aborted = false;
        for step in sub_plan {
            let key = step.invocation.to_string();
            match action_already_in_plan.entry(key) {
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(1);
                }
                std::collections::btree_map::Entry::Occupied(mut slot) => {
                    let count = slot.get_mut();
                    if *count > config.max_action_repetitions_in_full_plan {
                        aborted = true;
                        break;
                    }
                    *count += 1;
                }
            }
            let mut goal_changed = false;
            update_problem_for_next_potential_planner_result(
                problem,
                &mut goal_changed,
                &step,
                domain,
                now,
                global_historical.as_deref_mut(),
                Some(&mut out_infos),
            );
            res.push(step);
            if goal_changed {
                break;
            }
        }
        if aborted {
            break;
        }
    }

    out_infos.set_type(if problem.goal_stack.is_empty() {
        PlannerStepType::FinishedOnSuccess
    } else {
        PlannerStepType::FinishedOnFailure
    });
    if let Some(goals_done) = goals_done.as_deref_mut() {
        *goals_done = out_infos.take_goals_done();
    }
    debug!(actions = res.len(), "sequential plan found");
    res
}

/// Plan for every goal, then regroup the sequence into parallel steps.
pub fn parallel_plan_for_every_goals(
    problem: &mut Problem,
    domain: &Domain,
    now: Option<Instant>,
    global_historical: Option<&mut Historical>,
) -> ParallelPlan {
    problem.goal_stack.refresh_if_needed(domain);
    let mut goals_done: Vec<Goal> = Vec::new();
    let mut problem_for_resolution = problem.clone();
    let sequential_plan = plan_for_every_goals(
        &mut problem_for_resolution,
        domain,
        now,
        global_historical,
        Some(&mut goals_done),
    );
    to_parallel_plan(sequential_plan, false, problem, domain, goals_done, now)
}

/// The next actions runnable right now, in parallel.
pub fn actions_to_do_in_parallel_now(
    problem: &mut Problem,
    domain: &Domain,
    now: Option<Instant>,
    global_historical: Option<&mut Historical>,
) -> ActionsToDoInParallel {
    problem.goal_stack.refresh_if_needed(domain);
    let mut goals_done: Vec<Goal> = Vec::new();
    let mut problem_for_resolution = problem.clone();
    let sequential_plan = plan_for_every_goals(
        &mut problem_for_resolution,
        domain,
        now,
        global_historical,
        Some(&mut goals_done),
    );
    let parallel_plan = to_parallel_plan(sequential_plan, true, problem, domain, goals_done, now);
    parallel_plan
        .steps
        .into_iter()
        .next()
        .unwrap_or_default()
}

/// Re-check a parallel plan against a problem: every precondition must
/// hold when its slot starts and every plan goal must end satisfied.
pub fn evaluate_plan(plan: &ParallelPlan, problem: &mut Problem, domain: &Domain) -> bool {
    let callbacks = goalweave_core::SetOfCallbacks::default();
    let types = &domain.ontology().types;
    for step in &plan.steps {
        for action in &step.actions {
            let Some(domain_action) = domain.action(&action.invocation.action_id) else {
                return false;
            };
            if let Some(condition) = &domain_action.precondition {
                let instantiated = condition.clone_with(Some(&action.invocation.parameters), false);
                if !instantiated.is_true_simple(&problem.world_state, types) {
                    return false;
                }
            }
        }
        for action in &step.actions {
            notify_action_started(problem, domain, &callbacks, action, None);
        }
        for action in &step.actions {
            notify_action_done(problem, domain, &callbacks, action, None, None);
        }
    }
    plan.extract_satisfied_goals()
        .iter()
        .all(|goal| goal.is_satisfied(&problem.world_state, types))
}

// ===== Printers =====

/// Sequential plan as `action1, action2, …`.
pub fn plan_to_str(plan: &[ActionInvocationWithGoal], separator: &str) -> String {
    plan.iter()
        .map(|step| step.invocation.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Parallel plan: one line per time slot, actions comma-separated.
pub fn parallel_plan_to_str(plan: &ParallelPlan) -> String {
    plan.steps
        .iter()
        .map(|step| {
            step.actions
                .iter()
                .map(|a| a.invocation.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sequential plan in PDDL plan-trace form:
/// `NN: (action args) [duration]`.
pub fn plan_to_pddl(plan: &[ActionInvocationWithGoal], domain: &Domain) -> String {
    let mut res = String::new();
    for (step, action) in plan.iter().enumerate() {
        let duration = domain
            .action(&action.invocation.action_id)
            .map(|a| a.duration)
            .unwrap_or(1);
        res.push_str(&format!(
            "{:02}: {} [{}]\n",
            step,
            action.invocation.to_pddl(domain),
            duration
        ));
    }
    res
}

/// Parallel plan in PDDL plan-trace form, one slot per line.
pub fn parallel_plan_to_pddl(plan: &ParallelPlan, domain: &Domain) -> String {
    let mut res = String::new();
    for (slot, step) in plan.steps.iter().enumerate() {
        let actions = step
            .actions
            .iter()
            .map(|a| a.invocation.to_pddl(domain))
            .collect::<Vec<_>>()
            .join(" ");
        let duration: i32 = step
            .actions
            .iter()
            .filter_map(|a| domain.action(&a.invocation.action_id))
            .map(|a| a.duration)
            .max()
            .unwrap_or(1);
        res.push_str(&format!("{:02}: {} [{}]\n", slot, actions, duration));
    }
    res
}

/// Goals as a separated list.
pub fn goals_to_str(goals: &[Goal], separator: &str) -> String {
    goals
        .iter()
        .map(|goal| goal.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

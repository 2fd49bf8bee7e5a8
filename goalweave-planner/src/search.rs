//! Per-goal best-action search: regression through the successor graph,
//! parameter refinement and candidate ranking.

use crate::notify::update_problem_for_next_potential_planner_result;
use crate::plan::{ActionInvocation, ActionInvocationWithGoal, PlanCost, PlannerConfig};
use goalweave_core::{
    apply_new_params, full_event_id, Action, ActionId, Bindings, Condition, Domain, Entity,
    Fact, FactOptional, Goal, Historical, Parameter, PlanOutputInfos, Problem, Successions,
    TypeId, WorldStateModification,
};
use goalweave_core::effect::EffectLeaf;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::trace;

/// Tree of action/event ids already expanded on the current regression
/// path, to avoid looping.
#[derive(Debug, Default)]
pub(crate) struct TreeOfAlreadyDonePath {
    actions: BTreeMap<String, TreeOfAlreadyDonePath>,
    events: BTreeMap<String, TreeOfAlreadyDonePath>,
}

impl TreeOfAlreadyDonePath {
    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }

    /// The subtree to explore for this action, or None when the exact path
    /// was already fully expanded.
    pub(crate) fn next_action_tree(&mut self, action_id: &str) -> Option<&mut Self> {
        let entry = self.actions.entry(action_id.to_string());
        match entry {
            std::collections::btree_map::Entry::Vacant(slot) => {
                Some(slot.insert(Self::default()))
            }
            std::collections::btree_map::Entry::Occupied(slot) => {
                let tree = slot.into_mut();
                if tree.is_empty() {
                    None
                } else {
                    Some(tree)
                }
            }
        }
    }

    pub(crate) fn next_event_tree(&mut self, event_id: &str) -> Option<&mut Self> {
        let entry = self.events.entry(event_id.to_string());
        match entry {
            std::collections::btree_map::Entry::Vacant(slot) => {
                Some(slot.insert(Self::default()))
            }
            std::collections::btree_map::Entry::Occupied(slot) => {
                let tree = slot.into_mut();
                if tree.is_empty() {
                    None
                } else {
                    Some(tree)
                }
            }
        }
    }
}

/// Facts already expanded on the current regression branch, per polarity.
#[derive(Debug, Clone, Default)]
struct FactsAlreadyChecked {
    to_add: BTreeSet<Fact>,
    to_remove: BTreeSet<Fact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PossibleEffect {
    Satisfied,
    SatisfiedButDoesNotModifyTheWorld,
    NotSatisfied,
}

fn merge_effects(a: PossibleEffect, b: PossibleEffect) -> PossibleEffect {
    use PossibleEffect::*;
    if a == Satisfied || b == Satisfied {
        return Satisfied;
    }
    if a == SatisfiedButDoesNotModifyTheWorld || b == SatisfiedButDoesNotModifyTheWorld {
        return SatisfiedButDoesNotModifyTheWorld;
    }
    NotSatisfied
}

/// Search-wide immutable context.
pub(crate) struct ResearchContext<'a> {
    pub goal: &'a Goal,
    pub problem: &'a Problem,
    pub domain: &'a Domain,
}

impl ResearchContext<'_> {
    fn types(&self) -> &goalweave_core::SetOfTypes {
        &self.domain.ontology().types
    }
}

#[derive(Debug, Default)]
struct OptimisationData {
    try_more_optimal: bool,
    parameter_to_entities_from_event: Bindings,
}

/// Candidate parameter possibilities with the satisfied-objective flag.
#[derive(Debug, Clone, Default)]
pub(crate) struct CandidateParams {
    pub parameters: Bindings,
    pub satisfy_objective: bool,
}

impl CandidateParams {
    fn for_parameters(parameters: &[Parameter]) -> Self {
        let mut res = Self::default();
        for parameter in parameters {
            res.parameters.entry(parameter.clone()).or_default();
        }
        res
    }

    /// Backtrack by pruning one value from the first multi-valued
    /// parameter.
    fn remove_a_possibility(&mut self) -> bool {
        for values in self.parameters.values_mut() {
            if values.len() > 1 {
                let first = values.iter().next().cloned();
                if let Some(first) = first {
                    values.remove(&first);
                    return true;
                }
            }
        }
        false
    }

    fn next_step_is_an_event(&self, parameter_to_entities_from_event: &Bindings) -> bool {
        for (parameter, values) in &self.parameters {
            if let Some(event_values) = parameter_to_entities_from_event.get(parameter) {
                if values.iter().any(|v| event_values.contains(v)) {
                    return true;
                }
            }
        }
        false
    }
}

#[derive(Debug, Clone)]
struct PotentialNextAction {
    action_id: ActionId,
    params: CandidateParams,
}

/// The action (and its motivating goal) chosen one step earlier in the
/// plan, used to skip successions without interest.
#[derive(Debug, Clone)]
pub(crate) struct PreviousActionInfo {
    pub action_id: ActionId,
    pub goal: Goal,
}

fn param_type_entities(ty: TypeId, ctx: &ResearchContext<'_>) -> BTreeSet<Entity> {
    ctx.domain
        .ontology()
        .entities_of_type(ty, &ctx.problem.objects)
        .into_iter()
        .collect()
}

// ===== Candidate ranking =====

fn prefer_in_context_statistics(action: &Action, ctx: &ResearchContext<'_>) -> (usize, usize) {
    let mut satisfied = 0usize;
    let mut not_satisfied = 0usize;
    if let Some(prefer) = &action.prefer_in_context {
        let facts = ctx.problem.world_state.facts();
        let _ = prefer.for_each_fact(
            &mut |fact_opt, _| {
                let present = facts.contains_key(&fact_opt.fact);
                if present != fact_opt.is_negated {
                    satisfied += 1;
                } else {
                    not_satisfied += 1;
                }
                std::ops::ControlFlow::Continue(())
            },
            false,
            false,
            false,
        );
    }
    (satisfied, not_satisfied)
}

fn is_more_important_than(
    candidate: &PotentialNextAction,
    other: &PotentialNextAction,
    ctx: &ResearchContext<'_>,
    global_historical: Option<&Historical>,
) -> bool {
    let Some(action) = ctx.domain.action(&candidate.action_id) else {
        return false;
    };
    let Some(other_action) = ctx.domain.action(&other.action_id) else {
        return true;
    };

    let done = ctx.problem.historical.count(&candidate.action_id);
    let other_done = ctx.problem.historical.count(&other.action_id);

    if action.high_importance_of_not_repeating {
        if other_action.high_importance_of_not_repeating {
            if done != other_done {
                return done < other_done;
            }
        } else if done > 0 {
            return false;
        }
    } else if other_action.high_importance_of_not_repeating && other_done > 0 {
        return true;
    }

    let (satisfied, not_satisfied) = prefer_in_context_statistics(action, ctx);
    let (other_satisfied, other_not_satisfied) = prefer_in_context_statistics(other_action, ctx);
    if satisfied != other_satisfied {
        return satisfied > other_satisfied;
    }
    if not_satisfied != other_not_satisfied {
        return not_satisfied < other_not_satisfied;
    }

    if done != other_done {
        return done < other_done;
    }
    if let Some(global) = global_historical {
        let global_done = global.count(&candidate.action_id);
        let other_global_done = global.count(&other.action_id);
        if global_done != other_global_done {
            return global_done < other_global_done;
        }
    }
    candidate.action_id < other.action_id
}

// ===== Objective matching =====

/// Does the effect fact match a not-yet-satisfied leaf of the goal
/// objective.
fn does_condition_match_an_optional_fact(
    parameters: &Bindings,
    fact_opt: &FactOptional,
    params_in_place: Option<&Bindings>,
    ctx: &ResearchContext<'_>,
) -> bool {
    let types = ctx.types();
    let world = &ctx.problem.world_state;
    ctx.goal.objective().find_condition_candidate_from_fact_from_effect(
        &mut |condition_fact| {
            if world.is_optional_fact_satisfied(condition_fact, types) {
                return false;
            }
            if condition_fact.is_negated != fact_opt.is_negated {
                return condition_fact.fact.equal_except_any_values_and_fluent(
                    &fact_opt.fact,
                    None,
                    None,
                    None,
                ) && condition_fact.fact.fluent() != fact_opt.fact.fluent();
            }
            condition_fact.fact.equal_except_any_values(
                &fact_opt.fact,
                Some(parameters),
                params_in_place,
                None,
            )
        },
        world,
        types,
        &fact_opt.fact,
        parameters,
        params_in_place,
        &Bindings::new(),
        false,
    )
}

/// Refine the candidate parameters so the effect fact serves the
/// objective, rejecting instantiations the world already satisfies.
fn check_objective_callback(
    parameters: &mut Bindings,
    fact_opt: &FactOptional,
    mut params_in_place: Option<&mut Bindings>,
    ctx: &ResearchContext<'_>,
) -> bool {
    let types = ctx.types();
    let world = &ctx.problem.world_state;

    let fill_parameter = |parameter: &Parameter,
                          values: &BTreeSet<Entity>,
                          parameters_view: &Bindings,
                          in_place_view: Option<&Bindings>,
                          new_parameters: &mut Bindings|
     -> bool {
        if !values.is_empty() || !fact_opt.fact.has_parameter_or_fluent(parameter) {
            return true;
        }
        let mut new_values: BTreeSet<Entity> = BTreeSet::new();
        let mut found = false;
        ctx.goal.objective().find_condition_candidate_from_fact_from_effect(
            &mut |condition_fact| {
                let Some(value) = fact_opt
                    .fact
                    .extract_argument_from_example(parameter, &condition_fact.fact)
                else {
                    return false;
                };
                found = true;
                new_values.insert(value);
                !new_values.is_empty()
            },
            world,
            types,
            &fact_opt.fact,
            parameters_view,
            in_place_view,
            &Bindings::new(),
            false,
        );
        if found && new_values.is_empty() {
            if let Some(ty) = parameter.ty {
                new_values = param_type_entities(ty, ctx);
            }
            if new_values.is_empty() {
                return false;
            }
        }
        if !new_values.is_empty() {
            new_parameters.insert(parameter.clone(), new_values);
        }
        true
    };

    let mut cp_parameters = parameters.clone();
    let mut cp_in_place = params_in_place.as_deref().cloned().unwrap_or_default();

    let mut new_parameters = Bindings::new();
    let snapshot = cp_parameters.clone();
    for (parameter, values) in &snapshot {
        if !fill_parameter(
            parameter,
            values,
            &snapshot,
            Some(&cp_in_place),
            &mut new_parameters,
        ) {
            return false;
        }
    }
    apply_new_params(&mut cp_parameters, &mut new_parameters);

    if ctx
        .problem
        .world_state
        .is_optional_fact_satisfied_in_a_specific_context(
            fact_opt,
            types,
            &BTreeSet::new(),
            &BTreeSet::new(),
            false,
            Some(&mut cp_parameters),
            params_in_place.as_deref_mut(),
            None,
        )
    {
        return false;
    }

    if let Some(in_place) = params_in_place {
        let mut new_in_place = Bindings::new();
        let in_place_snapshot = cp_in_place.clone();
        for (parameter, values) in &in_place_snapshot {
            if !fill_parameter(
                parameter,
                values,
                &snapshot,
                Some(&in_place_snapshot),
                &mut new_in_place,
            ) {
                return false;
            }
        }
        apply_new_params(&mut cp_in_place, &mut new_in_place);
        *in_place = cp_in_place;
    }

    *parameters = cp_parameters;
    true
}

fn leaf_local_bindings(leaf: &EffectLeaf<'_>) -> Option<Bindings> {
    leaf.local_fluent_param.as_ref().map(|parameter| {
        let mut bindings = Bindings::new();
        bindings.entry(parameter.clone()).or_default();
        bindings
    })
}

fn leaf_check_validity(
    leaf: &EffectLeaf<'_>,
    local_params: &Bindings,
    parameters: &mut Bindings,
    ctx: &ResearchContext<'_>,
) -> bool {
    match (leaf.assign_rhs, &leaf.local_fluent_param) {
        (Some(rhs), Some(_)) => WorldStateModification::assign_rhs_validates(
            rhs,
            local_params,
            ctx.problem.world_state.facts_index(),
            parameters,
            ctx.types(),
        ),
        _ => true,
    }
}

/// Does the (possibly refined) effect satisfy the goal objective directly.
fn does_satisfy_the_goal(
    parameters: &mut Bindings,
    wsm1: Option<&WorldStateModification>,
    wsm2: Option<&WorldStateModification>,
    ctx: &ResearchContext<'_>,
    deduction_id: &str,
) -> bool {
    let index = ctx.problem.world_state.facts_index();
    let mut check = |leaf: EffectLeaf<'_>| -> bool {
        let mut local_params = leaf_local_bindings(&leaf);
        if !does_condition_match_an_optional_fact(
            parameters,
            &leaf.fact,
            local_params.as_ref(),
            ctx,
        ) {
            return false;
        }
        if parameters.is_empty() && local_params.is_none() {
            return true;
        }
        if !check_objective_callback(parameters, &leaf.fact, local_params.as_mut(), ctx) {
            return false;
        }
        if let Some(local) = &local_params {
            if !leaf_check_validity(&leaf, local, parameters, ctx) {
                return false;
            }
        }
        true
    };
    if let Some(wsm) = wsm1 {
        if wsm.walk_effect_leaves(0, index, deduction_id, &mut check) {
            return true;
        }
    }
    if let Some(wsm) = wsm2 {
        if wsm.walk_effect_leaves(0, index, deduction_id, &mut check) {
            return true;
        }
    }
    false
}

// ===== Parameter propagation =====

/// Fold the parameters found by one satisfied branch into the running
/// candidate. Returns true when the search can stop refining.
#[allow(clippy::too_many_arguments)]
fn update_possible_parameters(
    new_parent_params: &mut Bindings,
    new_tmp_params: &mut Bindings,
    parent_params: &mut Bindings,
    cp_parent_params: Bindings,
    tmp_params: Option<&mut Bindings>,
    optimisation: &mut OptimisationData,
    cp_tmp_params: Bindings,
    from_event: bool,
) -> bool {
    if cp_parent_params.is_empty() && cp_tmp_params.is_empty() {
        return true;
    }
    if !optimisation.try_more_optimal {
        *parent_params = cp_parent_params;
        if let Some(tmp) = tmp_params {
            *tmp = cp_tmp_params;
        }
        return true;
    }

    if from_event {
        for (parameter, values) in cp_parent_params {
            let current = new_parent_params.entry(parameter.clone()).or_default();
            for value in values {
                if current.insert(value.clone()) {
                    optimisation
                        .parameter_to_entities_from_event
                        .entry(parameter.clone())
                        .or_default()
                        .insert(value);
                }
            }
        }
    } else {
        for (parameter, values) in cp_parent_params {
            new_parent_params.entry(parameter).or_default().extend(values);
        }
    }
    if tmp_params.is_some() {
        for (parameter, values) in cp_tmp_params {
            new_tmp_params.entry(parameter).or_default().extend(values);
        }
    }
    false
}

// ===== Regression =====

/// Try one predecessor deduction (action or event): does its effect reach
/// the wanted fact, and can the wanted fact's parameters be filled from its
/// condition.
#[allow(clippy::too_many_arguments)]
fn look_for_a_possible_deduction(
    tree: &mut TreeOfAlreadyDonePath,
    parameters: &[Parameter],
    condition: Option<&Condition>,
    wsm1: Option<(&WorldStateModification, &[Successions])>,
    wsm2: Option<(&WorldStateModification, &[Successions])>,
    fact_opt: &FactOptional,
    parent_params: &mut Bindings,
    mut tmp_parent_params: Option<&mut Bindings>,
    ctx: &ResearchContext<'_>,
    checked: &mut FactsAlreadyChecked,
    deduction_id: &str,
) -> PossibleEffect {
    let types = ctx.types();
    let world = &ctx.problem.world_state;

    if let Some(condition) = condition {
        let contains = condition.contains_fact_opt(
            fact_opt,
            parent_params,
            tmp_parent_params.as_deref(),
            parameters,
            false,
        );
        if !contains || !condition.can_become_true(world, types, parameters, false) {
            return PossibleEffect::NotSatisfied;
        }
    }

    let mut candidate = CandidateParams::for_parameters(parameters);
    let mut optimisation = OptimisationData::default();
    if !look_for_a_possible_effect(
        &mut candidate,
        &mut optimisation,
        tree,
        wsm1,
        wsm2,
        ctx,
        checked,
        deduction_id,
    ) {
        return PossibleEffect::NotSatisfied;
    }

    let parent_view = parent_params.clone();
    let tmp_view = tmp_parent_params.as_deref().cloned();
    let fill_parameter = |parameter: &Parameter,
                          values: &BTreeSet<Entity>,
                          new_params: &mut Bindings|
     -> bool {
        if !values.is_empty() || !fact_opt.fact.has_parameter_or_fluent(parameter) {
            return true;
        }
        let mut new_values: BTreeSet<Entity> = BTreeSet::new();
        let mut found = false;
        if let Some(condition) = condition {
            condition.find_condition_candidate_from_fact_from_effect(
                &mut |condition_fact| {
                    let Some(value) = fact_opt
                        .fact
                        .extract_argument_from_example(parameter, &condition_fact.fact)
                    else {
                        return false;
                    };
                    found = true;
                    // The extracted value may itself be a parameter of the
                    // deduction: substitute its possibilities.
                    if let Some((_, deduction_values)) = candidate
                        .parameters
                        .iter()
                        .find(|(p, _)| p.name == value.value)
                    {
                        new_values = deduction_values.clone();
                    } else {
                        new_values.insert(value);
                    }
                    !new_values.is_empty()
                },
                world,
                types,
                &fact_opt.fact,
                &parent_view,
                tmp_view.as_ref(),
                &candidate.parameters,
                false,
            );
        }
        if found && new_values.is_empty() {
            if let Some(ty) = parameter.ty {
                new_values = param_type_entities(ty, ctx);
            }
            if new_values.is_empty() {
                return false;
            }
        }
        if !new_values.is_empty() {
            new_params.insert(parameter.clone(), new_values);
        }
        true
    };

    let mut new_parent_params = Bindings::new();
    for (parameter, values) in &parent_view {
        if !fill_parameter(parameter, values, &mut new_parent_params) {
            return PossibleEffect::NotSatisfied;
        }
    }
    if let Some(tmp) = tmp_parent_params.as_deref_mut() {
        let mut new_tmp_params = Bindings::new();
        for (parameter, values) in &tmp_view.clone().unwrap_or_default() {
            if !fill_parameter(parameter, values, &mut new_tmp_params) {
                return PossibleEffect::NotSatisfied;
            }
        }
        apply_new_params(tmp, &mut new_tmp_params);
    }
    apply_new_params(parent_params, &mut new_parent_params);

    // The instantiated fact must still change the world.
    if !world.is_optional_fact_satisfied_in_a_specific_context(
        fact_opt,
        types,
        &BTreeSet::new(),
        &BTreeSet::new(),
        false,
        Some(parent_params),
        tmp_parent_params.as_deref_mut(),
        None,
    ) {
        PossibleEffect::Satisfied
    } else {
        PossibleEffect::SatisfiedButDoesNotModifyTheWorld
    }
}

/// Try every successor action/event able to consume the wanted fact.
#[allow(clippy::too_many_arguments)]
fn look_for_fact_from_actions_and_events(
    possible_effect: &mut PossibleEffect,
    new_parent_params: &mut Bindings,
    new_tmp_params: &mut Bindings,
    successions: &Successions,
    fact_opt: &FactOptional,
    parent_params: &mut Bindings,
    mut tmp_parent_params: Option<&mut Bindings>,
    optimisation: &mut OptimisationData,
    tree: &mut TreeOfAlreadyDonePath,
    ctx: &ResearchContext<'_>,
    checked: &mut FactsAlreadyChecked,
) {
    for action_id in &successions.actions {
        if !ctx.goal.action_predecessors().contains(action_id) {
            continue;
        }
        let Some(action) = ctx.domain.action(action_id) else {
            continue;
        };
        let mut cp_parent = parent_params.clone();
        let mut cp_tmp = tmp_parent_params.as_deref().cloned().unwrap_or_default();
        let Some(sub_tree) = tree.next_action_tree(action_id) else {
            continue;
        };
        let new_res = look_for_a_possible_deduction(
            sub_tree,
            &action.parameters,
            action.precondition.as_ref(),
            action
                .effect
                .at_end
                .as_ref()
                .map(|w| (w, action.successions_at_end())),
            action
                .effect
                .potentially_at_end
                .as_ref()
                .map(|w| (w, action.successions_potential())),
            fact_opt,
            &mut cp_parent,
            Some(&mut cp_tmp),
            ctx,
            checked,
            action_id,
        );
        *possible_effect = merge_effects(new_res, *possible_effect);
        if new_res == PossibleEffect::Satisfied
            && update_possible_parameters(
                new_parent_params,
                new_tmp_params,
                parent_params,
                cp_parent,
                tmp_parent_params.as_deref_mut(),
                optimisation,
                cp_tmp,
                false,
            )
        {
            return;
        }
    }

    for (set_id, event_ids) in &successions.events {
        let Some(set) = ctx.domain.set_of_events().get(set_id) else {
            continue;
        };
        for event_id in event_ids {
            let Some(event) = set.events().get(event_id) else {
                continue;
            };
            let Some(effect) = event.effect.as_ref() else {
                continue;
            };
            let full_id = full_event_id(set_id, event_id);
            if !ctx.goal.event_predecessors().contains(&full_id) {
                continue;
            }
            let mut cp_parent = parent_params.clone();
            let mut cp_tmp = tmp_parent_params.as_deref().cloned().unwrap_or_default();
            let Some(sub_tree) = tree.next_event_tree(event_id) else {
                continue;
            };
            let new_res = look_for_a_possible_deduction(
                sub_tree,
                &event.parameters,
                Some(&event.precondition),
                Some((effect, event.successions())),
                None,
                fact_opt,
                &mut cp_parent,
                Some(&mut cp_tmp),
                ctx,
                checked,
                &full_id,
            );
            *possible_effect = merge_effects(new_res, *possible_effect);
            if new_res == PossibleEffect::Satisfied
                && update_possible_parameters(
                    new_parent_params,
                    new_tmp_params,
                    parent_params,
                    cp_parent,
                    tmp_parent_params.as_deref_mut(),
                    optimisation,
                    cp_tmp,
                    true,
                )
            {
                return;
            }
        }
    }
}

/// Does the candidate's effect, instantiated under the current bindings,
/// make progress toward the goal — directly or via regression through the
/// successor graph.
#[allow(clippy::too_many_arguments)]
fn look_for_a_possible_effect(
    candidate: &mut CandidateParams,
    optimisation: &mut OptimisationData,
    tree: &mut TreeOfAlreadyDonePath,
    wsm1: Option<(&WorldStateModification, &[Successions])>,
    wsm2: Option<(&WorldStateModification, &[Successions])>,
    ctx: &ResearchContext<'_>,
    checked: &mut FactsAlreadyChecked,
    deduction_id: &str,
) -> bool {
    let mut can_satisfy_this_goal = ctx.goal.can_deduction_satisfy(deduction_id);
    if can_satisfy_this_goal && ctx.goal.is_a_simple_fact_objective() {
        if does_satisfy_the_goal(
            &mut candidate.parameters,
            wsm1.map(|(w, _)| w),
            wsm2.map(|(w, _)| w),
            ctx,
            deduction_id,
        ) {
            candidate.satisfy_objective = true;
            return true;
        }
        can_satisfy_this_goal = false;
    }

    let index = ctx.problem.world_state.facts_index();
    let empty_successions = Successions::default();

    let mut handle_leaf = |successions_slice: &[Successions], leaf: EffectLeaf<'_>| -> bool {
        let successions = successions_slice
            .get(leaf.slot)
            .unwrap_or(&empty_successions);
        if !can_satisfy_this_goal && successions.is_empty() {
            return false;
        }

        let mut possible_effect = PossibleEffect::NotSatisfied;
        let mut new_parent_params = Bindings::new();
        let mut new_tmp_params = Bindings::new();
        let mut check_actions_and_events = true;
        let mut local_params = leaf_local_bindings(&leaf);

        if can_satisfy_this_goal
            && does_condition_match_an_optional_fact(
                &candidate.parameters,
                &leaf.fact,
                local_params.as_ref(),
                ctx,
            )
        {
            if candidate.parameters.is_empty() && local_params.is_none() {
                return true;
            }
            let mut cp_parent = candidate.parameters.clone();
            let mut cp_tmp = local_params.clone().unwrap_or_default();
            if check_objective_callback(&mut cp_parent, &leaf.fact, Some(&mut cp_tmp), ctx) {
                possible_effect = PossibleEffect::Satisfied;
                if update_possible_parameters(
                    &mut new_parent_params,
                    &mut new_tmp_params,
                    &mut candidate.parameters,
                    cp_parent,
                    local_params.as_mut(),
                    optimisation,
                    cp_tmp,
                    false,
                ) {
                    check_actions_and_events = false;
                }
            }
        }

        let already_checked = if leaf.fact.is_negated {
            checked.to_remove.contains(&leaf.fact.fact)
        } else {
            checked.to_add.contains(&leaf.fact.fact)
        };
        if check_actions_and_events && !successions.is_empty() && !already_checked {
            let mut sub_checked = checked.clone();
            if leaf.fact.is_negated {
                sub_checked.to_remove.insert(leaf.fact.fact.clone());
            } else {
                sub_checked.to_add.insert(leaf.fact.fact.clone());
            }
            look_for_fact_from_actions_and_events(
                &mut possible_effect,
                &mut new_parent_params,
                &mut new_tmp_params,
                successions,
                &leaf.fact,
                &mut candidate.parameters,
                local_params.as_mut(),
                optimisation,
                tree,
                ctx,
                &mut sub_checked,
            );
            if possible_effect != PossibleEffect::SatisfiedButDoesNotModifyTheWorld {
                std::mem::swap(checked, &mut sub_checked);
            }
        }

        if !new_parent_params.is_empty() {
            candidate.parameters = new_parent_params;
            if let Some(local) = local_params.as_mut() {
                *local = new_tmp_params;
            }
        }

        if possible_effect == PossibleEffect::Satisfied {
            if let Some(local) = &local_params {
                if !leaf_check_validity(&leaf, local, &mut candidate.parameters, ctx) {
                    possible_effect = PossibleEffect::NotSatisfied;
                }
            }
        }
        possible_effect == PossibleEffect::Satisfied
    };

    if let Some((wsm, successions)) = wsm1 {
        if wsm.walk_effect_leaves(0, index, deduction_id, &mut |leaf| {
            handle_leaf(successions, leaf)
        }) {
            return true;
        }
    }
    if let Some((wsm, successions)) = wsm2 {
        if wsm.walk_effect_leaves(0, index, deduction_id, &mut |leaf| {
            handle_leaf(successions, leaf)
        }) {
            return true;
        }
    }
    false
}

// ===== Optimal lookahead =====

struct ComparisonCache {
    current_cost: PlanCost,
}

#[allow(clippy::too_many_arguments)]
fn simulate_candidate_cost(
    candidate: &PotentialNextAction,
    next_step_is_an_event: bool,
    ctx: &ResearchContext<'_>,
    now: Option<Instant>,
    config: &PlannerConfig,
) -> PlanCost {
    let invocation =
        ActionInvocation::from_bindings(candidate.action_id.clone(), &candidate.params.parameters);
    let step = ActionInvocationWithGoal::new(invocation, None, 0);
    let mut local_problem = ctx.problem.clone();
    let mut goal_changed = false;
    let mut out_infos = PlanOutputInfos::default();
    update_problem_for_next_potential_planner_result(
        &mut local_problem,
        &mut goal_changed,
        &step,
        ctx.domain,
        now,
        None,
        Some(&mut out_infos),
    );
    let previous_action = (!next_step_is_an_event).then(|| PreviousActionInfo {
        action_id: candidate.action_id.clone(),
        goal: ctx.goal.clone(),
    });
    extract_plan_cost(
        &mut local_problem,
        ctx.domain,
        now,
        &mut out_infos,
        previous_action.as_ref(),
        config,
    )
}

/// Cost of running the whole goal stack from the given problem state.
pub(crate) fn extract_plan_cost(
    problem: &mut Problem,
    domain: &Domain,
    now: Option<Instant>,
    out_infos: &mut PlanOutputInfos,
    previous_action: Option<&PreviousActionInfo>,
    config: &PlannerConfig,
) -> PlanCost {
    let mut cost = PlanCost::default();
    let mut actions_in_plan: BTreeSet<String> = BTreeSet::new();
    let mut should_break = false;
    while !problem.goal_stack.is_empty() {
        if should_break {
            cost.success = false;
            break;
        }
        let sub_plan = plan_for_more_important_goal_internal(
            problem,
            domain,
            false,
            now,
            None,
            Some(&mut *out_infos),
            previous_action,
            config,
        );
        if sub_plan.is_empty() {
            break;
        }
        for step in sub_plan {
            cost.actions_done += 1;
            if !actions_in_plan.insert(step.invocation.to_string()) {
                should_break = true;
            }
            let mut goal_changed = false;
            update_problem_for_next_potential_planner_result(
                problem,
                &mut goal_changed,
                &step,
                domain,
                now,
                None,
                Some(&mut *out_infos),
            );
            if goal_changed {
                break;
            }
        }
    }
    cost.success = out_infos.is_first_goal_in_success();
    cost.goals_not_satisfied = out_infos.nb_of_not_satisfied_goals();
    cost.goals_satisfied = out_infos.nb_of_satisfied_goals();
    cost
}

#[allow(clippy::too_many_arguments)]
fn is_more_optimal_next_action(
    comparison_cache: &mut Option<ComparisonCache>,
    next_in_plan_can_be_an_event: &mut bool,
    new_candidate: &PotentialNextAction,
    current: Option<&PotentialNextAction>,
    ctx: &ResearchContext<'_>,
    optimisation: &OptimisationData,
    length: usize,
    now: Option<Instant>,
    global_historical: Option<&Historical>,
    config: &PlannerConfig,
) -> bool {
    let Some(current) = current else {
        *next_in_plan_can_be_an_event = new_candidate
            .params
            .next_step_is_an_event(&optimisation.parameter_to_entities_from_event);
        return true;
    };

    if optimisation.try_more_optimal
        && length == 0
        && (new_candidate.action_id != current.action_id
            || new_candidate.params.parameters != current.params.parameters)
    {
        let new_is_event = new_candidate
            .params
            .next_step_is_an_event(&optimisation.parameter_to_entities_from_event);
        let new_cost = simulate_candidate_cost(new_candidate, new_is_event, ctx, now, config);

        if comparison_cache.is_none() {
            let current_is_event = current
                .params
                .next_step_is_an_event(&optimisation.parameter_to_entities_from_event);
            let current_cost =
                simulate_candidate_cost(current, current_is_event, ctx, now, config);
            *comparison_cache = Some(ComparisonCache { current_cost });
        }
        let cache = comparison_cache.as_mut().expect("cache just filled");
        if new_cost.is_better_than(&cache.current_cost) {
            cache.current_cost = new_cost;
            *next_in_plan_can_be_an_event = new_is_event;
            return true;
        }
        if cache.current_cost.is_better_than(&new_cost) {
            return false;
        }
    }

    let res = is_more_important_than(new_candidate, current, ctx, global_historical);
    if res {
        *next_in_plan_can_be_an_event = new_candidate
            .params
            .next_step_is_an_event(&optimisation.parameter_to_entities_from_event);
    }
    res
}

// ===== Per-goal search drivers =====

#[allow(clippy::too_many_arguments)]
fn find_first_action_for_a_goal(
    next_in_plan_can_be_an_event: &mut bool,
    tree: &mut TreeOfAlreadyDonePath,
    ctx: &ResearchContext<'_>,
    try_more_optimal: bool,
    length: usize,
    now: Option<Instant>,
    global_historical: Option<&Historical>,
    previous_action: Option<&PreviousActionInfo>,
    config: &PlannerConfig,
) -> Option<(ActionId, Bindings)> {
    let mut result: Option<PotentialNextAction> = None;
    let mut comparison_cache: Option<ComparisonCache> = None;

    let action_ids_to_skip: BTreeSet<ActionId> = match previous_action {
        Some(previous) if previous.goal.objective() == ctx.goal.objective() => ctx
            .domain
            .action(&previous.action_id)
            .map(|a| a.successions_without_interest().clone())
            .unwrap_or_default(),
        _ => BTreeSet::new(),
    };

    for action_id in ctx.goal.action_predecessors() {
        if action_ids_to_skip.contains(action_id) {
            continue;
        }
        let Some(action) = ctx.domain.action(action_id) else {
            continue;
        };
        if !action.is_usable() {
            continue;
        }
        let Some(sub_tree) = tree.next_action_tree(action_id) else {
            continue;
        };
        let mut checked = FactsAlreadyChecked::default();
        let mut candidate = PotentialNextAction {
            action_id: action_id.clone(),
            params: CandidateParams::for_parameters(&action.parameters),
        };
        let mut optimisation = OptimisationData {
            try_more_optimal,
            ..Default::default()
        };
        let found = look_for_a_possible_effect(
            &mut candidate.params,
            &mut optimisation,
            sub_tree,
            action
                .effect
                .at_end
                .as_ref()
                .map(|w| (w, action.successions_at_end())),
            action
                .effect
                .potentially_at_end
                .as_ref()
                .map(|w| (w, action.successions_potential())),
            ctx,
            &mut checked,
            action_id,
        );
        if !found {
            continue;
        }
        let precondition_holds = match &action.precondition {
            None => true,
            Some(condition) => condition.is_true(
                &ctx.problem.world_state,
                ctx.types(),
                &BTreeSet::new(),
                &BTreeSet::new(),
                Some(&mut candidate.params.parameters),
                None,
                false,
            ),
        };
        if !precondition_holds {
            continue;
        }
        trace!(action = action_id.as_str(), "viable candidate");
        loop {
            if is_more_optimal_next_action(
                &mut comparison_cache,
                next_in_plan_can_be_an_event,
                &candidate,
                result.as_ref(),
                ctx,
                &optimisation,
                length,
                now,
                global_historical,
                config,
            ) {
                result = Some(candidate.clone());
            }
            if !candidate.params.remove_a_possibility() {
                break;
            }
        }
    }

    result.map(|r| (r.action_id, r.params.parameters))
}

/// Extend the plan for one goal, recursing until the goal is satisfied in
/// the simulated world.
#[allow(clippy::too_many_arguments)]
pub(crate) fn goal_to_plan_rec(
    invocations: &mut Vec<ActionInvocationWithGoal>,
    problem: &mut Problem,
    action_already_in_plan: &mut BTreeMap<String, usize>,
    domain: &Domain,
    try_more_optimal: bool,
    now: Option<Instant>,
    global_historical: Option<&Historical>,
    goal: &Goal,
    priority: i32,
    previous_action: Option<&PreviousActionInfo>,
    config: &PlannerConfig,
) -> bool {
    problem.world_state.refresh_cache_if_needed(domain);
    let mut tree = TreeOfAlreadyDonePath::default();
    let mut next_in_plan_can_be_an_event = false;

    let found = {
        let ctx = ResearchContext {
            goal,
            problem,
            domain,
        };
        find_first_action_for_a_goal(
            &mut next_in_plan_can_be_an_event,
            &mut tree,
            &ctx,
            try_more_optimal,
            0,
            now,
            global_historical,
            previous_action,
            config,
        )
    };
    let Some((action_id, bindings)) = found else {
        return false;
    };

    let invocation = ActionInvocation::from_bindings(action_id.clone(), &bindings);
    let key = invocation.to_string();
    match action_already_in_plan.entry(key) {
        std::collections::btree_map::Entry::Vacant(slot) => {
            slot.insert(1);
        }
        std::collections::btree_map::Entry::Occupied(mut slot) => {
            let count = slot.get_mut();
            if *count > config.max_action_repetitions_per_goal {
                return false;
            }
            *count += 1;
        }
    }

    let step = ActionInvocationWithGoal::new(invocation, Some(goal.clone()), priority);
    let mut problem_for_cost = problem.clone();
    let mut goal_changed = false;
    update_problem_for_next_potential_planner_result(
        &mut problem_for_cost,
        &mut goal_changed,
        &step,
        domain,
        now,
        None,
        None,
    );

    let previous = (!next_in_plan_can_be_an_event).then(|| PreviousActionInfo {
        action_id: action_id.clone(),
        goal: goal.clone(),
    });
    let types = &domain.ontology().types;
    // A one-step-towards goal asks for strict progress, not satisfaction.
    if goal.is_one_step_towards()
        || problem_for_cost.world_state.is_goal_satisfied(goal, types)
        || goal_to_plan_rec(
            invocations,
            &mut problem_for_cost,
            action_already_in_plan,
            domain,
            try_more_optimal,
            now,
            None,
            goal,
            priority,
            previous.as_ref(),
            config,
        )
    {
        invocations.insert(0, step);
        return true;
    }
    false
}

/// One planner pass: find a plan advancing the most important satisfiable
/// goal.
#[allow(clippy::too_many_arguments)]
pub(crate) fn plan_for_more_important_goal_internal(
    problem: &mut Problem,
    domain: &Domain,
    try_more_optimal: bool,
    now: Option<Instant>,
    global_historical: Option<&Historical>,
    mut out_infos: Option<&mut PlanOutputInfos>,
    previous_action: Option<&PreviousActionInfo>,
    config: &PlannerConfig,
) -> Vec<ActionInvocationWithGoal> {
    let types = domain.ontology().types.clone();
    problem.goal_stack.refresh_if_needed(domain);
    // Satisfied goals leave the stack (recorded) before any search runs.
    problem.goal_stack.drop_satisfied_goals(
        &problem.world_state,
        &types,
        out_infos.as_deref_mut(),
    );

    let buckets: Vec<(i32, Vec<Goal>)> = problem
        .goal_stack
        .goals()
        .iter()
        .rev()
        .map(|(p, goals)| (*p, goals.clone()))
        .collect();

    let mut res = Vec::new();
    'outer: for (priority, bucket) in buckets {
        for goal in bucket {
            if goal.is_satisfied(&problem.world_state, &types) {
                continue;
            }
            if goal.is_inactive_for_too_long(now) {
                continue;
            }
            if !goal.is_enabled(&problem.world_state, &types) {
                if let Some(infos) = out_infos.as_deref_mut() {
                    infos.notify_not_satisfied_goal(&goal);
                }
                continue;
            }
            let mut action_already_in_plan = BTreeMap::new();
            if goal_to_plan_rec(
                &mut res,
                problem,
                &mut action_already_in_plan,
                domain,
                try_more_optimal,
                now,
                global_historical,
                &goal,
                priority,
                previous_action,
                config,
            ) {
                break 'outer;
            } else if let Some(infos) = out_infos.as_deref_mut() {
                infos.notify_not_satisfied_goal(&goal);
            }
        }
    }

    // Apply lifecycle bookkeeping on the real stack: satisfied
    // non-persistent goals drop, inactivity clocks restamp.
    problem
        .goal_stack
        .refresh_after_world_change(&problem.world_state, &types, now);
    res
}

//! Boolean/arithmetic condition trees evaluated against a world state and a
//! parameter-binding environment.

use crate::fact::{apply_new_params, Bindings, Fact, FactOptional};
use crate::numeric::{compare_number_str, Number};
use crate::ontology::{Entity, Parameter, SetOfTypes};
use crate::set_of_facts::SetOfFacts;
use crate::world_state::WorldState;
use crate::world_state_cache::Reachability;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::ControlFlow;

/// Binary operators of a condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    And,
    Or,
    Imply,
    Equality,
    Superior,
    SuperiorOrEqual,
    Inferior,
    InferiorOrEqual,
    Plus,
    Minus,
}

impl ConditionOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            ConditionOp::Superior
                | ConditionOp::SuperiorOrEqual
                | ConditionOp::Inferior
                | ConditionOp::InferiorOrEqual
        )
    }

    fn can_be_superior(self) -> bool {
        matches!(self, ConditionOp::Superior | ConditionOp::SuperiorOrEqual)
    }

    fn can_be_equal(self) -> bool {
        matches!(
            self,
            ConditionOp::Equality | ConditionOp::SuperiorOrEqual | ConditionOp::InferiorOrEqual
        )
    }
}

/// Condition over a world state, as a tree of boolean and arithmetic nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Fact(FactOptional),
    Number(Number),
    Node {
        op: ConditionOp,
        left: Box<Condition>,
        right: Box<Condition>,
    },
    Not(Box<Condition>),
    Exists(Parameter, Box<Condition>),
    Forall(Parameter, Box<Condition>),
}

impl Condition {
    pub fn fact(fact: Fact) -> Self {
        Condition::Fact(FactOptional::new(fact))
    }

    pub fn node(op: ConditionOp, left: Condition, right: Condition) -> Self {
        Condition::Node {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Fold a list of conditions into a right-nested chain of one operator.
    pub fn fold(op: ConditionOp, mut conditions: Vec<Condition>) -> Option<Condition> {
        let mut res = conditions.pop()?;
        while let Some(prev) = conditions.pop() {
            res = Condition::node(op, prev, res);
        }
        Some(res)
    }

    pub fn as_fact(&self) -> Option<&FactOptional> {
        match self {
            Condition::Fact(f) => Some(f),
            _ => None,
        }
    }

    /// Does this condition mention the fact (or its negation).
    pub fn has_fact(&self, fact: &Fact) -> bool {
        match self {
            Condition::Fact(f) => &f.fact == fact,
            Condition::Number(_) => false,
            Condition::Node { left, right, .. } => left.has_fact(fact) || right.has_fact(fact),
            Condition::Not(inner) => inner.has_fact(fact),
            Condition::Exists(_, inner) | Condition::Forall(_, inner) => inner.has_fact(fact),
        }
    }

    /// Iterate over the atomic optional facts with the negation wrapper
    /// applied. The bool passed to the callback is true when the fluent of
    /// the fact is not meaningful at that position (comparison operands).
    pub fn for_each_fact(
        &self,
        callback: &mut dyn FnMut(&FactOptional, bool) -> ControlFlow<()>,
        wrapper_negated: bool,
        ignore_fluent: bool,
        only_mandatory: bool,
    ) -> ControlFlow<()> {
        match self {
            Condition::Fact(f) => {
                if wrapper_negated {
                    let mut flipped = f.clone();
                    flipped.is_negated = !flipped.is_negated;
                    callback(&flipped, ignore_fluent)
                } else {
                    callback(f, ignore_fluent)
                }
            }
            Condition::Number(_) => ControlFlow::Continue(()),
            Condition::Node { op, left, right } => match op {
                ConditionOp::And => {
                    left.for_each_fact(callback, wrapper_negated, ignore_fluent, only_mandatory)?;
                    right.for_each_fact(callback, wrapper_negated, ignore_fluent, only_mandatory)
                }
                ConditionOp::Or | ConditionOp::Imply => {
                    if only_mandatory {
                        return ControlFlow::Continue(());
                    }
                    left.for_each_fact(callback, wrapper_negated, ignore_fluent, only_mandatory)?;
                    right.for_each_fact(callback, wrapper_negated, ignore_fluent, only_mandatory)
                }
                ConditionOp::Equality => {
                    left.for_each_fact(callback, wrapper_negated, true, only_mandatory)?;
                    right.for_each_fact(callback, wrapper_negated, true, only_mandatory)
                }
                _ => {
                    left.for_each_fact(callback, wrapper_negated, true, only_mandatory)?;
                    right.for_each_fact(callback, wrapper_negated, true, only_mandatory)
                }
            },
            Condition::Not(inner) => {
                inner.for_each_fact(callback, !wrapper_negated, ignore_fluent, only_mandatory)
            }
            Condition::Exists(_, inner) | Condition::Forall(_, inner) => {
                inner.for_each_fact(callback, wrapper_negated, ignore_fluent, only_mandatory)
            }
        }
    }

    /// Every atomic optional fact of the condition.
    pub fn all_opt_facts(&self) -> BTreeSet<FactOptional> {
        let mut res = BTreeSet::new();
        let _ = self.for_each_fact(
            &mut |f, _| {
                res.insert(f.clone());
                ControlFlow::Continue(())
            },
            false,
            false,
            false,
        );
        res
    }

    /// Is the optional fact outside every optional branch of the condition.
    pub fn is_opt_fact_mandatory(&self, fact_opt: &FactOptional, ignore_fluent: bool) -> bool {
        let mut found = false;
        let _ = self.for_each_fact(
            &mut |f, _| {
                if f == fact_opt {
                    found = true;
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            },
            false,
            ignore_fluent,
            true,
        );
        found
    }

    /// Walk the atomic facts with fluent resolution against the index until
    /// the callback returns false.
    pub fn until_false(
        &self,
        callback: &mut dyn FnMut(&FactOptional) -> bool,
        index: &SetOfFacts,
        wrapper_negated: bool,
    ) -> bool {
        match self {
            Condition::Fact(f) => {
                if wrapper_negated {
                    let mut flipped = f.clone();
                    flipped.is_negated = !flipped.is_negated;
                    callback(&flipped)
                } else {
                    callback(f)
                }
            }
            Condition::Number(_) => true,
            Condition::Node { op, left, right } => match op {
                ConditionOp::And | ConditionOp::Or | ConditionOp::Imply => {
                    left.until_false(callback, index, wrapper_negated)
                        && right.until_false(callback, index, wrapper_negated)
                }
                ConditionOp::Equality => {
                    if let Some(left_fact) = left.as_fact() {
                        let mut fact = left_fact.clone();
                        fact.fact.set_fluent(right.get_fluent(index));
                        if wrapper_negated {
                            fact.is_negated = !fact.is_negated;
                        }
                        callback(&fact)
                    } else {
                        true
                    }
                }
                op if op.is_comparison() => {
                    if let Some(left_fact) = left.as_fact() {
                        callback(left_fact)
                    } else {
                        true
                    }
                }
                _ => true,
            },
            Condition::Not(inner) => inner.until_false(callback, index, !wrapper_negated),
            Condition::Exists(_, inner) | Condition::Forall(_, inner) => {
                inner.until_false(callback, index, wrapper_negated)
            }
        }
    }

    /// Does this condition contain an optional fact compatible with the
    /// given one, considering parameter wildcards.
    pub fn contains_fact_opt(
        &self,
        fact_opt: &FactOptional,
        fact_params: &Bindings,
        other_fact_params: Option<&Bindings>,
        condition_params: &[Parameter],
        wrapper_negated: bool,
    ) -> bool {
        match self {
            Condition::Fact(f) => {
                let same_polarity = if wrapper_negated {
                    fact_opt.is_negated != f.is_negated
                } else {
                    fact_opt.is_negated == f.is_negated
                };
                same_polarity
                    && f.fact.equal_except_any_values(
                        &fact_opt.fact,
                        Some(fact_params),
                        other_fact_params,
                        Some(condition_params),
                    )
            }
            Condition::Number(_) => false,
            Condition::Node { left, right, .. } => {
                left.contains_fact_opt(
                    fact_opt,
                    fact_params,
                    other_fact_params,
                    condition_params,
                    wrapper_negated,
                ) || right.contains_fact_opt(
                    fact_opt,
                    fact_params,
                    other_fact_params,
                    condition_params,
                    wrapper_negated,
                )
            }
            Condition::Not(inner) => inner.contains_fact_opt(
                fact_opt,
                fact_params,
                other_fact_params,
                condition_params,
                !wrapper_negated,
            ),
            Condition::Exists(_, inner) | Condition::Forall(_, inner) => inner.contains_fact_opt(
                fact_opt,
                fact_params,
                other_fact_params,
                condition_params,
                wrapper_negated,
            ),
        }
    }

    /// Evaluate an arithmetic subtree or a fact fluent read to a value.
    pub fn get_fluent(&self, index: &SetOfFacts) -> Option<Entity> {
        match self {
            Condition::Fact(f) => index.get_fact_fluent(&f.fact),
            Condition::Number(nb) => Some(Entity::number(nb)),
            Condition::Node { op, left, right } => {
                let a = left.get_fluent(index)?;
                let b = right.get_fluent(index)?;
                let value = match op {
                    ConditionOp::Plus => crate::numeric::plus_str(&a.value, &b.value)?,
                    ConditionOp::Minus => crate::numeric::minus_str(&a.value, &b.value)?,
                    _ => return None,
                };
                Some(Entity::number(value))
            }
            _ => None,
        }
    }

    /// Iterate the candidate fluent values of a right-hand expression: facts
    /// yield the fluents of their world matches, arithmetic yields one value.
    fn for_each_fluent_value(
        &self,
        world: &WorldState,
        bindings: Option<&Bindings>,
        callback: &mut dyn FnMut(Entity, Option<&Fact>) -> bool,
    ) {
        match self {
            Condition::Fact(f) => {
                let empty = Bindings::new();
                let params = bindings.unwrap_or(&empty);
                for matched in world
                    .facts_index()
                    .matching_facts(&f.fact, params, None, true)
                {
                    let fluent = matched.fluent().cloned();
                    if let Some(fluent) = fluent {
                        if callback(fluent, Some(&matched)) {
                            return;
                        }
                    }
                }
            }
            _ => {
                if let Some(value) = self.get_fluent(world.facts_index()) {
                    callback(value, None);
                }
            }
        }
    }

    /// Check the condition against a world state.
    ///
    /// `bindings` is refreshed with the argument values required to make the
    /// condition true; `can_become_true` reports whether a failed branch
    /// could still be satisfied by resolving parameters differently.
    #[allow(clippy::too_many_arguments)]
    pub fn is_true(
        &self,
        world: &WorldState,
        types: &SetOfTypes,
        punctual: &BTreeSet<Fact>,
        removed: &BTreeSet<Fact>,
        mut bindings: Option<&mut Bindings>,
        mut can_become_true: Option<&mut bool>,
        wrapper_negated: bool,
    ) -> bool {
        match self {
            Condition::Fact(f) => {
                let res = world.is_optional_fact_satisfied_in_a_specific_context(
                    f,
                    types,
                    punctual,
                    removed,
                    false,
                    bindings.as_deref_mut(),
                    None,
                    can_become_true.as_deref_mut(),
                );
                res != wrapper_negated
            }
            Condition::Number(_) => !wrapper_negated,
            Condition::Node { op, left, right } => match op {
                ConditionOp::And => {
                    let mut local_flag = false;
                    let flag: &mut bool =
                        can_become_true.as_deref_mut().unwrap_or(&mut local_flag);
                    if !left.is_true(
                        world,
                        types,
                        punctual,
                        removed,
                        bindings.as_deref_mut(),
                        Some(&mut *flag),
                        wrapper_negated,
                    ) {
                        // A negated fact with parameters may resolve once the
                        // right side has constrained the bindings.
                        if *flag {
                            return right.is_true(
                                world,
                                types,
                                punctual,
                                removed,
                                bindings.as_deref_mut(),
                                Some(&mut *flag),
                                wrapper_negated,
                            ) && left.is_true(
                                world,
                                types,
                                punctual,
                                removed,
                                bindings,
                                Some(&mut *flag),
                                wrapper_negated,
                            );
                        }
                        return false;
                    }
                    right.is_true(
                        world,
                        types,
                        punctual,
                        removed,
                        bindings,
                        Some(flag),
                        wrapper_negated,
                    )
                }
                ConditionOp::Or => {
                    if left.is_true(
                        world,
                        types,
                        punctual,
                        removed,
                        bindings.as_deref_mut(),
                        can_become_true.as_deref_mut(),
                        wrapper_negated,
                    ) {
                        return true;
                    }
                    right.is_true(
                        world,
                        types,
                        punctual,
                        removed,
                        bindings,
                        can_become_true,
                        wrapper_negated,
                    )
                }
                ConditionOp::Imply => {
                    if left.is_true(
                        world,
                        types,
                        punctual,
                        removed,
                        bindings.as_deref_mut(),
                        can_become_true.as_deref_mut(),
                        wrapper_negated,
                    ) {
                        return right.is_true(
                            world,
                            types,
                            punctual,
                            removed,
                            bindings,
                            can_become_true,
                            wrapper_negated,
                        );
                    }
                    true
                }
                ConditionOp::Equality => {
                    let Some(left_fact) = left.as_fact() else {
                        return !wrapper_negated;
                    };
                    let mut res = false;
                    let mut new_params = Bindings::new();
                    let bindings_view = bindings.as_deref().cloned();
                    right.for_each_fluent_value(
                        world,
                        bindings_view.as_ref(),
                        &mut |value, from_fact| {
                            let mut fact_to_check = left_fact.fact.clone();
                            fact_to_check.set_fluent(Some(value));
                            let sub_res = if fact_to_check.is_punctual() {
                                punctual.contains(&fact_to_check)
                            } else {
                                fact_to_check.is_in_facts_index(
                                    world.facts_index(),
                                    true,
                                    Some(&mut new_params),
                                    false,
                                    bindings_view.as_ref(),
                                    None,
                                    None,
                                    types,
                                )
                            };
                            if sub_res {
                                if let (Some(from_fact), Some(bindings)) =
                                    (from_fact, bindings.as_deref_mut())
                                {
                                    if let Some(right_fact) = right.as_fact() {
                                        for (param, values) in bindings.iter_mut() {
                                            if values.is_empty() {
                                                if let Some(value) = right_fact
                                                    .fact
                                                    .extract_argument_from_example(
                                                        param, from_fact,
                                                    )
                                                {
                                                    values.insert(value);
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                            res = res || sub_res;
                            false
                        },
                    );
                    if let Some(bindings) = bindings {
                        apply_new_params(bindings, &mut new_params);
                    }
                    res != wrapper_negated
                }
                op if op.is_comparison() => {
                    let (Some(left_fact), Condition::Number(nb)) = (left.as_fact(), &**right)
                    else {
                        return !wrapper_negated;
                    };
                    for stored in world.facts_index().find(&left_fact.fact, true) {
                        if let Some(fluent) = stored.fluent() {
                            if left_fact
                                .fact
                                .equal_except_any_values_and_fluent(&stored, None, None, None)
                            {
                                let res = compare_number_str(
                                    &fluent.value,
                                    *nb,
                                    op.can_be_superior(),
                                    op.can_be_equal(),
                                );
                                return res != wrapper_negated;
                            }
                        }
                    }
                    !wrapper_negated
                }
                _ => !wrapper_negated,
            },
            Condition::Not(inner) => inner.is_true(
                world,
                types,
                punctual,
                removed,
                bindings,
                can_become_true,
                !wrapper_negated,
            ),
            Condition::Exists(parameter, inner) => {
                let res = Self::any_candidate_satisfies(
                    parameter,
                    inner,
                    world,
                    types,
                    punctual,
                    removed,
                    bindings.as_deref_mut(),
                );
                res != wrapper_negated
            }
            Condition::Forall(parameter, inner) => {
                let candidates = Self::quantifier_candidates(parameter, inner, world);
                let res = candidates.into_iter().all(|candidate| {
                    let mut assignment = BTreeMap::new();
                    assignment.insert(parameter.clone(), candidate);
                    inner.clone_with(Some(&assignment), false).is_true(
                        world,
                        types,
                        punctual,
                        removed,
                        bindings.as_deref_mut(),
                        None,
                        false,
                    )
                });
                res != wrapper_negated
            }
        }
    }

    /// Check the condition against a world state with no ambient context.
    pub fn is_true_simple(&self, world: &WorldState, types: &SetOfTypes) -> bool {
        self.is_true(
            world,
            types,
            &BTreeSet::new(),
            &BTreeSet::new(),
            None,
            None,
            false,
        )
    }

    /// Candidate values of a quantified parameter, scanned from the world
    /// facts matching the inner condition.
    fn quantifier_candidates(
        parameter: &Parameter,
        inner: &Condition,
        world: &WorldState,
    ) -> BTreeSet<Entity> {
        let mut res = BTreeSet::new();
        let _ = inner.for_each_fact(
            &mut |f, _| {
                if f.fact.has_parameter_or_fluent(parameter) {
                    world.facts_index().extract_potential_arguments_of_a_parameter(
                        &mut res,
                        &f.fact,
                        &parameter.name,
                    );
                }
                ControlFlow::Continue(())
            },
            false,
            false,
            false,
        );
        res
    }

    fn any_candidate_satisfies(
        parameter: &Parameter,
        inner: &Condition,
        world: &WorldState,
        types: &SetOfTypes,
        punctual: &BTreeSet<Fact>,
        removed: &BTreeSet<Fact>,
        mut bindings: Option<&mut Bindings>,
    ) -> bool {
        for candidate in Self::quantifier_candidates(parameter, inner, world) {
            let mut assignment = BTreeMap::new();
            assignment.insert(parameter.clone(), candidate);
            if inner.clone_with(Some(&assignment), false).is_true(
                world,
                types,
                punctual,
                removed,
                bindings.as_deref_mut(),
                None,
                false,
            ) {
                return true;
            }
        }
        false
    }

    /// Can the condition become true, according to the accessibility cache.
    pub fn can_become_true(
        &self,
        view: &dyn Reachability,
        types: &SetOfTypes,
        parameters: &[Parameter],
        wrapper_negated: bool,
    ) -> bool {
        match self {
            Condition::Fact(f) => {
                let res = view.can_fact_opt_become_true(f, parameters, types);
                if wrapper_negated {
                    !res
                } else {
                    res
                }
            }
            Condition::Number(_) => true,
            Condition::Node { op, left, right } => match op {
                ConditionOp::And => {
                    if !left.can_become_true(view, types, parameters, wrapper_negated) {
                        return wrapper_negated;
                    }
                    if !right.can_become_true(view, types, parameters, wrapper_negated) {
                        return wrapper_negated;
                    }
                    true
                }
                ConditionOp::Or => {
                    if left.can_become_true(view, types, parameters, wrapper_negated) {
                        return !wrapper_negated;
                    }
                    if right.can_become_true(view, types, parameters, wrapper_negated) {
                        return !wrapper_negated;
                    }
                    wrapper_negated
                }
                ConditionOp::Imply => {
                    if !left.can_become_true(view, types, parameters, wrapper_negated) {
                        return !wrapper_negated;
                    }
                    if !right.can_become_true(view, types, parameters, wrapper_negated) {
                        return wrapper_negated;
                    }
                    true
                }
                ConditionOp::Equality => {
                    if let (Some(left_fact), Some(right_fact)) =
                        (left.as_fact(), right.as_fact())
                    {
                        let mut fact_to_check = left_fact.fact.clone();
                        fact_to_check
                            .set_fluent(view.facts_index().get_fact_fluent(&right_fact.fact));
                        return view.can_fact_become_true(&fact_to_check, parameters, types);
                    }
                    true
                }
                _ => true,
            },
            Condition::Not(inner) => {
                inner.can_become_true(view, types, parameters, !wrapper_negated)
            }
            Condition::Exists(parameter, inner) => {
                if let Some(inner_fact) = inner.as_fact() {
                    let mut candidates = BTreeSet::new();
                    view.facts_index().extract_potential_arguments_of_a_parameter(
                        &mut candidates,
                        &inner_fact.fact,
                        &parameter.name,
                    );
                    for candidate in candidates {
                        let mut assignment = BTreeMap::new();
                        assignment.insert(parameter.clone(), candidate);
                        let mut fact_to_check = inner_fact.fact.clone();
                        fact_to_check.replace_arguments(&assignment);
                        if view.can_fact_become_true(&fact_to_check, parameters, types) {
                            return true;
                        }
                    }
                    return wrapper_negated;
                }
                true
            }
            Condition::Forall(_, _) => true,
        }
    }

    /// Regression step: locate a subcondition the given upstream effect fact
    /// could make true and hand it to the callback.
    #[allow(clippy::too_many_arguments)]
    pub fn find_condition_candidate_from_fact_from_effect(
        &self,
        callback: &mut dyn FnMut(&FactOptional) -> bool,
        world: &WorldState,
        types: &SetOfTypes,
        effect_fact: &Fact,
        effect_params: &Bindings,
        effect_tmp_params: Option<&Bindings>,
        condition_bindings: &Bindings,
        wrapper_negated: bool,
    ) -> bool {
        match self {
            Condition::Fact(f) => {
                let res = callback(f);
                if wrapper_negated {
                    !res
                } else {
                    res
                }
            }
            Condition::Number(_) => true,
            Condition::Node { op, left, right } => match op {
                ConditionOp::And | ConditionOp::Or => {
                    left.find_condition_candidate_from_fact_from_effect(
                        callback,
                        world,
                        types,
                        effect_fact,
                        effect_params,
                        effect_tmp_params,
                        condition_bindings,
                        wrapper_negated,
                    ) || right.find_condition_candidate_from_fact_from_effect(
                        callback,
                        world,
                        types,
                        effect_fact,
                        effect_params,
                        effect_tmp_params,
                        condition_bindings,
                        wrapper_negated,
                    )
                }
                ConditionOp::Imply => {
                    let mut bindings = condition_bindings.clone();
                    left.is_true(
                        world,
                        types,
                        &BTreeSet::new(),
                        &BTreeSet::new(),
                        Some(&mut bindings),
                        None,
                        false,
                    ) && right.find_condition_candidate_from_fact_from_effect(
                        callback,
                        world,
                        types,
                        effect_fact,
                        effect_params,
                        effect_tmp_params,
                        &bindings,
                        wrapper_negated,
                    )
                }
                ConditionOp::Equality => {
                    let Some(left_fact) = left.as_fact() else {
                        return false;
                    };
                    if left_fact.fact.equal_except_any_values_and_fluent(
                        effect_fact,
                        Some(effect_params),
                        effect_tmp_params,
                        None,
                    ) {
                        let mut found = false;
                        right.for_each_fluent_value(
                            world,
                            Some(condition_bindings),
                            &mut |value, _| {
                                let mut fact_to_check = left_fact.fact.clone();
                                fact_to_check.set_fluent(Some(value));
                                found = callback(&FactOptional::new(fact_to_check));
                                found
                            },
                        );
                        if found {
                            return true;
                        }
                    }
                    if let Some(right_fact) = right.as_fact() {
                        if right_fact.fact.equal_except_any_values_and_fluent(
                            effect_fact,
                            Some(effect_params),
                            effect_tmp_params,
                            None,
                        ) {
                            let mut found = false;
                            left.for_each_fluent_value(
                                world,
                                Some(condition_bindings),
                                &mut |value, _| {
                                    let mut fact_to_check = right_fact.fact.clone();
                                    fact_to_check.set_fluent(Some(value));
                                    found = callback(&FactOptional::new(fact_to_check));
                                    found
                                },
                            );
                            return found;
                        }
                    }
                    false
                }
                op if op.is_comparison() => {
                    if let Some(left_fact) = left.as_fact() {
                        return callback(left_fact);
                    }
                    false
                }
                _ => false,
            },
            Condition::Not(inner) => inner.find_condition_candidate_from_fact_from_effect(
                callback,
                world,
                types,
                effect_fact,
                effect_params,
                effect_tmp_params,
                condition_bindings,
                !wrapper_negated,
            ),
            Condition::Exists(parameter, inner) | Condition::Forall(parameter, inner) => {
                // Possible values of the quantified parameter that would let
                // the effect fact reach the inner condition.
                let mut local_values = BTreeSet::new();
                let _ = inner.for_each_fact(
                    &mut |f, _| {
                        if f.fact.has_parameter_or_fluent(parameter) {
                            if let Some(value) =
                                f.fact.extract_argument_from_example(parameter, effect_fact)
                            {
                                local_values.insert(value);
                            }
                        }
                        ControlFlow::Continue(())
                    },
                    false,
                    false,
                    false,
                );
                let mut local_assignment = BTreeMap::new();
                if let Some(first) = local_values.into_iter().next() {
                    local_assignment.insert(parameter.clone(), first);
                }
                let mut bindings = condition_bindings.clone();
                bindings.entry(parameter.clone()).or_default();
                inner.find_condition_candidate_from_fact_from_effect(
                    &mut |condition_fact| {
                        let mut fact_to_consider = condition_fact.clone();
                        fact_to_consider.fact.replace_arguments(&local_assignment);
                        callback(&fact_to_consider) == !wrapper_negated
                    },
                    world,
                    types,
                    effect_fact,
                    effect_params,
                    effect_tmp_params,
                    &bindings,
                    wrapper_negated,
                )
            }
        }
    }

    /// Syntactic contradiction between this condition and a set of effect
    /// facts, used to prune impossible action successions and merges.
    pub fn has_a_contradiction_with(
        &self,
        facts: &BTreeSet<FactOptional>,
        wrapper_negated: bool,
        parameters: Option<&[Parameter]>,
    ) -> bool {
        match self {
            Condition::Fact(f) => f.has_a_contradiction_with(facts, parameters, wrapper_negated),
            Condition::Number(_) => false,
            Condition::Node { op, left, right } => {
                let and_like = matches!(op, ConditionOp::And | ConditionOp::Imply);
                if (and_like && !wrapper_negated)
                    || (*op == ConditionOp::Or && wrapper_negated)
                {
                    left.has_a_contradiction_with(facts, wrapper_negated, parameters)
                        || right.has_a_contradiction_with(facts, wrapper_negated, parameters)
                } else if (*op == ConditionOp::Or && !wrapper_negated)
                    || (and_like && wrapper_negated)
                {
                    left.has_a_contradiction_with(facts, wrapper_negated, parameters)
                        && right.has_a_contradiction_with(facts, wrapper_negated, parameters)
                } else if let Some(left_fact) = left.as_fact() {
                    // Comparison and equality nodes contradict any effect
                    // touching the same fact.
                    facts.iter().any(|f| {
                        left_fact
                            .fact
                            .equal_modulo_args_and_fluent(&f.fact, parameters)
                    })
                } else {
                    false
                }
            }
            Condition::Not(inner) => {
                inner.has_a_contradiction_with(facts, !wrapper_negated, parameters)
            }
            Condition::Exists(parameter, inner) | Condition::Forall(parameter, inner) => {
                let mut context: Vec<Parameter> =
                    parameters.map(|p| p.to_vec()).unwrap_or_default();
                context.push(parameter.clone());
                inner.has_a_contradiction_with(facts, wrapper_negated, Some(&context))
            }
        }
    }

    /// Clone with parameter substitution, optionally inverting the
    /// condition: AND↔OR, NOT cancels, everything else wraps in NOT.
    pub fn clone_with(
        &self,
        bindings: Option<&BTreeMap<Parameter, Entity>>,
        invert: bool,
    ) -> Condition {
        match self {
            Condition::Fact(f) => {
                let mut res = f.clone();
                if let Some(bindings) = bindings {
                    res.fact.replace_arguments(bindings);
                }
                if invert {
                    res.is_negated = !res.is_negated;
                }
                Condition::Fact(res)
            }
            Condition::Number(nb) => Condition::Number(*nb),
            Condition::Node { op, left, right } => {
                let inverted_op = if invert {
                    match op {
                        ConditionOp::And => Some(ConditionOp::Or),
                        ConditionOp::Or => Some(ConditionOp::And),
                        _ => None,
                    }
                } else {
                    None
                };
                match (invert, inverted_op) {
                    (false, _) => Condition::node(
                        *op,
                        left.clone_with(bindings, false),
                        right.clone_with(bindings, false),
                    ),
                    (true, Some(op)) => Condition::node(
                        op,
                        left.clone_with(bindings, true),
                        right.clone_with(bindings, true),
                    ),
                    (true, None) => Condition::Not(Box::new(Condition::node(
                        *op,
                        left.clone_with(bindings, false),
                        right.clone_with(bindings, false),
                    ))),
                }
            }
            Condition::Not(inner) => {
                if invert {
                    inner.clone_with(bindings, false)
                } else {
                    Condition::Not(Box::new(inner.clone_with(bindings, false)))
                }
            }
            Condition::Exists(parameter, inner) => {
                let res = Condition::Exists(
                    parameter.clone(),
                    Box::new(inner.clone_with(bindings, false)),
                );
                if invert {
                    Condition::Not(Box::new(res))
                } else {
                    res
                }
            }
            Condition::Forall(parameter, inner) => {
                let res = Condition::Forall(
                    parameter.clone(),
                    Box::new(inner.clone_with(bindings, false)),
                );
                if invert {
                    Condition::Not(Box::new(res))
                } else {
                    res
                }
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Fact(fact) => write!(f, "{}", fact),
            Condition::Number(nb) => write!(f, "{}", nb),
            Condition::Node { op, left, right } => {
                let symbol = match op {
                    ConditionOp::And => "&",
                    ConditionOp::Or => "|",
                    ConditionOp::Imply => "=>",
                    ConditionOp::Equality => "=",
                    ConditionOp::Superior => ">",
                    ConditionOp::SuperiorOrEqual => ">=",
                    ConditionOp::Inferior => "<",
                    ConditionOp::InferiorOrEqual => "<=",
                    ConditionOp::Plus => "+",
                    ConditionOp::Minus => "-",
                };
                write!(f, "{} {} {}", left, symbol, right)
            }
            Condition::Not(inner) => write!(f, "!({})", inner),
            Condition::Exists(p, inner) => write!(f, "exists({}, {})", p, inner),
            Condition::Forall(p, inner) => write!(f, "forall({}, {})", p, inner),
        }
    }
}

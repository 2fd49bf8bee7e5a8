//! Effect trees: modifications applied to a world state, and the successor
//! bookkeeping the planner regresses through.

use crate::fact::{Bindings, Fact, FactOptional};
use crate::numeric;
use crate::ontology::{Entity, Parameter, SetOfTypes};
use crate::set_of_facts::SetOfFacts;
use crate::{ActionId, EventId, SetOfEventsId};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

/// Actions and events whose precondition overlaps one effect leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Successions {
    pub actions: BTreeSet<ActionId>,
    pub events: BTreeMap<SetOfEventsId, BTreeSet<EventId>>,
}

impl Successions {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }

    pub fn merge(&mut self, other: &Successions) {
        self.actions.extend(other.actions.iter().cloned());
        for (set_id, events) in &other.events {
            self.events
                .entry(set_id.clone())
                .or_default()
                .extend(events.iter().cloned());
        }
    }
}

fn combine_fluents(
    a: Option<Entity>,
    b: Option<Entity>,
    f: fn(&str, &str) -> Option<String>,
) -> Option<Entity> {
    let (a, b) = (a?, b?);
    f(&a.value, &b.value).map(Entity::number)
}

/// One dynamic effect leaf handed to the planner.
#[derive(Debug)]
pub struct EffectLeaf<'a> {
    /// The fact this effect would add (or remove, when negated).
    pub fact: FactOptional,
    /// Successor-cache slot of the leaf inside its effect tree.
    pub slot: usize,
    /// For assignments whose value is unresolved: the synthesized fluent
    /// parameter and the right-hand expression to validate candidates with.
    pub local_fluent_param: Option<Parameter>,
    pub assign_rhs: Option<&'a WorldStateModification>,
}

/// Effect tree applied to a world state.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldStateModification {
    Fact(FactOptional),
    Number(numeric::Number),
    And(Box<WorldStateModification>, Box<WorldStateModification>),
    Assign(Box<WorldStateModification>, Box<WorldStateModification>),
    ForAll {
        parameter: Parameter,
        template: Box<WorldStateModification>,
        body: Box<WorldStateModification>,
    },
    When {
        condition: Box<WorldStateModification>,
        then: Box<WorldStateModification>,
    },
    Increase(Box<WorldStateModification>, Box<WorldStateModification>),
    Decrease(Box<WorldStateModification>, Box<WorldStateModification>),
    Multiply(Box<WorldStateModification>, Box<WorldStateModification>),
    Plus(Box<WorldStateModification>, Box<WorldStateModification>),
    Minus(Box<WorldStateModification>, Box<WorldStateModification>),
}

impl WorldStateModification {
    pub fn fact(fact: Fact) -> Self {
        WorldStateModification::Fact(FactOptional::new(fact))
    }

    pub fn negated_fact(fact: Fact) -> Self {
        WorldStateModification::Fact(FactOptional::negated(fact))
    }

    /// Concatenate two optional effects into one tree.
    pub fn concat(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(WorldStateModification::And(Box::new(a), Box::new(b))),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }

    /// Fold a list of effects into a right-nested AND chain.
    pub fn fold_and(mut effects: Vec<Self>) -> Option<Self> {
        let mut res = effects.pop()?;
        while let Some(prev) = effects.pop() {
            res = WorldStateModification::And(Box::new(prev), Box::new(res));
        }
        Some(res)
    }

    pub fn as_fact(&self) -> Option<&FactOptional> {
        match self {
            WorldStateModification::Fact(f) => Some(f),
            _ => None,
        }
    }

    /// The single optional fact of a leaf-only effect.
    pub fn optional_fact(&self) -> Option<&FactOptional> {
        self.as_fact()
    }

    /// Does this tree only stack plain fact leaves.
    pub fn is_only_a_set_of_facts(&self) -> bool {
        match self {
            WorldStateModification::Fact(_) => true,
            WorldStateModification::And(l, r) => {
                l.is_only_a_set_of_facts() && r.is_only_a_set_of_facts()
            }
            _ => false,
        }
    }

    pub fn has_fact(&self, fact: &Fact) -> bool {
        match self {
            WorldStateModification::Fact(f) => &f.fact == fact,
            WorldStateModification::Number(_) => false,
            WorldStateModification::And(l, r)
            | WorldStateModification::Assign(l, r)
            | WorldStateModification::Increase(l, r)
            | WorldStateModification::Decrease(l, r)
            | WorldStateModification::Multiply(l, r)
            | WorldStateModification::Plus(l, r)
            | WorldStateModification::Minus(l, r) => l.has_fact(fact) || r.has_fact(fact),
            WorldStateModification::ForAll { template, body, .. } => {
                template.has_fact(fact) || body.has_fact(fact)
            }
            WorldStateModification::When { condition, then } => {
                condition.has_fact(fact) || then.has_fact(fact)
            }
        }
    }

    /// Evaluate this subtree to a fluent value against the index.
    pub fn get_fluent(&self, index: &SetOfFacts) -> Option<Entity> {
        match self {
            WorldStateModification::Fact(f) => {
                if f.fact.fluent().is_some() || f.fact.predicate().fluent_type.is_some() {
                    index.get_fact_fluent(&f.fact)
                } else {
                    // A zero-arity fact used as a plain value.
                    Some(Entity::new(f.fact.name(), None))
                }
            }
            WorldStateModification::Number(nb) => Some(Entity::number(nb)),
            WorldStateModification::Plus(l, r) => combine_fluents(
                l.get_fluent(index),
                r.get_fluent(index),
                numeric::plus_str,
            ),
            WorldStateModification::Minus(l, r) => combine_fluents(
                l.get_fluent(index),
                r.get_fluent(index),
                numeric::minus_str,
            ),
            _ => None,
        }
    }

    fn for_all_instruction(
        &self,
        index: &SetOfFacts,
        callback: &mut dyn FnMut(&WorldStateModification) -> bool,
    ) -> bool {
        let WorldStateModification::ForAll {
            parameter,
            template,
            body,
        } = self
        else {
            return false;
        };
        let Some(template_fact) = template.as_fact() else {
            return false;
        };
        for matched in index.find(&template_fact.fact, false) {
            if let Some(value) = template_fact
                .fact
                .extract_argument_from_example(parameter, &matched)
            {
                let mut assignment = BTreeMap::new();
                assignment.insert(parameter.clone(), value);
                let instantiated = body.clone_with(&assignment);
                if callback(&instantiated) {
                    return true;
                }
            }
        }
        false
    }

    fn when_condition_holds(&self, index: &SetOfFacts) -> bool {
        let WorldStateModification::When { condition, .. } = self else {
            return false;
        };
        let Some(condition_fact) = condition.as_fact() else {
            return false;
        };
        let present = !index.find(&condition_fact.fact, false).is_empty();
        present != condition_fact.is_negated
    }

    /// Iterate the facts this effect applies, with fluent resolution.
    pub fn for_each_applied_fact(
        &self,
        index: &SetOfFacts,
        callback: &mut dyn FnMut(FactOptional),
    ) {
        match self {
            WorldStateModification::Fact(f) => callback(f.clone()),
            WorldStateModification::Number(_)
            | WorldStateModification::Plus(_, _)
            | WorldStateModification::Minus(_, _) => {}
            WorldStateModification::And(l, r) => {
                l.for_each_applied_fact(index, callback);
                r.for_each_applied_fact(index, callback);
            }
            WorldStateModification::Assign(l, r) => {
                if let Some(left_fact) = l.as_fact() {
                    let mut fact = left_fact.clone();
                    fact.fact.set_fluent(r.get_fluent(index));
                    callback(fact);
                }
            }
            WorldStateModification::Increase(l, r) => {
                if let Some(left_fact) = l.as_fact() {
                    let mut fact = left_fact.clone();
                    fact.fact.set_fluent(combine_fluents(
                        l.get_fluent(index),
                        r.get_fluent(index),
                        numeric::plus_str,
                    ));
                    callback(fact);
                }
            }
            WorldStateModification::Decrease(l, r) => {
                if let Some(left_fact) = l.as_fact() {
                    let mut fact = left_fact.clone();
                    fact.fact.set_fluent(combine_fluents(
                        l.get_fluent(index),
                        r.get_fluent(index),
                        numeric::minus_str,
                    ));
                    callback(fact);
                }
            }
            WorldStateModification::Multiply(l, r) => {
                if let Some(left_fact) = l.as_fact() {
                    let mut fact = left_fact.clone();
                    fact.fact.set_fluent(combine_fluents(
                        l.get_fluent(index),
                        r.get_fluent(index),
                        numeric::multiply_str,
                    ));
                    callback(fact);
                }
            }
            WorldStateModification::ForAll { .. } => {
                self.for_all_instruction(index, &mut |instantiated| {
                    instantiated.for_each_applied_fact(index, callback);
                    false
                });
            }
            WorldStateModification::When { then, .. } => {
                if self.when_condition_holds(index) {
                    then.for_each_applied_fact(index, callback);
                }
            }
        }
    }

    /// Iterate applied facts until the callback returns true.
    pub fn for_each_applied_fact_until(
        &self,
        index: &SetOfFacts,
        callback: &mut dyn FnMut(&FactOptional) -> bool,
    ) -> bool {
        let mut res = false;
        self.for_each_applied_fact(index, &mut |fact| {
            if !res && callback(&fact) {
                res = true;
            }
        });
        res
    }

    /// Iterate the leaves this effect can modify, without world context.
    pub fn for_each_modifiable_fact(
        &self,
        callback: &mut dyn FnMut(&FactOptional) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        match self {
            WorldStateModification::Fact(f) => callback(f),
            WorldStateModification::Number(_)
            | WorldStateModification::Plus(_, _)
            | WorldStateModification::Minus(_, _) => ControlFlow::Continue(()),
            WorldStateModification::And(l, r) => {
                l.for_each_modifiable_fact(callback)?;
                r.for_each_modifiable_fact(callback)
            }
            WorldStateModification::Assign(l, _)
            | WorldStateModification::Increase(l, _)
            | WorldStateModification::Decrease(l, _)
            | WorldStateModification::Multiply(l, _) => {
                if let Some(left_fact) = l.as_fact() {
                    callback(left_fact)
                } else {
                    ControlFlow::Continue(())
                }
            }
            WorldStateModification::ForAll { body, .. } => body.for_each_modifiable_fact(callback),
            WorldStateModification::When { then, .. } => then.for_each_modifiable_fact(callback),
        }
    }

    /// Every optional fact this effect can touch.
    pub fn all_modifiable_facts(&self) -> BTreeSet<FactOptional> {
        let mut res = BTreeSet::new();
        let _ = self.for_each_modifiable_fact(&mut |f| {
            res.insert(f.clone());
            ControlFlow::Continue(())
        });
        res
    }

    /// Saturation walk: like the applied walk, but an assignment whose value
    /// cannot be resolved yields the any-value wildcard.
    pub fn for_each_accessible_fact(
        &self,
        index: &SetOfFacts,
        callback: &mut dyn FnMut(FactOptional),
    ) {
        match self {
            WorldStateModification::Assign(l, r) => {
                if let Some(left_fact) = l.as_fact() {
                    let mut fact = left_fact.clone();
                    fact.fact.set_fluent(r.get_fluent(index));
                    if fact.fact.fluent().is_none() {
                        fact.fact.set_any_value_fluent();
                    }
                    callback(fact);
                }
            }
            WorldStateModification::And(l, r) => {
                l.for_each_accessible_fact(index, callback);
                r.for_each_accessible_fact(index, callback);
            }
            WorldStateModification::ForAll { body, .. } => {
                // During saturation the template may not match anything yet:
                // walk the body with its parameter left symbolic.
                body.for_each_accessible_fact(index, callback);
            }
            WorldStateModification::When { then, .. } => {
                then.for_each_accessible_fact(index, callback);
            }
            _ => self.for_each_applied_fact(index, callback),
        }
    }

    pub fn replace_argument(&mut self, old: &Entity, new: &Entity) {
        match self {
            WorldStateModification::Fact(f) => f.fact.replace_entity(old, new),
            WorldStateModification::Number(_) => {}
            WorldStateModification::And(l, r)
            | WorldStateModification::Assign(l, r)
            | WorldStateModification::Increase(l, r)
            | WorldStateModification::Decrease(l, r)
            | WorldStateModification::Multiply(l, r)
            | WorldStateModification::Plus(l, r)
            | WorldStateModification::Minus(l, r) => {
                l.replace_argument(old, new);
                r.replace_argument(old, new);
            }
            WorldStateModification::ForAll { template, body, .. } => {
                template.replace_argument(old, new);
                body.replace_argument(old, new);
            }
            WorldStateModification::When { condition, then } => {
                condition.replace_argument(old, new);
                then.replace_argument(old, new);
            }
        }
    }

    /// Clone with parameter substitution.
    pub fn clone_with(&self, bindings: &BTreeMap<Parameter, Entity>) -> Self {
        match self {
            WorldStateModification::Fact(f) => {
                let mut res = f.clone();
                res.fact.replace_arguments(bindings);
                WorldStateModification::Fact(res)
            }
            WorldStateModification::Number(nb) => WorldStateModification::Number(*nb),
            WorldStateModification::And(l, r) => WorldStateModification::And(
                Box::new(l.clone_with(bindings)),
                Box::new(r.clone_with(bindings)),
            ),
            WorldStateModification::Assign(l, r) => WorldStateModification::Assign(
                Box::new(l.clone_with(bindings)),
                Box::new(r.clone_with(bindings)),
            ),
            WorldStateModification::Increase(l, r) => WorldStateModification::Increase(
                Box::new(l.clone_with(bindings)),
                Box::new(r.clone_with(bindings)),
            ),
            WorldStateModification::Decrease(l, r) => WorldStateModification::Decrease(
                Box::new(l.clone_with(bindings)),
                Box::new(r.clone_with(bindings)),
            ),
            WorldStateModification::Multiply(l, r) => WorldStateModification::Multiply(
                Box::new(l.clone_with(bindings)),
                Box::new(r.clone_with(bindings)),
            ),
            WorldStateModification::Plus(l, r) => WorldStateModification::Plus(
                Box::new(l.clone_with(bindings)),
                Box::new(r.clone_with(bindings)),
            ),
            WorldStateModification::Minus(l, r) => WorldStateModification::Minus(
                Box::new(l.clone_with(bindings)),
                Box::new(r.clone_with(bindings)),
            ),
            WorldStateModification::ForAll {
                parameter,
                template,
                body,
            } => WorldStateModification::ForAll {
                parameter: parameter.clone(),
                template: Box::new(template.clone_with(bindings)),
                body: Box::new(body.clone_with(bindings)),
            },
            WorldStateModification::When { condition, then } => WorldStateModification::When {
                condition: Box::new(condition.clone_with(bindings)),
                then: Box::new(then.clone_with(bindings)),
            },
        }
    }

    /// Number of successor-cache slots spanned by this tree.
    pub fn succession_slot_count(&self) -> usize {
        match self {
            WorldStateModification::Fact(_) => 1,
            WorldStateModification::Number(_)
            | WorldStateModification::Plus(_, _)
            | WorldStateModification::Minus(_, _) => 0,
            WorldStateModification::And(l, r) => {
                l.succession_slot_count() + r.succession_slot_count()
            }
            WorldStateModification::Assign(l, _)
            | WorldStateModification::Increase(l, _)
            | WorldStateModification::Decrease(l, _)
            | WorldStateModification::Multiply(l, _) => {
                if l.as_fact().is_some() {
                    1
                } else {
                    0
                }
            }
            WorldStateModification::ForAll { body, .. } => body.succession_slot_count(),
            WorldStateModification::When { then, .. } => then.succession_slot_count(),
        }
    }

    /// Static walk over successor-cache slots, in the same pre-order the
    /// dynamic walk uses.
    pub fn for_each_succession_leaf(
        &self,
        slot_base: usize,
        callback: &mut dyn FnMut(usize, &FactOptional),
    ) {
        match self {
            WorldStateModification::Fact(f) => callback(slot_base, f),
            WorldStateModification::Number(_)
            | WorldStateModification::Plus(_, _)
            | WorldStateModification::Minus(_, _) => {}
            WorldStateModification::And(l, r) => {
                l.for_each_succession_leaf(slot_base, callback);
                r.for_each_succession_leaf(slot_base + l.succession_slot_count(), callback);
            }
            WorldStateModification::Assign(l, _)
            | WorldStateModification::Increase(l, _)
            | WorldStateModification::Decrease(l, _)
            | WorldStateModification::Multiply(l, _) => {
                if let Some(left_fact) = l.as_fact() {
                    callback(slot_base, left_fact);
                }
            }
            WorldStateModification::ForAll { body, .. } => {
                body.for_each_succession_leaf(slot_base, callback);
            }
            WorldStateModification::When { then, .. } => {
                then.for_each_succession_leaf(slot_base, callback);
            }
        }
    }

    /// Dynamic walk over effect leaves with fluent resolution, yielding the
    /// successor-cache slot of each leaf. Stops when the callback returns
    /// true.
    pub fn walk_effect_leaves(
        &self,
        slot_base: usize,
        index: &SetOfFacts,
        deduction_id: &str,
        callback: &mut dyn FnMut(EffectLeaf<'_>) -> bool,
    ) -> bool {
        match self {
            WorldStateModification::Fact(f) => callback(EffectLeaf {
                fact: f.clone(),
                slot: slot_base,
                local_fluent_param: None,
                assign_rhs: None,
            }),
            WorldStateModification::Number(_)
            | WorldStateModification::Plus(_, _)
            | WorldStateModification::Minus(_, _) => false,
            WorldStateModification::And(l, r) => {
                l.walk_effect_leaves(slot_base, index, deduction_id, callback)
                    || r.walk_effect_leaves(
                        slot_base + l.succession_slot_count(),
                        index,
                        deduction_id,
                        callback,
                    )
            }
            WorldStateModification::Assign(l, r) => {
                let Some(left_fact) = l.as_fact() else {
                    return false;
                };
                let mut fact = left_fact.clone();
                fact.fact.set_fluent(r.get_fluent(index));
                let mut local_fluent_param = None;
                if fact.fact.fluent().is_none() {
                    let fluent_ty = fact.fact.predicate().fluent_type;
                    let name = format!("??value_from_set_{}", deduction_id);
                    fact.fact.set_fluent(Some(Entity::new(name.clone(), fluent_ty)));
                    local_fluent_param = Some(Parameter::new(name, fluent_ty));
                }
                callback(EffectLeaf {
                    fact,
                    slot: slot_base,
                    local_fluent_param,
                    assign_rhs: Some(r),
                })
            }
            WorldStateModification::Increase(l, r) => Self::walk_arithmetic_leaf(
                l,
                r,
                slot_base,
                index,
                numeric::plus_str,
                callback,
            ),
            WorldStateModification::Decrease(l, r) => Self::walk_arithmetic_leaf(
                l,
                r,
                slot_base,
                index,
                numeric::minus_str,
                callback,
            ),
            WorldStateModification::Multiply(l, r) => Self::walk_arithmetic_leaf(
                l,
                r,
                slot_base,
                index,
                numeric::multiply_str,
                callback,
            ),
            WorldStateModification::ForAll { .. } => {
                self.for_all_instruction(index, &mut |instantiated| {
                    instantiated.walk_effect_leaves(slot_base, index, deduction_id, callback)
                })
            }
            WorldStateModification::When { then, .. } => {
                then.walk_effect_leaves(slot_base, index, deduction_id, callback)
            }
        }
    }

    fn walk_arithmetic_leaf(
        l: &WorldStateModification,
        r: &WorldStateModification,
        slot_base: usize,
        index: &SetOfFacts,
        f: fn(&str, &str) -> Option<String>,
        callback: &mut dyn FnMut(EffectLeaf<'_>) -> bool,
    ) -> bool {
        let Some(left_fact) = l.as_fact() else {
            return false;
        };
        let mut fact = left_fact.clone();
        fact.fact
            .set_fluent(combine_fluents(l.get_fluent(index), r.get_fluent(index), f));
        callback(EffectLeaf {
            fact,
            slot: slot_base,
            local_fluent_param: None,
            assign_rhs: None,
        })
    }

    /// Check candidate values of an unresolved assignment fluent against the
    /// world: at least one candidate must be producible by the right-hand
    /// side.
    pub fn assign_rhs_validates(
        rhs: &WorldStateModification,
        local_params: &Bindings,
        index: &SetOfFacts,
        params_in_place: &mut Bindings,
        types: &SetOfTypes,
    ) -> bool {
        let Some((_, candidates)) = local_params.iter().next() else {
            return true;
        };
        if candidates.is_empty() {
            return true;
        }
        let Some(rhs_fact) = rhs.as_fact() else {
            return true;
        };
        let mut res = false;
        let mut new_params = Bindings::new();
        for candidate in candidates {
            let mut fact_to_assign = rhs_fact.fact.clone();
            fact_to_assign.set_fluent(Some(candidate.clone()));
            if fact_to_assign.is_in_facts_index(
                index,
                true,
                Some(&mut new_params),
                false,
                None,
                Some(params_in_place),
                None,
                types,
            ) {
                res = true;
            }
        }
        if res {
            crate::fact::apply_new_params(params_in_place, &mut new_params);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Entity, Parameter, Predicate, SetOfTypes, NUMBER_TYPE};

    fn battery_world() -> (SetOfTypes, Predicate, SetOfFacts) {
        let types = SetOfTypes::new();
        let battery = Predicate::new("battery", vec![], Some(NUMBER_TYPE));
        let mut index = SetOfFacts::new();
        let fact = Fact::new(
            battery.clone(),
            vec![],
            Some(Entity::number(10)),
            false,
            &types,
            false,
        )
        .unwrap();
        index.add(fact, true, &types);
        (types, battery, index)
    }

    fn battery_leaf(types: &SetOfTypes, battery: &Predicate) -> WorldStateModification {
        WorldStateModification::Fact(FactOptional::new(
            Fact::new(battery.clone(), vec![], None, false, types, true).unwrap(),
        ))
    }

    #[test]
    fn test_assign_resolves_value() {
        let (types, battery, index) = battery_world();
        let effect = WorldStateModification::Assign(
            Box::new(battery_leaf(&types, &battery)),
            Box::new(WorldStateModification::Number(numeric::Number::Int(100))),
        );
        let mut applied = Vec::new();
        effect.for_each_applied_fact(&index, &mut |f| applied.push(f));
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].fact.fluent().unwrap().value, "100");
    }

    #[test]
    fn test_increase_combines_with_stored_fluent() {
        let (types, battery, index) = battery_world();
        let effect = WorldStateModification::Increase(
            Box::new(battery_leaf(&types, &battery)),
            Box::new(WorldStateModification::Number(numeric::Number::Int(5))),
        );
        let mut applied = Vec::new();
        effect.for_each_applied_fact(&index, &mut |f| applied.push(f));
        assert_eq!(applied[0].fact.fluent().unwrap().value, "15");
    }

    #[test]
    fn test_succession_slots_are_stable() {
        let (types, battery, _) = battery_world();
        let ping = Predicate::new("ping", vec![], None);
        let ping_fact = Fact::new(ping, vec![], None, false, &types, false).unwrap();
        let effect = WorldStateModification::And(
            Box::new(WorldStateModification::fact(ping_fact)),
            Box::new(WorldStateModification::Assign(
                Box::new(battery_leaf(&types, &battery)),
                Box::new(WorldStateModification::Number(numeric::Number::Int(1))),
            )),
        );
        assert_eq!(effect.succession_slot_count(), 2);
        let mut slots = Vec::new();
        effect.for_each_succession_leaf(0, &mut |slot, f| {
            slots.push((slot, f.fact.name().to_string()))
        });
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0], (0, "ping".to_string()));
        assert_eq!(slots[1], (1, "battery".to_string()));
    }

    #[test]
    fn test_accessible_assign_without_value_is_any() {
        let types = SetOfTypes::new();
        let battery = Predicate::new("battery", vec![], Some(NUMBER_TYPE));
        let index = SetOfFacts::new();
        let other = Predicate::new("other", vec![], Some(NUMBER_TYPE));
        let rhs = WorldStateModification::Fact(FactOptional::new(
            Fact::new(other, vec![], None, false, &types, true).unwrap(),
        ));
        let effect = WorldStateModification::Assign(
            Box::new(battery_leaf(&types, &battery)),
            Box::new(rhs),
        );
        let mut applied = Vec::new();
        effect.for_each_accessible_fact(&index, &mut |f| applied.push(f));
        assert!(applied[0].fact.fluent().unwrap().is_any_value());
    }

    #[test]
    fn test_when_gates_on_condition_fact() {
        let types = SetOfTypes::new();
        let key = Predicate::new("has_key", vec![], None);
        let door = Predicate::new("door_open", vec![], None);
        let key_fact = Fact::new(key, vec![], None, false, &types, false).unwrap();
        let door_fact = Fact::new(door, vec![], None, false, &types, false).unwrap();
        let effect = WorldStateModification::When {
            condition: Box::new(WorldStateModification::fact(key_fact.clone())),
            then: Box::new(WorldStateModification::fact(door_fact)),
        };

        let mut index = SetOfFacts::new();
        let mut applied = Vec::new();
        effect.for_each_applied_fact(&index, &mut |f| applied.push(f));
        assert!(applied.is_empty());

        index.add(key_fact, true, &types);
        effect.for_each_applied_fact(&index, &mut |f| applied.push(f));
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].fact.name(), "door_open");
    }
}

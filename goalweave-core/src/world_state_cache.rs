//! Reachability cache: which facts could ever become true (or be removed)
//! from the current world, given a domain. Keyed by the domain uuid.

use crate::domain::Domain;
use crate::fact::{Fact, FactOptional};
use crate::ontology::{Parameter, SetOfTypes};
use crate::set_of_facts::SetOfFacts;
use std::collections::BTreeSet;
use tracing::trace;

/// Read view over "what can become true": implemented by the world state
/// and by the cache itself while it saturates.
pub trait Reachability {
    fn facts_index(&self) -> &SetOfFacts;
    fn can_fact_become_true(
        &self,
        fact: &Fact,
        parameters: &[Parameter],
        types: &SetOfTypes,
    ) -> bool;
    fn can_fact_opt_become_true(
        &self,
        fact_opt: &FactOptional,
        parameters: &[Parameter],
        types: &SetOfTypes,
    ) -> bool;
}

/// Is a negated fact compatible with an indexed fact set: some stored fact
/// carries the same arguments with a different fluent.
pub(crate) fn is_negated_fact_compatible(fact: &Fact, index: &SetOfFacts) -> bool {
    for stored in index.find(fact, true) {
        if stored.arguments() == fact.arguments() && stored.fluent() != fact.fluent() {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Default)]
struct FactsAlreadyChecked {
    to_add: BTreeSet<Fact>,
    to_remove: BTreeSet<Fact>,
}

/// Accessibility and removability sets, precomputed per domain.
#[derive(Debug, Clone, Default)]
pub struct WorldStateCache {
    accessible_facts: SetOfFacts,
    accessible_facts_with_any: BTreeSet<Fact>,
    removable_facts: SetOfFacts,
    removable_facts_with_any: BTreeSet<Fact>,
    uuid_of_last_domain_used: Option<u64>,
}

struct SaturationView<'a> {
    world_facts: &'a SetOfFacts,
    cache: &'a WorldStateCache,
}

impl Reachability for SaturationView<'_> {
    fn facts_index(&self) -> &SetOfFacts {
        self.world_facts
    }

    fn can_fact_become_true(
        &self,
        fact: &Fact,
        parameters: &[Parameter],
        _types: &SetOfTypes,
    ) -> bool {
        self.cache
            .can_fact_become_true_impl(self.world_facts, fact, parameters)
    }

    fn can_fact_opt_become_true(
        &self,
        fact_opt: &FactOptional,
        parameters: &[Parameter],
        _types: &SetOfTypes,
    ) -> bool {
        self.cache
            .can_fact_opt_become_true_impl(self.world_facts, fact_opt, parameters)
    }
}

impl WorldStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.accessible_facts.clear();
        self.accessible_facts_with_any.clear();
        self.removable_facts.clear();
        self.removable_facts_with_any.clear();
        self.uuid_of_last_domain_used = None;
    }

    pub fn accessible_facts(&self) -> &SetOfFacts {
        &self.accessible_facts
    }

    pub fn accessible_facts_with_any(&self) -> &BTreeSet<Fact> {
        &self.accessible_facts_with_any
    }

    pub fn removable_facts(&self) -> &SetOfFacts {
        &self.removable_facts
    }

    pub fn removable_facts_with_any(&self) -> &BTreeSet<Fact> {
        &self.removable_facts_with_any
    }

    /// A fact entered the world. A fact already known accessible just moves
    /// out of the accessible partition; anything else invalidates the cache.
    pub fn notify_new_fact(&mut self, fact: &Fact, types: &SetOfTypes) {
        if self.accessible_facts.contains(fact) {
            self.accessible_facts.erase(fact, types);
        } else {
            self.clear();
        }
    }

    pub(crate) fn can_fact_become_true_impl(
        &self,
        world_facts: &SetOfFacts,
        fact: &Fact,
        parameters: &[Parameter],
    ) -> bool {
        if !fact.is_fluent_negated() {
            if !world_facts.find(fact, false).is_empty()
                || !self.accessible_facts.find(fact, false).is_empty()
            {
                return true;
            }
            for accessible in &self.accessible_facts_with_any {
                if fact.equal_except_any_values(accessible, None, None, Some(parameters)) {
                    return true;
                }
            }
            false
        } else {
            if is_negated_fact_compatible(fact, world_facts)
                || is_negated_fact_compatible(fact, &self.accessible_facts)
            {
                return true;
            }
            if self.removable_facts.contains(fact) {
                return true;
            }
            for removable in &self.removable_facts_with_any {
                if fact.equal_except_any_values(removable, None, None, Some(parameters)) {
                    return true;
                }
            }
            false
        }
    }

    pub(crate) fn can_fact_opt_become_true_impl(
        &self,
        world_facts: &SetOfFacts,
        fact_opt: &FactOptional,
        parameters: &[Parameter],
    ) -> bool {
        if !fact_opt.is_negated {
            return self.can_fact_become_true_impl(world_facts, &fact_opt.fact, parameters);
        }
        if is_negated_fact_compatible(&fact_opt.fact, world_facts)
            || is_negated_fact_compatible(&fact_opt.fact, &self.accessible_facts)
        {
            return true;
        }
        if self.removable_facts.contains(&fact_opt.fact) {
            return true;
        }
        for removable in &self.removable_facts_with_any {
            if fact_opt
                .fact
                .equal_except_any_values(removable, None, None, Some(parameters))
            {
                return true;
            }
        }
        !world_facts.contains(&fact_opt.fact)
    }

    /// Recompute the reachability sets by forward saturation when the
    /// domain changed since the last refresh.
    pub fn refresh_if_needed(
        &mut self,
        domain: &Domain,
        world_facts: &SetOfFacts,
        types: &SetOfTypes,
    ) {
        if self.uuid_of_last_domain_used == Some(domain.uuid()) {
            return;
        }
        self.uuid_of_last_domain_used = Some(domain.uuid());
        trace!(domain = domain.name(), "refreshing reachability cache");

        // Two passes so facts discovered late still trigger early actions.
        for _ in 0..2 {
            let mut checked = FactsAlreadyChecked::default();
            let fact_keys: Vec<Fact> = world_facts.facts().keys().cloned().collect();
            for fact in &fact_keys {
                if !self.accessible_facts.contains(fact) {
                    let actions = domain.precondition_to_actions().find(fact);
                    self.feed_from_actions(&actions, domain, world_facts, types, &mut checked);
                }
            }
            let no_precondition: BTreeSet<String> = domain
                .precondition_to_actions()
                .values_without_fact()
                .clone();
            self.feed_from_actions(&no_precondition, domain, world_facts, types, &mut checked);
        }
    }

    fn feed_from_actions(
        &mut self,
        action_ids: &BTreeSet<String>,
        domain: &Domain,
        world_facts: &SetOfFacts,
        types: &SetOfTypes,
        checked: &mut FactsAlreadyChecked,
    ) {
        for action_id in action_ids {
            let Some(action) = domain.action(action_id) else {
                continue;
            };
            let can_run = match &action.precondition {
                None => true,
                Some(precondition) => {
                    let view = SaturationView {
                        world_facts,
                        cache: self,
                    };
                    precondition.can_become_true(&view, types, &action.parameters, false)
                }
            };
            if !can_run {
                continue;
            }
            let parameters = action.parameters.clone();
            if let Some(effect) = action.effect.at_end.clone() {
                self.feed_from_deduction(&effect, &parameters, domain, world_facts, types, checked);
            }
            if let Some(effect) = action.effect.potentially_at_end.clone() {
                self.feed_from_deduction(&effect, &parameters, domain, world_facts, types, checked);
            }
        }
    }

    fn feed_from_events(
        &mut self,
        set_id: &str,
        event_ids: &BTreeSet<String>,
        domain: &Domain,
        world_facts: &SetOfFacts,
        types: &SetOfTypes,
        checked: &mut FactsAlreadyChecked,
    ) {
        let Some(set) = domain.set_of_events().get(set_id) else {
            return;
        };
        for event_id in event_ids {
            let Some(event) = set.events().get(event_id) else {
                continue;
            };
            let can_run = {
                let view = SaturationView {
                    world_facts,
                    cache: self,
                };
                event
                    .precondition
                    .can_become_true(&view, types, &event.parameters, false)
            };
            if !can_run {
                continue;
            }
            let parameters = event.parameters.clone();
            if let Some(effect) = event.effect.clone() {
                self.feed_from_deduction(&effect, &parameters, domain, world_facts, types, checked);
            }
        }
    }

    fn feed_from_deduction(
        &mut self,
        effect: &crate::effect::WorldStateModification,
        parameters: &[Parameter],
        domain: &Domain,
        world_facts: &SetOfFacts,
        types: &SetOfTypes,
        checked: &mut FactsAlreadyChecked,
    ) {
        let mut accessible_to_add: BTreeSet<Fact> = BTreeSet::new();
        let mut accessible_any_to_add: Vec<Fact> = Vec::new();
        let mut removable_to_add: BTreeSet<Fact> = BTreeSet::new();
        let mut removable_any_to_add: Vec<Fact> = Vec::new();

        effect.for_each_accessible_fact(world_facts, &mut |fact_opt| {
            if !fact_opt.is_negated {
                if world_facts.contains(&fact_opt.fact)
                    || self.accessible_facts.contains(&fact_opt.fact)
                {
                    return;
                }
                if fact_opt.fact.fluent().is_some_and(|f| f.is_any_value()) {
                    accessible_any_to_add.push(fact_opt.fact);
                } else {
                    let mut fact = fact_opt.fact;
                    if fact.replace_some_arguments_by_any(parameters) {
                        accessible_any_to_add.push(fact);
                    } else {
                        accessible_to_add.insert(fact);
                    }
                }
            } else {
                if self.removable_facts.contains(&fact_opt.fact) {
                    return;
                }
                if fact_opt.fact.fluent().is_some_and(|f| f.is_any_value()) {
                    removable_any_to_add.push(fact_opt.fact);
                } else {
                    let mut fact = fact_opt.fact;
                    if fact.replace_some_arguments_by_any(parameters) {
                        removable_any_to_add.push(fact);
                    } else {
                        removable_to_add.insert(fact);
                    }
                }
            }
        });

        if accessible_to_add.is_empty()
            && accessible_any_to_add.is_empty()
            && removable_to_add.is_empty()
            && removable_any_to_add.is_empty()
        {
            return;
        }

        for fact in &accessible_to_add {
            self.accessible_facts.add(fact.clone(), true, types);
        }
        self.accessible_facts_with_any
            .extend(accessible_any_to_add.iter().cloned());
        for fact in &removable_to_add {
            self.removable_facts.add(fact.clone(), true, types);
        }
        self.removable_facts_with_any
            .extend(removable_any_to_add.iter().cloned());

        for fact in &accessible_to_add {
            self.feed_from_fact(fact, domain, world_facts, types, checked);
        }
        for fact in &accessible_any_to_add {
            self.feed_from_fact(fact, domain, world_facts, types, checked);
        }
        for fact in &removable_to_add {
            self.feed_from_not_fact(fact, domain, world_facts, types, checked);
        }
    }

    fn feed_from_fact(
        &mut self,
        fact: &Fact,
        domain: &Domain,
        world_facts: &SetOfFacts,
        types: &SetOfTypes,
        checked: &mut FactsAlreadyChecked,
    ) {
        if !checked.to_add.insert(fact.clone()) {
            return;
        }
        let actions = domain.precondition_to_actions().find(fact);
        self.feed_from_actions(&actions, domain, world_facts, types, checked);

        let set_ids: Vec<String> = domain.set_of_events().keys().cloned().collect();
        for set_id in set_ids {
            let event_ids = domain.set_of_events()[&set_id]
                .condition_to_events()
                .find(fact);
            self.feed_from_events(&set_id, &event_ids, domain, world_facts, types, checked);
        }
    }

    fn feed_from_not_fact(
        &mut self,
        fact: &Fact,
        domain: &Domain,
        world_facts: &SetOfFacts,
        types: &SetOfTypes,
        checked: &mut FactsAlreadyChecked,
    ) {
        if !checked.to_remove.insert(fact.clone()) {
            return;
        }
        let actions = domain.not_precondition_to_actions().find(fact);
        self.feed_from_actions(&actions, domain, world_facts, types, checked);

        let set_ids: Vec<String> = domain.set_of_events().keys().cloned().collect();
        for set_id in set_ids {
            let event_ids = domain.set_of_events()[&set_id]
                .not_condition_to_events()
                .find(fact);
            self.feed_from_events(&set_id, &event_ids, domain, world_facts, types, checked);
        }
    }
}

//! The ground set of facts, its modification entry points and the
//! fixed-point event propagation loop.

use crate::condition::Condition;
use crate::domain::{Domain, FactsToValue};
use crate::effect::WorldStateModification;
use crate::event::SetOfEvents;
use crate::fact::{apply_new_params, unfold_bindings, Bindings, Fact, FactOptional};
use crate::goal_stack::GoalStack;
use crate::observer::ObserverBus;
use crate::ontology::{Entity, Parameter, SetOfTypes};
use crate::set_of_facts::SetOfFacts;
use crate::world_state_cache::{Reachability, WorldStateCache};
use crate::{CallbackId, EventId, SetOfEventsId};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use std::time::Instant;
use tracing::{debug, trace};

/// A condition paired with a callback fired once the condition becomes
/// true during a notification round.
pub struct ConditionToCallback {
    pub parameters: Vec<Parameter>,
    pub condition: Condition,
    pub callback: Box<dyn Fn()>,
}

impl std::fmt::Debug for ConditionToCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionToCallback")
            .field("condition", &self.condition)
            .finish()
    }
}

/// Named condition-to-callback subscriptions with their wake-up indexes.
#[derive(Debug, Default)]
pub struct SetOfCallbacks {
    callbacks: BTreeMap<CallbackId, ConditionToCallback>,
    condition_to_callbacks: FactsToValue,
    not_condition_to_callbacks: FactsToValue,
}

impl SetOfCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, callback: ConditionToCallback, id_base: &str) -> CallbackId {
        let mut id = id_base.to_string();
        let mut suffix = 1;
        while self.callbacks.contains_key(&id) {
            suffix += 1;
            id = format!("{}_{}", id_base, suffix);
        }
        let _ = callback.condition.for_each_fact(
            &mut |fact_opt, ignore_fluent| {
                if fact_opt.is_negated {
                    self.not_condition_to_callbacks.add(
                        fact_opt.fact.clone(),
                        id.clone(),
                        ignore_fluent,
                    );
                } else {
                    self.condition_to_callbacks
                        .add(fact_opt.fact.clone(), id.clone(), ignore_fluent);
                }
                ControlFlow::Continue(())
            },
            false,
            false,
            false,
        );
        self.callbacks.insert(id.clone(), callback);
        id
    }

    pub fn remove(&mut self, id: &str) {
        if self.callbacks.remove(id).is_some() {
            self.condition_to_callbacks.erase_value(id);
            self.not_condition_to_callbacks.erase_value(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// Diff of one modification batch.
#[derive(Debug, Clone, Default)]
pub struct WhatChanged {
    pub punctual_facts: BTreeSet<Fact>,
    pub added_facts: BTreeSet<Fact>,
    pub removed_facts: BTreeSet<Fact>,
}

impl WhatChanged {
    pub fn something_changed(&self) -> bool {
        !self.punctual_facts.is_empty()
            || !self.added_facts.is_empty()
            || !self.removed_facts.is_empty()
    }

    pub fn has_facts_to_modify_for_sure(&self) -> bool {
        !self.added_facts.is_empty() || !self.removed_facts.is_empty()
    }
}

/// Current state of the world: an indexed set of facts plus the
/// reachability cache and change-notification buses.
#[derive(Debug, Default)]
pub struct WorldState {
    facts: SetOfFacts,
    cache: WorldStateCache,
    pub on_punctual_facts: ObserverBus<BTreeSet<Fact>>,
    pub on_facts_added: ObserverBus<BTreeSet<Fact>>,
    pub on_facts_removed: ObserverBus<BTreeSet<Fact>>,
    pub on_facts_changed: ObserverBus<BTreeMap<Fact, bool>>,
}

impl Clone for WorldState {
    fn clone(&self) -> Self {
        // Observer subscriptions deliberately do not survive a clone: the
        // planner clones worlds for speculation.
        Self {
            facts: self.facts.clone(),
            cache: self.cache.clone(),
            on_punctual_facts: ObserverBus::default(),
            on_facts_added: ObserverBus::default(),
            on_facts_removed: ObserverBus::default(),
            on_facts_changed: ObserverBus::default(),
        }
    }
}

impl Reachability for WorldState {
    fn facts_index(&self) -> &SetOfFacts {
        &self.facts
    }

    fn can_fact_become_true(
        &self,
        fact: &Fact,
        parameters: &[Parameter],
        _types: &SetOfTypes,
    ) -> bool {
        self.cache
            .can_fact_become_true_impl(&self.facts, fact, parameters)
    }

    fn can_fact_opt_become_true(
        &self,
        fact_opt: &FactOptional,
        parameters: &[Parameter],
        _types: &SetOfTypes,
    ) -> bool {
        self.cache
            .can_fact_opt_become_true_impl(&self.facts, fact_opt, parameters)
    }
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A world seeded with non-removable facts (timeless facts).
    pub fn with_pinned_facts(facts: &[Fact], types: &SetOfTypes) -> Self {
        let mut res = Self::new();
        for fact in facts {
            res.facts.add(fact.clone(), false, types);
        }
        res
    }

    pub fn facts(&self) -> &BTreeMap<Fact, bool> {
        self.facts.facts()
    }

    pub fn facts_index(&self) -> &SetOfFacts {
        &self.facts
    }

    pub fn has_fact(&self, fact: &Fact) -> bool {
        self.facts.contains(fact)
    }

    pub fn removable_facts(&self) -> &SetOfFacts {
        self.cache.removable_facts()
    }

    pub fn refresh_cache_if_needed(&mut self, domain: &Domain) {
        self.cache
            .refresh_if_needed(domain, &self.facts, &domain.ontology().types);
    }

    // ===== Satisfaction queries =====

    pub fn is_optional_fact_satisfied(&self, fact_opt: &FactOptional, types: &SetOfTypes) -> bool {
        let _ = types;
        let present = self.facts.contains(&fact_opt.fact);
        if fact_opt.is_negated {
            !present
        } else {
            present
        }
    }

    /// Satisfaction with context: punctual pulses, facts notionally removed,
    /// binding extraction and the can-become-true flag.
    #[allow(clippy::too_many_arguments)]
    pub fn is_optional_fact_satisfied_in_a_specific_context(
        &self,
        fact_opt: &FactOptional,
        types: &SetOfTypes,
        punctual: &BTreeSet<Fact>,
        removed: &BTreeSet<Fact>,
        check_all_possibilities: bool,
        mut params: Option<&mut Bindings>,
        params_in_place: Option<&mut Bindings>,
        can_become_true: Option<&mut bool>,
    ) -> bool {
        if fact_opt.fact.is_punctual() && !fact_opt.is_negated {
            return punctual.contains(&fact_opt.fact);
        }

        if fact_opt.is_negated {
            let mut new_params = Bindings::new();
            let params_view = params.as_deref().cloned();
            if fact_opt.fact.is_in_facts(
                removed,
                true,
                Some(&mut new_params),
                check_all_possibilities,
                params_view.as_ref(),
                None,
                None,
                types,
            ) {
                if let Some(params) = params.as_deref_mut() {
                    apply_new_params(params, &mut new_params);
                }
                return true;
            }

            let matching = self.facts.find(&fact_opt.fact, true);
            if !matching.is_empty() {
                if let Some(params) = params.as_deref_mut() {
                    let possibilities = unfold_bindings(params);
                    for possibility in &possibilities {
                        let mut fact_to_compare = fact_opt.fact.clone();
                        fact_to_compare.replace_arguments(possibility);
                        if fact_to_compare.fluent().is_some_and(|f| f.is_any_value()) {
                            for stored in &matching {
                                if stored.equal_except_any_values_and_fluent(
                                    &fact_to_compare,
                                    None,
                                    None,
                                    None,
                                ) {
                                    return false;
                                }
                            }
                            return true;
                        }
                    }
                    if fact_opt.fact.fluent().is_some_and(|f| f.is_any_value())
                        && !possibilities.is_empty()
                    {
                        return false;
                    }
                }
                if fact_opt.fact.fluent().is_some_and(|f| f.is_any_value()) {
                    for stored in &matching {
                        if stored.equal_except_any_values_and_fluent(
                            &fact_opt.fact,
                            None,
                            None,
                            None,
                        ) {
                            return false;
                        }
                    }
                    return true;
                }
            }

            let mut tried_to_modify = false;
            if fact_opt.fact.is_in_facts_index(
                &self.facts,
                true,
                None,
                check_all_possibilities,
                params.as_deref(),
                None,
                Some(&mut tried_to_modify),
                types,
            ) {
                if tried_to_modify {
                    if let Some(flag) = can_become_true {
                        *flag = true;
                    }
                }
                return false;
            }
            return true;
        }

        let mut new_params = Bindings::new();
        let params_view = params.as_deref().cloned();
        let res = fact_opt.fact.is_in_facts_index(
            &self.facts,
            true,
            Some(&mut new_params),
            check_all_possibilities,
            params_view.as_ref(),
            params_in_place,
            None,
            types,
        );
        if let Some(params) = params {
            apply_new_params(params, &mut new_params);
        }
        res
    }

    pub fn is_goal_satisfied(&self, goal: &crate::goal::Goal, types: &SetOfTypes) -> bool {
        goal.is_satisfied(self, types)
    }

    /// Iterate facts matching a pattern (ignoring the fluent).
    pub fn iterate_on_matching_facts_without_fluent(
        &self,
        callback: &mut dyn FnMut(&Fact) -> bool,
        pattern: &Fact,
        params_as_any: &Bindings,
        other_params_as_any: Option<&Bindings>,
    ) {
        for fact in self
            .facts
            .matching_facts(pattern, params_as_any, other_params_as_any, true)
        {
            if callback(&fact) {
                break;
            }
        }
    }

    /// Iterate facts matching a pattern, fluent considered.
    pub fn iterate_on_matching_facts(
        &self,
        callback: &mut dyn FnMut(&Fact) -> bool,
        pattern: &Fact,
        params_as_any: &Bindings,
        other_params_as_any: Option<&Bindings>,
    ) {
        for fact in self
            .facts
            .matching_facts(pattern, params_as_any, other_params_as_any, false)
        {
            if callback(&fact) {
                break;
            }
        }
    }

    // ===== Modification entry points =====

    /// Apply an effect with parameter substitution, then run the
    /// notification loop.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_effect(
        &mut self,
        parameters: &BTreeMap<Parameter, Entity>,
        effect: Option<&WorldStateModification>,
        goal_stack: &mut GoalStack,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
    ) -> bool {
        match effect {
            Some(effect) if !parameters.is_empty() => {
                let instantiated = effect.clone_with(parameters);
                self.modify(
                    Some(&instantiated),
                    goal_stack,
                    set_of_events,
                    callbacks,
                    types,
                    now,
                    true,
                )
            }
            Some(effect) => self.modify(
                Some(effect),
                goal_stack,
                set_of_events,
                callbacks,
                types,
                now,
                true,
            ),
            None => false,
        }
    }

    /// Modify the world and propagate events to the fixed point.
    #[allow(clippy::too_many_arguments)]
    pub fn modify(
        &mut self,
        wsm: Option<&WorldStateModification>,
        goal_stack: &mut GoalStack,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
        can_facts_be_removed: bool,
    ) -> bool {
        let mut what_changed = WhatChanged::default();
        self.modify_without_notification(
            &mut what_changed,
            wsm,
            goal_stack,
            set_of_events,
            callbacks,
            types,
            now,
            can_facts_be_removed,
        );
        let mut goal_changed = false;
        self.notify_what_changed(
            &mut what_changed,
            &mut goal_changed,
            goal_stack,
            set_of_events,
            callbacks,
            types,
            now,
        );
        what_changed.has_facts_to_modify_for_sure()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_fact(
        &mut self,
        fact: Fact,
        goal_stack: &mut GoalStack,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
        can_facts_be_removed: bool,
    ) -> bool {
        self.add_facts(
            vec![fact],
            goal_stack,
            set_of_events,
            callbacks,
            types,
            now,
            can_facts_be_removed,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_facts(
        &mut self,
        facts: Vec<Fact>,
        goal_stack: &mut GoalStack,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
        can_facts_be_removed: bool,
    ) -> bool {
        let mut what_changed = WhatChanged::default();
        for fact in facts {
            self.add_a_fact(
                &mut what_changed,
                fact,
                goal_stack,
                set_of_events,
                callbacks,
                types,
                now,
                can_facts_be_removed,
            );
        }
        let mut goal_changed = false;
        self.notify_what_changed(
            &mut what_changed,
            &mut goal_changed,
            goal_stack,
            set_of_events,
            callbacks,
            types,
            now,
        );
        what_changed.has_facts_to_modify_for_sure()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn remove_fact(
        &mut self,
        fact: &Fact,
        goal_stack: &mut GoalStack,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
    ) -> bool {
        let mut what_changed = WhatChanged::default();
        self.remove_a_fact(&mut what_changed, fact, types);
        let mut goal_changed = false;
        self.notify_what_changed(
            &mut what_changed,
            &mut goal_changed,
            goal_stack,
            set_of_events,
            callbacks,
            types,
            now,
        );
        what_changed.has_facts_to_modify_for_sure()
    }

    /// Replace the whole fact set.
    #[allow(clippy::too_many_arguments)]
    pub fn set_facts(
        &mut self,
        facts: BTreeSet<Fact>,
        goal_stack: &mut GoalStack,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
    ) {
        self.facts.clear();
        for fact in facts {
            self.facts.add(fact, true, types);
        }
        self.cache.clear();
        goal_stack.refresh_after_world_change(self, types, now);
        let mut what_changed = WhatChanged::default();
        let mut goal_changed = false;
        self.notify_what_changed(
            &mut what_changed,
            &mut goal_changed,
            goal_stack,
            set_of_events,
            callbacks,
            types,
            now,
        );
    }

    // ===== Internals =====

    #[allow(clippy::too_many_arguments)]
    fn add_a_fact(
        &mut self,
        what_changed: &mut WhatChanged,
        fact: Fact,
        goal_stack: &mut GoalStack,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
        can_facts_be_removed: bool,
    ) {
        if fact.is_punctual() {
            what_changed.punctual_facts.insert(fact);
            return;
        }
        if self.facts.contains(&fact) {
            return;
        }

        // A fluent function maps each argument tuple to at most one value:
        // remove stored facts the new one contradicts.
        let mut skip_this_fact = false;
        loop {
            let mut fact_to_remove = None;
            for existing in self.facts.find(&fact, true) {
                if fact.is_fluent_negated()
                    && !existing.is_fluent_negated()
                    && fact.fluent() != existing.fluent()
                {
                    skip_this_fact = true;
                }
                if fact.arguments() == existing.arguments() {
                    let conflicting = (!fact.is_fluent_negated()
                        && !existing.is_fluent_negated()
                        && fact.fluent() != existing.fluent())
                        || (fact.is_fluent_negated()
                            && !existing.is_fluent_negated()
                            && fact.fluent() == existing.fluent())
                        || (!fact.is_fluent_negated() && existing.is_fluent_negated());
                    if conflicting {
                        fact_to_remove = Some(existing);
                        break;
                    }
                }
                if skip_this_fact {
                    break;
                }
            }
            match fact_to_remove {
                Some(existing) => {
                    let mut sub_changed = WhatChanged::default();
                    self.remove_a_fact(&mut sub_changed, &existing, types);
                    goal_stack.refresh_after_world_change(self, types, now);
                    let mut goal_changed = false;
                    self.notify_what_changed(
                        &mut sub_changed,
                        &mut goal_changed,
                        goal_stack,
                        set_of_events,
                        callbacks,
                        types,
                        now,
                    );
                }
                None => break,
            }
        }

        if !skip_this_fact {
            what_changed.added_facts.insert(fact.clone());
            self.facts.add(fact.clone(), can_facts_be_removed, types);
            self.cache.notify_new_fact(&fact, types);
        }
    }

    fn remove_a_fact(&mut self, what_changed: &mut WhatChanged, fact: &Fact, types: &SetOfTypes) {
        if self.facts.erase(fact, types) {
            what_changed.removed_facts.insert(fact.clone());
            self.cache.clear();
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn modify_without_notification(
        &mut self,
        what_changed: &mut WhatChanged,
        wsm: Option<&WorldStateModification>,
        goal_stack: &mut GoalStack,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
        can_facts_be_removed: bool,
    ) {
        let Some(wsm) = wsm else {
            return;
        };
        let mut facts_to_add = Vec::new();
        let mut facts_to_remove = Vec::new();
        wsm.for_each_applied_fact(&self.facts, &mut |fact_opt| {
            if fact_opt.is_negated {
                facts_to_remove.push(fact_opt.fact);
            } else {
                facts_to_add.push(fact_opt.fact);
            }
        });

        for fact in facts_to_add {
            self.add_a_fact(
                what_changed,
                fact,
                goal_stack,
                set_of_events,
                callbacks,
                types,
                now,
                can_facts_be_removed,
            );
        }
        for fact in facts_to_remove {
            self.remove_a_fact(what_changed, &fact, types);
        }
        goal_stack.refresh_after_world_change(self, types, now);
    }

    /// Try to apply the events woken by one fact transition. Every event
    /// fires at most once per notification round.
    #[allow(clippy::too_many_arguments)]
    fn try_to_apply_events(
        &mut self,
        events_already_applied: &mut BTreeSet<EventId>,
        what_changed: &mut WhatChanged,
        goal_changed: &mut bool,
        goal_stack: &mut GoalStack,
        event_ids: &BTreeSet<EventId>,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        events: &BTreeMap<EventId, crate::event::Event>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
    ) -> bool {
        let mut something_changed = false;
        for event_id in event_ids {
            if !events_already_applied.insert(event_id.clone()) {
                continue;
            }
            let Some(event) = events.get(event_id) else {
                continue;
            };
            let mut bindings: Bindings = Bindings::new();
            for parameter in &event.parameters {
                bindings.entry(parameter.clone()).or_default();
            }
            let fires = event.precondition.is_true(
                self,
                types,
                &what_changed.punctual_facts,
                &what_changed.removed_facts,
                Some(&mut bindings),
                None,
                false,
            );
            if !fires {
                continue;
            }
            trace!(event = event_id.as_str(), "event fired");

            if let Some(effect) = &event.effect {
                if !bindings.is_empty() {
                    let possibilities = unfold_bindings(&bindings);
                    if !possibilities.is_empty() {
                        for possibility in possibilities {
                            let instantiated = effect.clone_with(&possibility);
                            self.modify_without_notification(
                                what_changed,
                                Some(&instantiated),
                                goal_stack,
                                set_of_events,
                                callbacks,
                                types,
                                now,
                                true,
                            );
                        }
                    } else if let Some(opt_fact) = effect.optional_fact() {
                        // No binding possibility: a negated single-fact
                        // effect removes every matching fact.
                        if opt_fact.is_negated {
                            let mut to_remove = Vec::new();
                            self.iterate_on_matching_facts(
                                &mut |matched| {
                                    to_remove.push(matched.clone());
                                    false
                                },
                                &opt_fact.fact,
                                &bindings,
                                None,
                            );
                            for fact in to_remove {
                                let removal = WorldStateModification::negated_fact(fact);
                                self.modify_without_notification(
                                    what_changed,
                                    Some(&removal),
                                    goal_stack,
                                    set_of_events,
                                    callbacks,
                                    types,
                                    now,
                                    true,
                                );
                            }
                        }
                    }
                } else {
                    self.modify_without_notification(
                        what_changed,
                        Some(effect),
                        goal_stack,
                        set_of_events,
                        callbacks,
                        types,
                        now,
                        true,
                    );
                }
            }
            if goal_stack.add_goals(&event.goals_to_add, self, types, now) {
                *goal_changed = true;
            }
            something_changed = true;
        }
        something_changed
    }

    fn try_to_call_callbacks(
        &self,
        callbacks_already_called: &mut BTreeSet<CallbackId>,
        what_changed: &WhatChanged,
        callback_ids: &BTreeSet<CallbackId>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
    ) {
        for callback_id in callback_ids {
            if callbacks_already_called.contains(callback_id) {
                continue;
            }
            let Some(entry) = callbacks.callbacks.get(callback_id) else {
                continue;
            };
            let mut bindings: Bindings = Bindings::new();
            for parameter in &entry.parameters {
                bindings.entry(parameter.clone()).or_default();
            }
            if entry.condition.is_true(
                self,
                types,
                &what_changed.punctual_facts,
                &what_changed.removed_facts,
                Some(&mut bindings),
                None,
                false,
            ) {
                callbacks_already_called.insert(callback_id.clone());
                (entry.callback)();
            }
        }
    }

    /// Propagate events breadth-first per fact transition until nothing
    /// changes any more, then fire the observers with the diff.
    #[allow(clippy::too_many_arguments)]
    fn notify_what_changed(
        &mut self,
        what_changed: &mut WhatChanged,
        goal_changed: &mut bool,
        goal_stack: &mut GoalStack,
        set_of_events: &BTreeMap<SetOfEventsId, SetOfEvents>,
        callbacks: &SetOfCallbacks,
        types: &SetOfTypes,
        now: Option<Instant>,
    ) {
        if !what_changed.something_changed() {
            return;
        }

        let mut applied_per_set: BTreeMap<SetOfEventsId, BTreeSet<EventId>> = BTreeMap::new();
        let mut callbacks_called: BTreeSet<CallbackId> = BTreeSet::new();
        let mut need_another_loop = true;
        while need_another_loop {
            need_another_loop = false;
            for (set_id, set) in set_of_events {
                let events = set.events();
                let already_applied = applied_per_set.entry(set_id.clone()).or_default();

                let punctual: Vec<Fact> = what_changed.punctual_facts.iter().cloned().collect();
                let added: Vec<Fact> = what_changed.added_facts.iter().cloned().collect();
                let removed: Vec<Fact> = what_changed.removed_facts.iter().cloned().collect();

                for fact in punctual.iter().chain(added.iter()) {
                    let event_ids = set.condition_to_events().find(fact);
                    if self.try_to_apply_events(
                        already_applied,
                        what_changed,
                        goal_changed,
                        goal_stack,
                        &event_ids,
                        set_of_events,
                        events,
                        callbacks,
                        types,
                        now,
                    ) {
                        need_another_loop = true;
                    }
                }
                for fact in &removed {
                    let event_ids = set.not_condition_to_events().find(fact);
                    if self.try_to_apply_events(
                        already_applied,
                        what_changed,
                        goal_changed,
                        goal_stack,
                        &event_ids,
                        set_of_events,
                        events,
                        callbacks,
                        types,
                        now,
                    ) {
                        need_another_loop = true;
                    }
                }
            }

            if !callbacks.is_empty() {
                let punctual: Vec<Fact> = what_changed.punctual_facts.iter().cloned().collect();
                let added: Vec<Fact> = what_changed.added_facts.iter().cloned().collect();
                let removed: Vec<Fact> = what_changed.removed_facts.iter().cloned().collect();
                for fact in punctual.iter().chain(added.iter()) {
                    let ids = callbacks.condition_to_callbacks.find(fact);
                    self.try_to_call_callbacks(
                        &mut callbacks_called,
                        what_changed,
                        &ids,
                        callbacks,
                        types,
                    );
                }
                for fact in &removed {
                    let ids = callbacks.not_condition_to_callbacks.find(fact);
                    self.try_to_call_callbacks(
                        &mut callbacks_called,
                        what_changed,
                        &ids,
                        callbacks,
                        types,
                    );
                }
            }
        }

        debug!(
            added = what_changed.added_facts.len(),
            removed = what_changed.removed_facts.len(),
            punctual = what_changed.punctual_facts.len(),
            "world state changed"
        );
        if !what_changed.punctual_facts.is_empty() {
            self.on_punctual_facts.notify(&what_changed.punctual_facts);
        }
        if !what_changed.added_facts.is_empty() {
            self.on_facts_added.notify(&what_changed.added_facts);
        }
        if !what_changed.removed_facts.is_empty() {
            self.on_facts_removed.notify(&what_changed.removed_facts);
        }
        if what_changed.has_facts_to_modify_for_sure() {
            let facts = self.facts.facts().clone();
            self.on_facts_changed.notify(&facts);
        }
    }
}

//! Planning domain: ontology, actions, event sets, timeless facts and the
//! precomputed successor graph.

use crate::action::Action;
use crate::effect::{Successions, WorldStateModification};
use crate::event::SetOfEvents;
use crate::fact::{Fact, FactOptional};
use crate::goal::Goal;
use crate::ontology::Ontology;
use crate::set_of_facts::SetOfFacts;
use crate::{ActionId, EventId, SetOfEventsId};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static NEXT_UUID: AtomicU64 = AtomicU64::new(1);

fn next_uuid() -> u64 {
    NEXT_UUID.fetch_add(1, Ordering::Relaxed)
}

/// Pattern index from precondition facts to container ids (action ids,
/// event ids, callback ids).
#[derive(Debug, Clone, Default)]
pub struct FactsToValue {
    by_name: BTreeMap<String, Vec<(Fact, String, bool)>>,
    values_without_fact: BTreeSet<String>,
}

impl FactsToValue {
    pub fn add(&mut self, pattern: Fact, value: String, ignore_fluent: bool) {
        self.by_name
            .entry(pattern.name().to_string())
            .or_default()
            .push((pattern, value, ignore_fluent));
    }

    pub fn add_value_without_fact(&mut self, value: String) {
        self.values_without_fact.insert(value);
    }

    pub fn erase_value(&mut self, value: &str) {
        self.by_name.retain(|_, entries| {
            entries.retain(|(_, v, _)| v != value);
            !entries.is_empty()
        });
        self.values_without_fact.remove(value);
    }

    pub fn values_without_fact(&self) -> &BTreeSet<String> {
        &self.values_without_fact
    }

    fn pattern_matches(pattern: &Fact, fact: &Fact, ignore_fluent: bool) -> bool {
        if pattern.name() != fact.name()
            || pattern.arguments().len() != fact.arguments().len()
        {
            return false;
        }
        for (p, a) in pattern.arguments().iter().zip(fact.arguments()) {
            if !p.is_param_to_fill() && !a.is_param_to_fill() && p != a {
                return false;
            }
        }
        if ignore_fluent {
            return true;
        }
        match (pattern.fluent(), fact.fluent()) {
            (Some(p), Some(a)) => {
                p.is_param_to_fill()
                    || a.is_param_to_fill()
                    || (p == a) != pattern.is_fluent_negated()
            }
            _ => true,
        }
    }

    /// Ids whose stored pattern matches the given fact.
    pub fn find(&self, fact: &Fact) -> BTreeSet<String> {
        let mut res = BTreeSet::new();
        if let Some(entries) = self.by_name.get(fact.name()) {
            for (pattern, value, ignore_fluent) in entries {
                if Self::pattern_matches(pattern, fact, *ignore_fluent) {
                    res.insert(value.clone());
                }
            }
        }
        res
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.values_without_fact.is_empty()
    }
}

/// Exclusion marker so a container does not count itself as its own
/// successor.
#[derive(Debug, Clone, Default)]
pub struct ContainerId {
    pub action_id: Option<ActionId>,
    pub set_of_events_id: Option<SetOfEventsId>,
    pub event_id: Option<EventId>,
}

impl ContainerId {
    pub fn action(id: &str) -> Self {
        Self {
            action_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn event(set_id: &str, event_id: &str) -> Self {
        Self {
            action_id: None,
            set_of_events_id: Some(set_id.to_string()),
            event_id: Some(event_id.to_string()),
        }
    }

    fn is_action(&self, id: &str) -> bool {
        self.action_id.as_deref() == Some(id)
    }

    fn is_event(&self, set_id: &str, event_id: &str) -> bool {
        self.set_of_events_id.as_deref() == Some(set_id)
            && self.event_id.as_deref() == Some(event_id)
    }
}

/// Immutable bundle of actions, events, timeless facts and ontology,
/// carrying the successor graph. Every edit regenerates the uuid so
/// dependent caches know to refresh.
#[derive(Debug, Clone)]
pub struct Domain {
    name: String,
    uuid: u64,
    ontology: Ontology,
    actions: BTreeMap<ActionId, Action>,
    set_of_events: BTreeMap<SetOfEventsId, SetOfEvents>,
    timeless_facts: Vec<Fact>,
    requirements: BTreeSet<String>,
    precondition_to_actions: FactsToValue,
    not_precondition_to_actions: FactsToValue,
}

impl Domain {
    /// Id of the event set filled by the domain constructor and the PDDL
    /// `:event` / `:axiom` clauses.
    pub const CONSTRUCTOR_EVENTS_ID: &'static str = "soe_from_constructor";

    pub fn new(name: impl Into<String>, ontology: Ontology) -> Self {
        Self {
            name: name.into(),
            uuid: next_uuid(),
            ontology,
            actions: BTreeMap::new(),
            set_of_events: BTreeMap::new(),
            timeless_facts: Vec::new(),
            requirements: BTreeSet::new(),
            precondition_to_actions: FactsToValue::default(),
            not_precondition_to_actions: FactsToValue::default(),
        }
    }

    /// Build a complete domain in one call.
    pub fn with_content(
        name: impl Into<String>,
        ontology: Ontology,
        actions: BTreeMap<ActionId, Action>,
        set_of_events: BTreeMap<SetOfEventsId, SetOfEvents>,
        timeless_facts: Vec<Fact>,
    ) -> Self {
        let mut res = Self::new(name, ontology);
        for (id, action) in actions {
            res.insert_action(id, action);
        }
        res.set_of_events = set_of_events;
        res.timeless_facts = timeless_facts;
        res.update_successions();
        res
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> u64 {
        self.uuid
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn actions(&self) -> &BTreeMap<ActionId, Action> {
        &self.actions
    }

    pub fn action(&self, action_id: &str) -> Option<&Action> {
        self.actions.get(action_id)
    }

    pub fn set_of_events(&self) -> &BTreeMap<SetOfEventsId, SetOfEvents> {
        &self.set_of_events
    }

    pub fn timeless_facts(&self) -> &[Fact] {
        &self.timeless_facts
    }

    pub fn requirements(&self) -> &BTreeSet<String> {
        &self.requirements
    }

    pub fn add_requirement(&mut self, requirement: impl Into<String>) {
        self.requirements.insert(requirement.into());
    }

    pub fn precondition_to_actions(&self) -> &FactsToValue {
        &self.precondition_to_actions
    }

    pub fn not_precondition_to_actions(&self) -> &FactsToValue {
        &self.not_precondition_to_actions
    }

    /// Can this effect change anything, assuming the precondition already
    /// holds.
    fn can_wsm_do_something(
        wsm: Option<&WorldStateModification>,
        precondition: Option<&crate::condition::Condition>,
    ) -> bool {
        let Some(wsm) = wsm else {
            return false;
        };
        if !wsm.is_only_a_set_of_facts() {
            return true;
        }
        let empty = SetOfFacts::new();
        wsm.for_each_applied_fact_until(&empty, &mut |fact_opt| match precondition {
            None => true,
            Some(cond) => !cond.contains_fact_opt(
                fact_opt,
                &BTreeMap::new(),
                None,
                &[],
                false,
            ),
        })
    }

    fn insert_action(&mut self, action_id: ActionId, action: Action) {
        if self.actions.contains_key(&action_id) || action.effect.is_empty() {
            return;
        }
        let mut action = action;
        action.usable = Self::can_wsm_do_something(
            action.effect.at_end.as_ref(),
            action.precondition.as_ref(),
        ) || Self::can_wsm_do_something(
            action.effect.potentially_at_end.as_ref(),
            action.precondition.as_ref(),
        );

        self.uuid = next_uuid();
        let mut has_added_a_fact = false;
        if let Some(precondition) = &action.precondition {
            let _ = precondition.for_each_fact(
                &mut |fact_opt, ignore_fluent| {
                    if fact_opt.is_negated {
                        self.not_precondition_to_actions.add(
                            fact_opt.fact.clone(),
                            action_id.clone(),
                            ignore_fluent,
                        );
                    } else {
                        self.precondition_to_actions.add(
                            fact_opt.fact.clone(),
                            action_id.clone(),
                            ignore_fluent,
                        );
                        has_added_a_fact = true;
                    }
                    ControlFlow::Continue(())
                },
                false,
                false,
                false,
            );
        }
        if !has_added_a_fact {
            self.precondition_to_actions
                .add_value_without_fact(action_id.clone());
        }
        self.actions.insert(action_id, action);
    }

    pub fn add_action(&mut self, action_id: impl Into<ActionId>, action: Action) {
        self.insert_action(action_id.into(), action);
        self.update_successions();
    }

    pub fn remove_action(&mut self, action_id: &str) {
        if self.actions.remove(action_id).is_none() {
            return;
        }
        self.uuid = next_uuid();
        self.precondition_to_actions.erase_value(action_id);
        self.not_precondition_to_actions.erase_value(action_id);
        self.update_successions();
    }

    /// Register a set of events under a unique id derived from the given
    /// one.
    pub fn add_set_of_events(
        &mut self,
        set_of_events: SetOfEvents,
        set_of_events_id: &str,
    ) -> SetOfEventsId {
        self.uuid = next_uuid();
        let mut id = set_of_events_id.to_string();
        let mut suffix = 1;
        while self.set_of_events.contains_key(&id) {
            suffix += 1;
            id = format!("{}_{}", set_of_events_id, suffix);
        }
        self.set_of_events.insert(id.clone(), set_of_events);
        self.update_successions();
        id
    }

    pub fn remove_set_of_events(&mut self, set_of_events_id: &str) {
        if self.set_of_events.remove(set_of_events_id).is_some() {
            self.uuid = next_uuid();
            self.update_successions();
        }
    }

    pub fn clear_events(&mut self) {
        if !self.set_of_events.is_empty() {
            self.uuid = next_uuid();
            self.set_of_events.clear();
            self.update_successions();
        }
    }

    /// Successor ids of one effect leaf: actions and events whose
    /// precondition pattern unifies with it.
    fn collect_successions(
        &self,
        fact_opt: &FactOptional,
        container: &ContainerId,
        facts_to_ignore: &BTreeSet<FactOptional>,
    ) -> Successions {
        let mut res = Successions::default();
        let any_fluent = fact_opt
            .fact
            .fluent()
            .is_some_and(|f| f.is_any_value());
        if !any_fluent && facts_to_ignore.contains(fact_opt) {
            return res;
        }

        let index = if fact_opt.is_negated {
            &self.not_precondition_to_actions
        } else {
            &self.precondition_to_actions
        };
        for action_id in index.find(&fact_opt.fact) {
            if !container.is_action(&action_id) {
                res.actions.insert(action_id);
            }
        }

        for (set_id, set) in &self.set_of_events {
            let links = if fact_opt.is_negated {
                set.not_condition_to_events()
            } else {
                set.condition_to_events()
            };
            for event_id in links.find(&fact_opt.fact) {
                if !container.is_event(set_id, &event_id) {
                    res.events
                        .entry(set_id.clone())
                        .or_default()
                        .insert(event_id);
                }
            }
        }
        res
    }

    fn successions_of_wsm(
        &self,
        wsm: Option<&WorldStateModification>,
        container: &ContainerId,
        facts_to_ignore: &BTreeSet<FactOptional>,
    ) -> Vec<Successions> {
        let Some(wsm) = wsm else {
            return Vec::new();
        };
        let mut res = vec![Successions::default(); wsm.succession_slot_count()];
        wsm.for_each_succession_leaf(0, &mut |slot, fact_opt| {
            res[slot] = self.collect_successions(fact_opt, container, facts_to_ignore);
        });
        res
    }

    /// An effect fact without parameters that negates one of the other
    /// action's precondition facts makes the succession impossible.
    fn is_impossible_succession(
        effect_facts: &BTreeSet<FactOptional>,
        other_condition_facts: &BTreeSet<FactOptional>,
    ) -> bool {
        for effect in effect_facts {
            if effect.fact.has_a_param_to_fill(false) {
                continue;
            }
            for cond in other_condition_facts {
                if effect.is_negated != cond.is_negated && effect.fact == cond.fact {
                    return true;
                }
            }
        }
        false
    }

    /// Does succeeding with `other` after this effect have any interest.
    fn succession_has_an_interest(
        effect_facts: &BTreeSet<FactOptional>,
        other_condition_facts: &BTreeSet<FactOptional>,
        other_effect_facts: &BTreeSet<FactOptional>,
    ) -> bool {
        for effect in effect_facts {
            if effect.fact.has_a_param_to_fill(true) {
                return true;
            }

            if effect.fact.fluent().is_some_and(|f| f.is_any_value()) {
                for cond in other_condition_facts {
                    if effect.is_negated == cond.is_negated
                        && effect.fact.equal_except_any_values_and_fluent(
                            &cond.fact,
                            None,
                            None,
                            None,
                        )
                    {
                        return true;
                    }
                }
            }

            if !effect.fact.has_a_param_to_fill(false) {
                let mut contradicted = false;
                for cond in other_condition_facts {
                    if effect.is_negated != cond.is_negated && effect.fact == cond.fact {
                        contradicted = true;
                        break;
                    }
                }
                if contradicted {
                    continue;
                }
            }

            let mut has_an_interest = false;
            for other_effect in other_effect_facts {
                if !effect
                    .fact
                    .effect_of_successor_gives_an_interest(&other_effect.fact)
                {
                    has_an_interest = false;
                    break;
                }
                has_an_interest = true;
            }
            if has_an_interest {
                return true;
            }
        }
        false
    }

    /// Rebuild the full successor graph; called after every edit.
    fn update_successions(&mut self) {
        // Per-action static fact sets.
        let mut condition_facts: BTreeMap<ActionId, BTreeSet<FactOptional>> = BTreeMap::new();
        let mut effect_facts: BTreeMap<ActionId, BTreeSet<FactOptional>> = BTreeMap::new();
        for (id, action) in &self.actions {
            condition_facts.insert(id.clone(), action.precondition_facts());
            effect_facts.insert(id.clone(), action.effect.all_modifiable_facts());
        }

        // Per-leaf successor sets, computed read-only then written back.
        let mut action_caches: BTreeMap<ActionId, (Vec<Successions>, Vec<Successions>)> =
            BTreeMap::new();
        for (id, action) in &self.actions {
            let container = ContainerId::action(id);
            let ignore = &condition_facts[id];
            action_caches.insert(
                id.clone(),
                (
                    self.successions_of_wsm(action.effect.at_end.as_ref(), &container, ignore),
                    self.successions_of_wsm(
                        action.effect.potentially_at_end.as_ref(),
                        &container,
                        ignore,
                    ),
                ),
            );
        }
        let mut event_caches: BTreeMap<(SetOfEventsId, EventId), Vec<Successions>> =
            BTreeMap::new();
        for (set_id, set) in &self.set_of_events {
            for (event_id, event) in set.events() {
                let container = ContainerId::event(set_id, event_id);
                let ignore = event.precondition.all_opt_facts();
                event_caches.insert(
                    (set_id.clone(), event_id.clone()),
                    self.successions_of_wsm(event.effect.as_ref(), &container, &ignore),
                );
            }
        }

        for (id, (at_end, potential)) in action_caches {
            if let Some(action) = self.actions.get_mut(&id) {
                action.successions_at_end = at_end;
                action.successions_potential = potential;
            }
        }
        for ((set_id, event_id), successions) in event_caches {
            if let Some(set) = self.set_of_events.get_mut(&set_id) {
                if let Some(event) = set.events_mut().get_mut(&event_id) {
                    event.successions = successions;
                }
            }
        }

        // Successions without interest, pairwise over actions.
        let action_ids: Vec<ActionId> = self.actions.keys().cloned().collect();
        let mut without_interest: BTreeMap<ActionId, BTreeSet<ActionId>> = BTreeMap::new();
        for a in &action_ids {
            let mut no_interest = BTreeSet::new();
            for b in &action_ids {
                if a == b {
                    no_interest.insert(b.clone());
                    continue;
                }
                if Self::is_impossible_succession(&effect_facts[a], &condition_facts[b])
                    || !Self::succession_has_an_interest(
                        &effect_facts[a],
                        &condition_facts[b],
                        &effect_facts[b],
                    )
                {
                    no_interest.insert(b.clone());
                }
            }
            without_interest.insert(a.clone(), no_interest);
        }
        for (id, no_interest) in without_interest {
            if let Some(action) = self.actions.get_mut(&id) {
                for succ in &mut action.successions_at_end {
                    for excluded in &no_interest {
                        succ.actions.remove(excluded);
                    }
                }
                for succ in &mut action.successions_potential {
                    for excluded in &no_interest {
                        succ.actions.remove(excluded);
                    }
                }
                action.successions_without_interest = no_interest;
            }
        }
        debug!(actions = self.actions.len(), "successor graph rebuilt");
    }

    /// Can this effect leaf plausibly help the given objective leaf.
    fn effect_leaf_can_help(cond: &FactOptional, effect: &FactOptional) -> bool {
        if cond.fact.name() != effect.fact.name()
            || cond.fact.arguments().len() != effect.fact.arguments().len()
        {
            return false;
        }
        for (c, e) in cond.fact.arguments().iter().zip(effect.fact.arguments()) {
            if c != e && !c.is_param_to_fill() && !e.is_param_to_fill() {
                return false;
            }
        }
        if cond.is_negated == effect.is_negated {
            match (cond.fact.fluent(), effect.fact.fluent()) {
                (Some(c), Some(e)) => {
                    c == e
                        || c.is_param_to_fill()
                        || e.is_param_to_fill()
                        || cond.fact.is_fluent_negated()
                }
                _ => true,
            }
        } else {
            // Opposite polarity only helps through a fluent change.
            cond.fact.fluent().is_some() && effect.fact.fluent().is_some()
        }
    }

    /// Fill the predecessor caches of a goal: actions/events whose effect
    /// can directly serve the objective, closed backward over the successor
    /// graph.
    pub fn compute_goal_predecessors(&self, goal: &mut Goal) {
        let mut objective_leaves: Vec<FactOptional> = Vec::new();
        let _ = goal.objective().for_each_fact(
            &mut |fact_opt, _| {
                objective_leaves.push(fact_opt.clone());
                ControlFlow::Continue(())
            },
            false,
            false,
            false,
        );

        let mut direct: BTreeSet<String> = BTreeSet::new();
        let mut action_predecessors: BTreeSet<ActionId> = BTreeSet::new();
        let mut event_predecessors: BTreeSet<String> = BTreeSet::new();

        let wsm_can_help = |wsm: Option<&WorldStateModification>| -> bool {
            let Some(wsm) = wsm else {
                return false;
            };
            let mut found = false;
            wsm.for_each_succession_leaf(0, &mut |_, effect_leaf| {
                if !found {
                    found = objective_leaves
                        .iter()
                        .any(|cond| Self::effect_leaf_can_help(cond, effect_leaf));
                }
            });
            found
        };

        for (id, action) in &self.actions {
            if wsm_can_help(action.effect.at_end.as_ref())
                || wsm_can_help(action.effect.potentially_at_end.as_ref())
            {
                direct.insert(id.clone());
                action_predecessors.insert(id.clone());
            }
        }
        for (set_id, set) in &self.set_of_events {
            for (event_id, event) in set.events() {
                if wsm_can_help(event.effect.as_ref()) {
                    let full = crate::full_event_id(set_id, event_id);
                    direct.insert(full.clone());
                    event_predecessors.insert(full);
                }
            }
        }

        // Backward closure: anything whose successors reach the set.
        loop {
            let mut changed = false;
            for (id, action) in &self.actions {
                if action_predecessors.contains(id) {
                    continue;
                }
                let successions = action.all_successions();
                let reaches = successions
                    .actions
                    .iter()
                    .any(|succ| action_predecessors.contains(succ))
                    || successions.events.iter().any(|(set_id, events)| {
                        events.iter().any(|event_id| {
                            event_predecessors
                                .contains(&crate::full_event_id(set_id, event_id))
                        })
                    });
                if reaches {
                    action_predecessors.insert(id.clone());
                    changed = true;
                }
            }
            for (set_id, set) in &self.set_of_events {
                for (event_id, event) in set.events() {
                    let full = crate::full_event_id(set_id, event_id);
                    if event_predecessors.contains(&full) {
                        continue;
                    }
                    let successions = event.all_successions();
                    let reaches = successions
                        .actions
                        .iter()
                        .any(|succ| action_predecessors.contains(succ))
                        || successions.events.iter().any(|(sid, events)| {
                            events.iter().any(|eid| {
                                event_predecessors.contains(&crate::full_event_id(sid, eid))
                            })
                        });
                    if reaches {
                        event_predecessors.insert(full);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        goal.direct_predecessors = direct;
        goal.action_predecessors = action_predecessors;
        goal.event_predecessors = event_predecessors;
    }
}

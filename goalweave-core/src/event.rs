//! Reactive events: rules fired automatically when their precondition
//! becomes true.

use crate::condition::Condition;
use crate::domain::FactsToValue;
use crate::effect::{Successions, WorldStateModification};
use crate::goal::Goal;
use crate::ontology::Parameter;
use crate::EventId;
use std::collections::BTreeMap;
use std::ops::ControlFlow;

/// A reactive rule applied by the world state, not chosen by the agent.
#[derive(Debug, Clone)]
pub struct Event {
    pub parameters: Vec<Parameter>,
    pub precondition: Condition,
    pub effect: Option<WorldStateModification>,
    pub goals_to_add: BTreeMap<i32, Vec<Goal>>,
    /// Successor sets per effect leaf, maintained by the domain.
    pub(crate) successions: Vec<Successions>,
}

impl Event {
    pub fn new(precondition: Condition, effect: WorldStateModification) -> Self {
        Self {
            parameters: Vec::new(),
            precondition,
            effect: Some(effect),
            goals_to_add: BTreeMap::new(),
            successions: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_goals_to_add(mut self, goals_to_add: BTreeMap<i32, Vec<Goal>>) -> Self {
        self.goals_to_add = goals_to_add;
        self
    }

    /// Events without effect only enqueue goals.
    pub fn goals_only(precondition: Condition, goals_to_add: BTreeMap<i32, Vec<Goal>>) -> Self {
        Self {
            parameters: Vec::new(),
            precondition,
            effect: None,
            goals_to_add,
            successions: Vec::new(),
        }
    }

    pub fn successions(&self) -> &[Successions] {
        &self.successions
    }

    /// Union of the successor ids over every effect leaf.
    pub fn all_successions(&self) -> Successions {
        let mut res = Successions::default();
        for s in &self.successions {
            res.merge(s);
        }
        res
    }
}

/// Named container of events, with the precondition-pattern indexes used to
/// wake events on fact transitions.
#[derive(Debug, Clone, Default)]
pub struct SetOfEvents {
    events: BTreeMap<EventId, Event>,
    condition_to_events: FactsToValue,
    not_condition_to_events: FactsToValue,
}

impl SetOfEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_event(event: Event) -> Self {
        let mut res = Self::default();
        res.add(event, "event");
        res
    }

    /// Add an event under a unique id derived from `id_base`.
    pub fn add(&mut self, event: Event, id_base: &str) -> EventId {
        let mut id = id_base.to_string();
        let mut suffix = 1;
        while self.events.contains_key(&id) {
            suffix += 1;
            id = format!("{}_{}", id_base, suffix);
        }

        let _ = event.precondition.for_each_fact(
            &mut |fact_opt, ignore_fluent| {
                if fact_opt.is_negated {
                    self.not_condition_to_events
                        .add(fact_opt.fact.clone(), id.clone(), ignore_fluent);
                } else {
                    self.condition_to_events
                        .add(fact_opt.fact.clone(), id.clone(), ignore_fluent);
                }
                ControlFlow::Continue(())
            },
            false,
            false,
            false,
        );
        self.events.insert(id.clone(), event);
        id
    }

    /// Remove an event. Unknown ids are ignored.
    pub fn remove(&mut self, event_id: &str) {
        if self.events.remove(event_id).is_some() {
            self.condition_to_events.erase_value(event_id);
            self.not_condition_to_events.erase_value(event_id);
        }
    }

    pub fn events(&self) -> &BTreeMap<EventId, Event> {
        &self.events
    }

    pub(crate) fn events_mut(&mut self) -> &mut BTreeMap<EventId, Event> {
        &mut self.events
    }

    pub fn condition_to_events(&self) -> &FactsToValue {
        &self.condition_to_events
    }

    pub fn not_condition_to_events(&self) -> &FactsToValue {
        &self.not_condition_to_events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

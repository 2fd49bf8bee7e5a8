//! Core data model for the GoalWeave symbolic planner: ontology, facts,
//! condition/effect trees, the indexed world state and the planning domain.

pub mod action;
pub mod condition;
pub mod domain;
pub mod effect;
pub mod event;
pub mod fact;
pub mod goal;
pub mod goal_stack;
pub mod historical;
pub mod numeric;
pub mod observer;
pub mod ontology;
pub mod problem;
pub mod set_of_facts;
pub mod world_state;
pub mod world_state_cache;

pub use action::{Action, ActionEffect};
pub use condition::{Condition, ConditionOp};
pub use domain::{Domain, FactsToValue};
pub use effect::{Successions, WorldStateModification};
pub use event::{Event, SetOfEvents};
pub use fact::{apply_new_params, unfold_bindings, Bindings, Fact, FactOptional};
pub use goal::Goal;
pub use goal_stack::{GoalStack, PlanOutputInfos, PlannerStepType};
pub use historical::Historical;
pub use numeric::Number;
pub use observer::{ObserverBus, ObserverHandle};
pub use ontology::{
    Entity, Ontology, OntologyError, Parameter, Predicate, SetOfEntities, SetOfPredicates,
    SetOfTypes, TypeId, ANY_VALUE, NUMBER_TYPE,
};
pub use problem::Problem;
pub use set_of_facts::SetOfFacts;
pub use world_state::{ConditionToCallback, SetOfCallbacks, WhatChanged, WorldState};
pub use world_state_cache::{Reachability, WorldStateCache};

/// Identifier of an action inside a [`Domain`].
pub type ActionId = String;
/// Identifier of a set of events inside a [`Domain`].
pub type SetOfEventsId = String;
/// Identifier of an event inside a [`SetOfEvents`].
pub type EventId = String;
/// Identifier of an event qualified by its set: `"<set_id>|<event_id>"`.
pub type FullEventId = String;
/// Identifier of a condition-to-callback subscription.
pub type CallbackId = String;

/// Build the qualified id of an event.
pub fn full_event_id(set_id: &str, event_id: &str) -> FullEventId {
    format!("{}|{}", set_id, event_id)
}

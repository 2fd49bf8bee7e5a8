//! World-state properties: notification completeness, event propagation,
//! punctual facts and fluent replacement.

use goalweave_core::{
    Condition, ConditionOp, Entity, Event, Fact, FactOptional, GoalStack, Ontology, Parameter,
    Predicate, SetOfCallbacks, SetOfEvents, SetOfEventsId, WorldState, WorldStateModification,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

fn ontology() -> Ontology {
    let mut ontology = Ontology::default();
    ontology
        .predicates
        .add(Predicate::new("has_key", vec![], None));
    ontology
        .predicates
        .add(Predicate::new("door_open", vec![], None));
    ontology
        .predicates
        .add(Predicate::new("~punctual~ping", vec![], None));
    ontology.predicates.add(Predicate::new(
        "battery",
        vec![],
        Some(goalweave_core::NUMBER_TYPE),
    ));
    ontology
}

fn fact(ontology: &Ontology, name: &str) -> Fact {
    let predicate = ontology.predicates.get(name).unwrap().clone();
    Fact::new(predicate, vec![], None, false, &ontology.types, false).unwrap()
}

fn battery_fact(ontology: &Ontology, value: i64) -> Fact {
    let predicate = ontology.predicates.get("battery").unwrap().clone();
    Fact::new(
        predicate,
        vec![],
        Some(Entity::number(value)),
        false,
        &ontology.types,
        false,
    )
    .unwrap()
}

fn no_events() -> BTreeMap<SetOfEventsId, SetOfEvents> {
    BTreeMap::new()
}

#[test]
fn test_notification_completeness() {
    let ontology = ontology();
    let mut world = WorldState::new();
    let mut goal_stack = GoalStack::new();
    let callbacks = SetOfCallbacks::default();
    let events = no_events();

    let added = Rc::new(RefCell::new(BTreeSet::new()));
    let removed = Rc::new(RefCell::new(BTreeSet::new()));
    let added_in = added.clone();
    let removed_in = removed.clone();
    world
        .on_facts_added
        .subscribe(move |facts: &BTreeSet<Fact>| {
            added_in.borrow_mut().extend(facts.iter().cloned());
        });
    world
        .on_facts_removed
        .subscribe(move |facts: &BTreeSet<Fact>| {
            removed_in.borrow_mut().extend(facts.iter().cloned());
        });

    let key = fact(&ontology, "has_key");
    world.add_fact(
        key.clone(),
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );
    assert!(added.borrow().contains(&key));
    assert!(world.has_fact(&key));

    world.remove_fact(
        &key,
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
    );
    assert!(removed.borrow().contains(&key));
    assert!(!world.has_fact(&key));
}

#[test]
fn test_punctual_facts_pulse_without_persisting() {
    let ontology = ontology();
    let mut world = WorldState::new();
    let mut goal_stack = GoalStack::new();
    let callbacks = SetOfCallbacks::default();
    let events = no_events();

    let punctual_seen = Rc::new(RefCell::new(0usize));
    let added_seen = Rc::new(RefCell::new(0usize));
    let punctual_in = punctual_seen.clone();
    let added_in = added_seen.clone();
    world
        .on_punctual_facts
        .subscribe(move |facts: &BTreeSet<Fact>| {
            *punctual_in.borrow_mut() += facts.len();
        });
    world
        .on_facts_added
        .subscribe(move |facts: &BTreeSet<Fact>| {
            *added_in.borrow_mut() += facts.len();
        });

    let ping = fact(&ontology, "~punctual~ping");
    world.add_fact(
        ping.clone(),
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );
    assert_eq!(*punctual_seen.borrow(), 1);
    assert_eq!(*added_seen.borrow(), 0);
    assert!(!world.has_fact(&ping));
}

#[test]
fn test_fluent_replacement_keeps_one_value_per_tuple() {
    let ontology = ontology();
    let mut world = WorldState::new();
    let mut goal_stack = GoalStack::new();
    let callbacks = SetOfCallbacks::default();
    let events = no_events();

    world.add_fact(
        battery_fact(&ontology, 0),
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );
    world.add_fact(
        battery_fact(&ontology, 100),
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );

    assert_eq!(world.facts().len(), 1);
    assert!(world.has_fact(&battery_fact(&ontology, 100)));
    assert!(!world.has_fact(&battery_fact(&ontology, 0)));
}

fn door_event(ontology: &Ontology) -> Event {
    // has_key and not door_open => door_open
    let precondition = Condition::node(
        ConditionOp::And,
        Condition::fact(fact(ontology, "has_key")),
        Condition::Fact(FactOptional::negated(fact(ontology, "door_open"))),
    );
    Event::new(
        precondition,
        WorldStateModification::fact(fact(ontology, "door_open")),
    )
}

#[test]
fn test_event_fires_on_fact_addition() {
    let ontology = ontology();
    let mut world = WorldState::new();
    let mut goal_stack = GoalStack::new();
    let callbacks = SetOfCallbacks::default();
    let mut events = BTreeMap::new();
    events.insert(
        "soe".to_string(),
        SetOfEvents::from_event(door_event(&ontology)),
    );

    world.add_fact(
        fact(&ontology, "has_key"),
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );
    assert!(world.has_fact(&fact(&ontology, "door_open")));
}

#[test]
fn test_event_applies_once_per_round() {
    let ontology = ontology();
    let mut world = WorldState::new();
    let mut goal_stack = GoalStack::new();
    let callbacks = SetOfCallbacks::default();
    let mut events = BTreeMap::new();
    events.insert(
        "soe".to_string(),
        SetOfEvents::from_event(door_event(&ontology)),
    );

    let added_rounds = Rc::new(RefCell::new(Vec::new()));
    let added_in = added_rounds.clone();
    world
        .on_facts_added
        .subscribe(move |facts: &BTreeSet<Fact>| {
            added_in.borrow_mut().push(facts.len());
        });

    // Both facts in one batch: the event precondition flips as the batch is
    // applied but the event may only run once in the round.
    world.add_facts(
        vec![fact(&ontology, "has_key")],
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );
    world.add_facts(
        vec![fact(&ontology, "has_key")],
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );
    assert_eq!(world.facts().len(), 2);
    // One notification for the first batch (has_key + door_open together).
    assert_eq!(added_rounds.borrow().len(), 1);
    assert_eq!(added_rounds.borrow()[0], 2);
}

#[test]
fn test_condition_callback_fires_when_condition_becomes_true() {
    let ontology = ontology();
    let mut world = WorldState::new();
    let mut goal_stack = GoalStack::new();
    let events = no_events();

    let fired = Rc::new(RefCell::new(0usize));
    let fired_in = fired.clone();
    let mut callbacks = SetOfCallbacks::default();
    callbacks.add(
        goalweave_core::ConditionToCallback {
            parameters: Vec::new(),
            condition: Condition::fact(fact(&ontology, "has_key")),
            callback: Box::new(move || {
                *fired_in.borrow_mut() += 1;
            }),
        },
        "on_key",
    );

    world.add_fact(
        fact(&ontology, "door_open"),
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );
    assert_eq!(*fired.borrow(), 0);

    world.add_fact(
        fact(&ontology, "has_key"),
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );
    assert_eq!(*fired.borrow(), 1);
}

#[test]
fn test_event_with_parameters_instantiates_per_binding() {
    let mut ontology = Ontology::default();
    let location = ontology.types.add("location", None);
    ontology.predicates.add(Predicate::new(
        "dirty",
        vec![Parameter::new("?l", Some(location))],
        None,
    ));
    ontology.predicates.add(Predicate::new(
        "needs_cleaning",
        vec![Parameter::new("?l", Some(location))],
        None,
    ));
    ontology.predicates.add(Predicate::new("alarm", vec![], None));

    let dirty_pattern = Fact::new(
        ontology.predicates.get("dirty").unwrap().clone(),
        vec![Entity::new("?l", Some(location))],
        None,
        false,
        &ontology.types,
        false,
    )
    .unwrap();
    let needs_pattern = Fact::new(
        ontology.predicates.get("needs_cleaning").unwrap().clone(),
        vec![Entity::new("?l", Some(location))],
        None,
        false,
        &ontology.types,
        false,
    )
    .unwrap();

    let event = Event::new(
        Condition::fact(dirty_pattern),
        WorldStateModification::fact(needs_pattern),
    )
    .with_parameters(vec![Parameter::new("?l", Some(location))]);
    let mut events = BTreeMap::new();
    events.insert("soe".to_string(), SetOfEvents::from_event(event));

    let mut world = WorldState::new();
    let mut goal_stack = GoalStack::new();
    let callbacks = SetOfCallbacks::default();
    let kitchen_dirty = Fact::new(
        ontology.predicates.get("dirty").unwrap().clone(),
        vec![Entity::new("kitchen", Some(location))],
        None,
        false,
        &ontology.types,
        false,
    )
    .unwrap();
    world.add_fact(
        kitchen_dirty,
        &mut goal_stack,
        &events,
        &callbacks,
        &ontology.types,
        None,
        true,
    );

    let needs_kitchen = Fact::new(
        ontology.predicates.get("needs_cleaning").unwrap().clone(),
        vec![Entity::new("kitchen", Some(location))],
        None,
        false,
        &ontology.types,
        false,
    )
    .unwrap();
    assert!(world.has_fact(&needs_kitchen));
}

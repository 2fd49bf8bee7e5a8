//! End-to-end planning scenarios: single actions, fluent assignment,
//! regression chains, priorities, events and parallelization.

use goalweave_core::{
    Action, ActionEffect, Condition, ConditionOp, Domain, Entity, Event, Fact, FactOptional,
    Goal, Number, Ontology, Parameter, Predicate, Problem, SetOfEvents, WorldStateModification,
    NUMBER_TYPE,
};
use goalweave_planner::{
    actions_to_do_in_parallel_now, parallel_plan_for_every_goals, plan_for_every_goals,
    plan_to_str,
};

fn zero_arity_fact(ontology: &Ontology, name: &str) -> Fact {
    let predicate = ontology.predicates.get(name).unwrap().clone();
    Fact::new(predicate, vec![], None, false, &ontology.types, false).unwrap()
}

fn push_goal(problem: &mut Problem, domain: &Domain, goal: Goal, priority: i32) {
    let types = &domain.ontology().types;
    let Problem {
        world_state,
        goal_stack,
        ..
    } = problem;
    goal_stack.push_goal(goal, priority, world_state, types, None);
}

// ===== S1: single goal, single action =====

#[test]
fn test_single_goal_single_action() {
    let mut ontology = Ontology::default();
    let object = ontology.types.add("object", None);
    ontology.predicates.add(Predicate::new(
        "at",
        vec![Parameter::new("?o", Some(object))],
        None,
    ));
    ontology.constants.add(Entity::new("charger", Some(object)));

    let at_param = Fact::new(
        ontology.predicates.get("at").unwrap().clone(),
        vec![Entity::new("?o", Some(object))],
        None,
        false,
        &ontology.types,
        false,
    )
    .unwrap();
    let goto = Action::new(None, ActionEffect::new(WorldStateModification::fact(at_param)))
        .with_parameters(vec![Parameter::new("?o", Some(object))]);

    let mut domain = Domain::new("travel", ontology);
    domain.add_action("goto", goto);

    let at_charger = Fact::new(
        domain.ontology().predicates.get("at").unwrap().clone(),
        vec![Entity::new("charger", Some(object))],
        None,
        false,
        &domain.ontology().types,
        false,
    )
    .unwrap();
    let mut problem = Problem::for_domain("p1", &domain);
    push_goal(
        &mut problem,
        &domain,
        Goal::new(Condition::fact(at_charger.clone())),
        Goal::DEFAULT_PRIORITY,
    );

    let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].invocation.action_id, "goto");
    assert_eq!(
        plan[0]
            .invocation
            .parameters
            .values()
            .map(|e| e.value.as_str())
            .collect::<Vec<_>>(),
        vec!["charger"]
    );
    assert!(problem.world_state.has_fact(&at_charger));
    assert!(problem.goal_stack.is_empty());
}

// ===== S2: fluent assignment =====

fn battery_domain() -> Domain {
    let mut ontology = Ontology::default();
    ontology
        .predicates
        .add(Predicate::new("battery", vec![], Some(NUMBER_TYPE)));
    let battery_slot = Fact::new(
        ontology.predicates.get("battery").unwrap().clone(),
        vec![],
        None,
        false,
        &ontology.types,
        true,
    )
    .unwrap();
    let charge = Action::new(
        None,
        ActionEffect::new(WorldStateModification::Assign(
            Box::new(WorldStateModification::Fact(FactOptional::new(battery_slot))),
            Box::new(WorldStateModification::Number(Number::Int(100))),
        )),
    );
    let mut domain = Domain::new("power", ontology);
    domain.add_action("charge", charge);
    domain
}

#[test]
fn test_fluent_assignment() {
    let domain = battery_domain();
    let types = &domain.ontology().types;
    let battery_predicate = domain.ontology().predicates.get("battery").unwrap().clone();
    let battery_0 = Fact::new(
        battery_predicate.clone(),
        vec![],
        Some(Entity::number(0)),
        false,
        types,
        false,
    )
    .unwrap();

    let mut problem = Problem::for_domain("p2", &domain);
    {
        let Problem {
            world_state,
            goal_stack,
            ..
        } = &mut problem;
        world_state.add_fact(
            battery_0,
            goal_stack,
            domain.set_of_events(),
            &goalweave_core::SetOfCallbacks::default(),
            types,
            None,
            true,
        );
    }

    let battery_slot = Fact::new(battery_predicate.clone(), vec![], None, false, types, true)
        .unwrap();
    let objective = Condition::node(
        ConditionOp::SuperiorOrEqual,
        Condition::fact(battery_slot),
        Condition::Number(Number::Int(50)),
    );
    push_goal(
        &mut problem,
        &domain,
        Goal::new(objective),
        Goal::DEFAULT_PRIORITY,
    );

    let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
    assert_eq!(plan_to_str(&plan, ", "), "charge");

    let battery_100 = Fact::new(
        battery_predicate,
        vec![],
        Some(Entity::number(100)),
        false,
        types,
        false,
    )
    .unwrap();
    assert!(problem.world_state.has_fact(&battery_100));
}

// ===== S3: regression chain =====

fn door_ontology() -> Ontology {
    let mut ontology = Ontology::default();
    ontology
        .predicates
        .add(Predicate::new("has_key", vec![], None));
    ontology
        .predicates
        .add(Predicate::new("door_open", vec![], None));
    ontology
        .predicates
        .add(Predicate::new("light_on", vec![], None));
    ontology
}

fn door_actions(domain: &mut Domain) {
    let ontology = domain.ontology().clone();
    let pick_key = Action::new(
        None,
        ActionEffect::new(WorldStateModification::fact(zero_arity_fact(
            &ontology, "has_key",
        ))),
    );
    let open = Action::new(
        Some(Condition::fact(zero_arity_fact(&ontology, "has_key"))),
        ActionEffect::new(WorldStateModification::fact(zero_arity_fact(
            &ontology,
            "door_open",
        ))),
    );
    domain.add_action("pick_key", pick_key);
    domain.add_action("open", open);
}

#[test]
fn test_regression_chain() {
    let mut domain = Domain::new("doors", door_ontology());
    door_actions(&mut domain);

    let mut problem = Problem::for_domain("p3", &domain);
    push_goal(
        &mut problem,
        &domain,
        Goal::new(Condition::fact(zero_arity_fact(
            domain.ontology(),
            "door_open",
        ))),
        Goal::DEFAULT_PRIORITY,
    );

    let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
    assert_eq!(plan_to_str(&plan, ", "), "pick_key, open");
    assert!(problem.goal_stack.is_empty());
}

// ===== S4: priority order =====

#[test]
fn test_priority_order() {
    let mut domain = Domain::new("doors", door_ontology());
    door_actions(&mut domain);
    let toggle_light = Action::new(
        None,
        ActionEffect::new(WorldStateModification::fact(zero_arity_fact(
            domain.ontology(),
            "light_on",
        ))),
    );
    domain.add_action("toggle_light", toggle_light);

    let mut problem = Problem::for_domain("p4", &domain);
    push_goal(
        &mut problem,
        &domain,
        Goal::new(Condition::fact(zero_arity_fact(
            domain.ontology(),
            "light_on",
        ))),
        2,
    );
    push_goal(
        &mut problem,
        &domain,
        Goal::new(Condition::fact(zero_arity_fact(
            domain.ontology(),
            "door_open",
        ))),
        1,
    );

    let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
    assert_eq!(plan_to_str(&plan, ", "), "toggle_light, pick_key, open");
}

// ===== S5: event fires during notify =====

#[test]
fn test_event_completes_the_goal() {
    let mut domain = Domain::new("doors", door_ontology());
    let pick_key = Action::new(
        None,
        ActionEffect::new(WorldStateModification::fact(zero_arity_fact(
            domain.ontology(),
            "has_key",
        ))),
    );
    domain.add_action("pick_key", pick_key);

    let precondition = Condition::node(
        ConditionOp::And,
        Condition::fact(zero_arity_fact(domain.ontology(), "has_key")),
        Condition::Fact(FactOptional::negated(zero_arity_fact(
            domain.ontology(),
            "door_open",
        ))),
    );
    let event = Event::new(
        precondition,
        WorldStateModification::fact(zero_arity_fact(domain.ontology(), "door_open")),
    );
    domain.add_set_of_events(SetOfEvents::from_event(event), "soe");

    let mut problem = Problem::for_domain("p5", &domain);
    push_goal(
        &mut problem,
        &domain,
        Goal::new(Condition::fact(zero_arity_fact(
            domain.ontology(),
            "door_open",
        ))),
        Goal::DEFAULT_PRIORITY,
    );

    let parallel_now = actions_to_do_in_parallel_now(&mut problem, &domain, None, None);
    assert_eq!(parallel_now.actions.len(), 1);
    assert_eq!(parallel_now.actions[0].invocation.action_id, "pick_key");

    // Applying the action fires the event during notification.
    let callbacks = goalweave_core::SetOfCallbacks::default();
    goalweave_planner::notify_action_done(
        &mut problem,
        &domain,
        &callbacks,
        &parallel_now.actions[0],
        None,
        None,
    );
    assert!(problem
        .world_state
        .has_fact(&zero_arity_fact(domain.ontology(), "door_open")));
}

// ===== S6: parallelization of independent actions =====

#[test]
fn test_independent_actions_run_in_parallel() {
    let mut ontology = Ontology::default();
    let object = ontology.types.add("object", None);
    ontology.predicates.add(Predicate::new(
        "at",
        vec![Parameter::new("?o", Some(object))],
        None,
    ));
    ontology.constants.add(Entity::new("a", Some(object)));
    ontology.constants.add(Entity::new("b", Some(object)));

    let at_param = Fact::new(
        ontology.predicates.get("at").unwrap().clone(),
        vec![Entity::new("?o", Some(object))],
        None,
        false,
        &ontology.types,
        false,
    )
    .unwrap();
    let goto = Action::new(None, ActionEffect::new(WorldStateModification::fact(at_param)))
        .with_parameters(vec![Parameter::new("?o", Some(object))]);
    let mut domain = Domain::new("travel", ontology);
    domain.add_action("goto", goto);

    let at = |name: &str| {
        Fact::new(
            domain.ontology().predicates.get("at").unwrap().clone(),
            vec![Entity::new(name, Some(object))],
            None,
            false,
            &domain.ontology().types,
            false,
        )
        .unwrap()
    };
    let mut problem = Problem::for_domain("p6", &domain);
    push_goal(&mut problem, &domain, Goal::new(Condition::fact(at("a"))), 2);
    push_goal(&mut problem, &domain, Goal::new(Condition::fact(at("b"))), 1);

    let parallel_plan = parallel_plan_for_every_goals(&mut problem, &domain, None, None);
    assert_eq!(parallel_plan.cost(), 1);
    assert_eq!(parallel_plan.steps[0].actions.len(), 2);
    let mut action_ids: Vec<String> = parallel_plan.steps[0]
        .actions
        .iter()
        .map(|a| a.invocation.to_string())
        .collect();
    action_ids.sort();
    assert_eq!(action_ids, vec!["goto(?o -> a)", "goto(?o -> b)"]);
}

// ===== Termination and prioritization properties =====

#[test]
fn test_unreachable_goal_returns_empty_plan() {
    let mut domain = Domain::new("doors", door_ontology());
    // Only the opener exists: has_key can never be obtained.
    let open = Action::new(
        Some(Condition::fact(zero_arity_fact(domain.ontology(), "has_key"))),
        ActionEffect::new(WorldStateModification::fact(zero_arity_fact(
            domain.ontology(),
            "door_open",
        ))),
    );
    domain.add_action("open", open);

    let mut problem = Problem::for_domain("p7", &domain);
    push_goal(
        &mut problem,
        &domain,
        Goal::new(Condition::fact(zero_arity_fact(
            domain.ontology(),
            "door_open",
        ))),
        Goal::DEFAULT_PRIORITY,
    );

    let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
    assert!(plan.is_empty());
    // The goal stays on the stack: failing to plan does not drop it.
    assert!(!problem.goal_stack.is_empty());
}

#[test]
fn test_persistent_goal_survives_satisfaction() {
    let mut domain = Domain::new("doors", door_ontology());
    door_actions(&mut domain);

    let mut problem = Problem::for_domain("p8", &domain);
    push_goal(
        &mut problem,
        &domain,
        Goal::new(Condition::fact(zero_arity_fact(
            domain.ontology(),
            "door_open",
        )))
        .persistent(),
        Goal::DEFAULT_PRIORITY,
    );

    let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
    assert_eq!(plan_to_str(&plan, ", "), "pick_key, open");
    // Satisfied but persistent: still stacked.
    assert!(!problem.goal_stack.is_empty());
}

#[test]
fn test_one_step_towards_stops_after_one_action() {
    let mut domain = Domain::new("doors", door_ontology());
    door_actions(&mut domain);

    let mut problem = Problem::for_domain("p10", &domain);
    push_goal(
        &mut problem,
        &domain,
        Goal::new(Condition::fact(zero_arity_fact(
            domain.ontology(),
            "door_open",
        )))
        .one_step_towards(),
        Goal::DEFAULT_PRIORITY,
    );

    let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
    // Strict progress only: the first action of the chain, then the goal is
    // dropped.
    assert_eq!(plan_to_str(&plan, ", "), "pick_key");
    assert!(problem.goal_stack.is_empty());
    assert!(!problem
        .world_state
        .has_fact(&zero_arity_fact(domain.ontology(), "door_open")));
}

#[test]
fn test_history_breaks_ties_toward_less_used_actions() {
    let mut ontology = Ontology::default();
    ontology.predicates.add(Predicate::new("done", vec![], None));
    let done_fact = zero_arity_fact(&ontology, "done");
    let alpha = Action::new(
        None,
        ActionEffect::new(WorldStateModification::fact(done_fact.clone())),
    );
    let beta = alpha.clone();
    let mut domain = Domain::new("ties", ontology);
    domain.add_action("alpha", alpha);
    domain.add_action("beta", beta);

    let mut problem = Problem::for_domain("p9", &domain);
    problem.historical.notify_action_done("alpha");
    push_goal(
        &mut problem,
        &domain,
        Goal::new(Condition::fact(done_fact)),
        Goal::DEFAULT_PRIORITY,
    );

    let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
    assert_eq!(plan_to_str(&plan, ", "), "beta");
}

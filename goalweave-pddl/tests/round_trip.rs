//! PDDL surface tests: parsing the accepted dialect, error reporting and
//! the serialize/parse round trip.

use goalweave_core::{Condition, Goal};
use goalweave_pddl::{
    domain_to_pddl, pddl_to_domain, pddl_to_problem, problem_to_pddl, PddlError,
};
use std::collections::BTreeMap;

const DOMAIN: &str = r#"
(define
    (domain rescue)
    (:requirements :strips :typing)

    (:types
        location
        robot
    )

    (:constants
        base - location
    )

    (:predicates
        (at ?r - robot ?l - location)
        (has_key ?r - robot)
        (door_open)
    )

    (:functions
        (battery ?r - robot)
    )

    (:timeless
        (door_open)
    )

    (:event auto_close
        :parameters
            (?r - robot)
        :precondition
            (at ?r base)
        :effect
            (not (has_key ?r))
    )

    (:durative-action goto
        :parameters
            (?r - robot ?l - location)

        :duration (= ?duration 2)

        :condition
            (and
                (at start (> (battery ?r) 10))
            )

        :effect
            (and
                (at start (decrease (battery ?r) 5))
                (at end (at ?r ?l))
                (at end (has_key ?r)) ;; __POTENTIALLY
            )
    )

    (:action grab_key
        :parameters (?r - robot)
        :precondition (at ?r base)
        :effect (has_key ?r)
    )
)
"#;

const PROBLEM: &str = r#"
(define
    (problem deliver)
    (:domain rescue)

    (:objects
        r1 - robot
        cellar - location
    )

    (:init
        (at r1 base)
        (= (battery r1) 40)
    )

    (:goal
        (and ;; __PRIORITIZED
            (persist (at r1 cellar))
            (has_key r1)
        )
    )
)
"#;

fn loaded_domains() -> BTreeMap<String, goalweave_core::Domain> {
    let domain = pddl_to_domain(DOMAIN, &BTreeMap::new()).expect("domain parses");
    let mut res = BTreeMap::new();
    res.insert(domain.name().to_string(), domain);
    res
}

#[test]
fn test_domain_parses() -> anyhow::Result<()> {
    let domain = pddl_to_domain(DOMAIN, &BTreeMap::new())?;
    assert_eq!(domain.name(), "rescue");
    assert_eq!(domain.actions().len(), 2);
    assert!(domain.ontology().predicates.get("battery").is_some());
    assert_eq!(domain.timeless_facts().len(), 1);

    let goto = domain.action("goto").unwrap();
    assert_eq!(goto.duration, 2);
    assert!(goto.precondition.is_some());
    assert!(goto.effect.at_start.is_some());
    assert!(goto.effect.at_end.is_some());
    assert!(goto.effect.potentially_at_end.is_some());

    let events = domain
        .set_of_events()
        .get(goalweave_core::Domain::CONSTRUCTOR_EVENTS_ID)
        .unwrap();
    assert!(events.events().contains_key("auto_close"));
    Ok(())
}

#[test]
fn test_problem_parses_with_prioritized_goals() {
    let domains = loaded_domains();
    let (domain, problem) = pddl_to_problem(PROBLEM, &domains).unwrap();
    assert_eq!(problem.name, "deliver");
    assert_eq!(problem.objects.len(), 2);

    let goals: Vec<(i32, &Goal)> = problem.goal_stack.flattened();
    assert_eq!(goals.len(), 2);
    // Highest priority first, and the persist wrapper was honored.
    assert!(goals[0].0 > goals[1].0);
    assert!(goals[0].1.is_persistent());
    assert!(!goals[1].1.is_persistent());

    // Timeless facts are pinned in the world.
    let door_open = goalweave_core::Fact::new(
        domain.ontology().predicates.get("door_open").unwrap().clone(),
        vec![],
        None,
        false,
        &domain.ontology().types,
        false,
    )
    .unwrap();
    assert!(problem.world_state.has_fact(&door_open));
}

#[test]
fn test_domain_round_trip() {
    let domain = pddl_to_domain(DOMAIN, &BTreeMap::new()).unwrap();
    let serialized = domain_to_pddl(&domain);
    let reparsed = pddl_to_domain(&serialized, &BTreeMap::new())
        .unwrap_or_else(|e| panic!("reparse failed: {}\n{}", e, serialized));
    // Stable fixpoint: serializing the reparsed domain reproduces the text.
    assert_eq!(domain_to_pddl(&reparsed), serialized);
    assert_eq!(reparsed.actions().len(), domain.actions().len());
    assert_eq!(
        reparsed.action("goto").unwrap().duration,
        domain.action("goto").unwrap().duration
    );
    assert!(reparsed.action("goto").unwrap().effect.potentially_at_end.is_some());
}

#[test]
fn test_problem_round_trip() {
    let domains = loaded_domains();
    let (domain, problem) = pddl_to_problem(PROBLEM, &domains).unwrap();
    let serialized = problem_to_pddl(&problem, &domain);
    let (_, reparsed) = pddl_to_problem(&serialized, &domains)
        .unwrap_or_else(|e| panic!("reparse failed: {}\n{}", e, serialized));
    assert_eq!(problem_to_pddl(&reparsed, &domain), serialized);
    assert_eq!(
        reparsed.goal_stack.flattened().len(),
        problem.goal_stack.flattened().len()
    );
    assert_eq!(reparsed.world_state.facts().len(), problem.world_state.facts().len());
}

#[test]
fn test_sometime_after_constraints_order_goals() {
    let domains = loaded_domains();
    let text = r#"
(define
    (problem ordered)
    (:domain rescue)
    (:objects
        r1 - robot
        cellar - location
    )
    (:init
        (at r1 base)
    )
    (:goal
        (and ;; __PRIORITIZED
            (at r1 cellar)
            (has_key r1)
        )
    )
    (:constraints
        (and
            (preference p0 (sometime-after (has_key r1) (at r1 cellar)))
        )
    )
)
"#;
    let (_, problem) = pddl_to_problem(text, &domains).unwrap();
    let goals = problem.goal_stack.flattened();
    // The constraint reorders: has_key must be achieved before at(r1, cellar).
    assert_eq!(goals[0].1.objective().to_string(), "has_key(r1)");
}

#[test]
fn test_parse_error_pinpoints_location() {
    let err = pddl_to_domain("(define (domain d) (:action", &BTreeMap::new()).unwrap_err();
    match err {
        PddlError::Parse { message, .. } => {
            assert!(message.contains("unbalanced") || message.contains("unexpected"));
        }
        other => panic!("expected a parse error, got {other:?}"),
    }

    let err = pddl_to_domain(
        "(define (domain d) (:predicates (p)) (:wrong))",
        &BTreeMap::new(),
    )
    .unwrap_err();
    assert!(err.to_string().contains(":wrong"));
}

#[test]
fn test_unknown_predicate_is_an_ontology_error() {
    let err = pddl_to_domain(
        "(define (domain d) (:action a :effect (mystery)))",
        &BTreeMap::new(),
    )
    .unwrap_err();
    assert!(matches!(err, PddlError::Ontology(_)));
}

#[test]
fn test_undefined_fluent_maps_to_negated_any_value() {
    let domain = pddl_to_domain(DOMAIN, &BTreeMap::new()).unwrap();
    let condition = goalweave_pddl::pddl_to_condition(
        "(= (battery r1) undefined)",
        domain.ontology(),
        &{
            let mut objects = goalweave_core::SetOfEntities::default();
            objects.add(goalweave_core::Entity::new(
                "r1",
                domain.ontology().types.get("robot"),
            ));
            objects
        },
        &[],
    )
    .unwrap();
    match condition {
        Condition::Fact(fact_opt) => {
            assert!(fact_opt.is_negated);
            assert!(fact_opt.fact.fluent().unwrap().is_any_value());
        }
        other => panic!("expected a fact condition, got {other:?}"),
    }
}

//! Planning driven end-to-end through the PDDL surface.

use goalweave_planner::{plan_for_every_goals, plan_to_pddl, plan_to_str};
use std::collections::BTreeMap;

const DOMAIN: &str = r#"
(define
    (domain doors)
    (:predicates
        (has_key)
        (door_open)
    )

    (:action pick_key
        :effect (has_key)
    )

    (:action open
        :precondition (has_key)
        :effect (door_open)
    )
)
"#;

const PROBLEM: &str = r#"
(define
    (problem escape)
    (:domain doors)
    (:goal
        (door_open)
    )
)
"#;

#[test]
fn test_plan_from_parsed_pddl() {
    let domain = goalweave_pddl::pddl_to_domain(DOMAIN, &BTreeMap::new()).unwrap();
    let mut domains = BTreeMap::new();
    domains.insert(domain.name().to_string(), domain);
    let (domain, mut problem) = goalweave_pddl::pddl_to_problem(PROBLEM, &domains).unwrap();

    let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
    assert_eq!(plan_to_str(&plan, ", "), "pick_key, open");
    assert_eq!(plan_to_pddl(&plan, &domain), "00: (pick_key) [1]\n01: (open) [1]\n");
    assert!(problem.goal_stack.is_empty());
}

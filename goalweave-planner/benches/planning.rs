//! Planning benchmarks: regression chains and multi-goal stacks.

use criterion::{criterion_group, criterion_main, Criterion};
use goalweave_core::{
    Action, ActionEffect, Condition, Domain, Fact, Goal, Ontology, Predicate, Problem,
    WorldStateModification,
};
use goalweave_planner::plan_for_every_goals;

fn chain_domain(length: usize) -> (Domain, Fact) {
    let mut ontology = Ontology::default();
    for i in 0..=length {
        ontology
            .predicates
            .add(Predicate::new(format!("step_{}", i), vec![], None));
    }
    let fact = |ontology: &Ontology, i: usize| {
        Fact::new(
            ontology.predicates.get(&format!("step_{}", i)).unwrap().clone(),
            vec![],
            None,
            false,
            &ontology.types,
            false,
        )
        .unwrap()
    };
    let last = fact(&ontology, length);
    let mut domain = Domain::new("chain", ontology);
    for i in 0..length {
        let precondition = if i == 0 {
            None
        } else {
            Some(Condition::fact(fact(domain.ontology(), i)))
        };
        let action = Action::new(
            precondition,
            ActionEffect::new(WorldStateModification::fact(fact(
                domain.ontology(),
                i + 1,
            ))),
        );
        domain.add_action(format!("advance_{}", i), action);
    }
    (domain, last)
}

fn bench_regression_chain(c: &mut Criterion) {
    let (domain, last) = chain_domain(6);
    c.bench_function("plan_chain_of_6", |b| {
        b.iter(|| {
            let mut problem = Problem::for_domain("bench", &domain);
            let types = &domain.ontology().types;
            let Problem {
                world_state,
                goal_stack,
                ..
            } = &mut problem;
            goal_stack.push_goal(
                Goal::new(Condition::fact(last.clone())),
                Goal::DEFAULT_PRIORITY,
                world_state,
                types,
                None,
            );
            let plan = plan_for_every_goals(&mut problem, &domain, None, None, None);
            assert_eq!(plan.len(), 6);
            plan
        })
    });
}

criterion_group!(benches, bench_regression_chain);
criterion_main!(benches);

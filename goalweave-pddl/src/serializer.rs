//! PDDL writer: reproduces the accepted dialect with four-space
//! indentation and flattened `and` clauses.

use goalweave_core::{
    Condition, ConditionOp, Domain, Fact, FactOptional, Goal, Parameter, Problem, SetOfTypes,
    WorldStateModification,
};

const INDENT: usize = 4;

fn pad(indentation: usize) -> String {
    " ".repeat(indentation)
}

fn parameters_to_pddl(parameters: &[Parameter], types: &SetOfTypes) -> String {
    let mut res = String::from("(");
    for (i, parameter) in parameters.iter().enumerate() {
        if i > 0 {
            res.push(' ');
        }
        res.push_str(&parameter.name);
        if let Some(ty) = parameter.ty {
            res.push_str(" - ");
            res.push_str(types.name(ty));
        }
    }
    res.push(')');
    res
}

fn fact_call_to_pddl(fact: &Fact) -> String {
    let mut res = format!("({}", fact.name());
    for argument in fact.arguments() {
        res.push(' ');
        res.push_str(&argument.value);
    }
    res.push(')');
    res
}

/// A fact with its fluent, in condition/init form `(= (f args) v)`.
fn fact_to_pddl(fact_opt: &FactOptional, in_effect_context: bool) -> String {
    let fact = &fact_opt.fact;
    let assign_word = if in_effect_context { "assign" } else { "=" };
    if let Some(fluent) = fact.fluent() {
        if fact_opt.is_negated && fluent.is_any_value() {
            return format!("({} {} undefined)", assign_word, fact_call_to_pddl(fact));
        }
        if fluent.is_any_value() {
            // A not-yet-known value: print the bare call.
            return fact_call_to_pddl(fact);
        }
        let core = format!("({} {} {})", assign_word, fact_call_to_pddl(fact), fluent.value);
        if fact_opt.is_negated || fact.is_fluent_negated() {
            return format!("(not {})", core);
        }
        return core;
    }
    if fact_opt.is_negated {
        format!("(not {})", fact_call_to_pddl(fact))
    } else {
        fact_call_to_pddl(fact)
    }
}

fn flatten_conditions<'c>(condition: &'c Condition, out: &mut Vec<&'c Condition>) {
    match condition {
        Condition::Node {
            op: ConditionOp::And,
            left,
            right,
        } => {
            flatten_conditions(left, out);
            flatten_conditions(right, out);
        }
        other => out.push(other),
    }
}

pub fn condition_to_pddl(condition: &Condition, indentation: usize, types: &SetOfTypes) -> String {
    match condition {
        Condition::Fact(fact_opt) => fact_to_pddl(fact_opt, false),
        Condition::Number(nb) => nb.to_string(),
        Condition::Node { op, left, right } => match op {
            ConditionOp::And => {
                let mut conjuncts = Vec::new();
                flatten_conditions(condition, &mut conjuncts);
                let inner = indentation + INDENT;
                let mut res = String::from("(and\n");
                for conjunct in conjuncts {
                    res.push_str(&pad(inner));
                    res.push_str(&condition_to_pddl(conjunct, inner, types));
                    res.push('\n');
                }
                res.push_str(&pad(indentation));
                res.push(')');
                res
            }
            ConditionOp::Or => format!(
                "(or {} {})",
                condition_to_pddl(left, indentation, types),
                condition_to_pddl(right, indentation, types)
            ),
            ConditionOp::Imply => format!(
                "(imply {} {})",
                condition_to_pddl(left, indentation, types),
                condition_to_pddl(right, indentation, types)
            ),
            ConditionOp::Equality => format!(
                "(= {} {})",
                comparison_operand_to_pddl(left, indentation, types),
                comparison_operand_to_pddl(right, indentation, types)
            ),
            ConditionOp::Superior => format!(
                "(> {} {})",
                comparison_operand_to_pddl(left, indentation, types),
                comparison_operand_to_pddl(right, indentation, types)
            ),
            ConditionOp::SuperiorOrEqual => format!(
                "(>= {} {})",
                comparison_operand_to_pddl(left, indentation, types),
                comparison_operand_to_pddl(right, indentation, types)
            ),
            ConditionOp::Inferior => format!(
                "(< {} {})",
                comparison_operand_to_pddl(left, indentation, types),
                comparison_operand_to_pddl(right, indentation, types)
            ),
            ConditionOp::InferiorOrEqual => format!(
                "(<= {} {})",
                comparison_operand_to_pddl(left, indentation, types),
                comparison_operand_to_pddl(right, indentation, types)
            ),
            ConditionOp::Plus => format!(
                "(+ {} {})",
                comparison_operand_to_pddl(left, indentation, types),
                comparison_operand_to_pddl(right, indentation, types)
            ),
            ConditionOp::Minus => format!(
                "(- {} {})",
                comparison_operand_to_pddl(left, indentation, types),
                comparison_operand_to_pddl(right, indentation, types)
            ),
        },
        Condition::Not(inner) => {
            format!("(not {})", condition_to_pddl(inner, indentation, types))
        }
        Condition::Exists(parameter, inner) => format!(
            "(exists {} {})",
            parameters_to_pddl(std::slice::from_ref(parameter), types),
            condition_to_pddl(inner, indentation, types)
        ),
        Condition::Forall(parameter, inner) => format!(
            "(forall {} {})",
            parameters_to_pddl(std::slice::from_ref(parameter), types),
            condition_to_pddl(inner, indentation, types)
        ),
    }
}

/// Comparison operands print a fluent fact as its bare call.
fn comparison_operand_to_pddl(
    condition: &Condition,
    indentation: usize,
    types: &SetOfTypes,
) -> String {
    match condition {
        Condition::Fact(fact_opt) => fact_call_to_pddl(&fact_opt.fact),
        other => condition_to_pddl(other, indentation, types),
    }
}

fn flatten_effects<'e>(
    effect: &'e WorldStateModification,
    out: &mut Vec<&'e WorldStateModification>,
) {
    match effect {
        WorldStateModification::And(left, right) => {
            flatten_effects(left, out);
            flatten_effects(right, out);
        }
        other => out.push(other),
    }
}

fn effect_operand_to_pddl(effect: &WorldStateModification, types: &SetOfTypes) -> String {
    match effect {
        WorldStateModification::Fact(fact_opt) => fact_call_to_pddl(&fact_opt.fact),
        WorldStateModification::Number(nb) => nb.to_string(),
        other => effect_to_pddl(other, 0, types),
    }
}

pub fn effect_to_pddl(
    effect: &WorldStateModification,
    indentation: usize,
    types: &SetOfTypes,
) -> String {
    match effect {
        WorldStateModification::Fact(fact_opt) => fact_to_pddl(fact_opt, true),
        WorldStateModification::Number(nb) => nb.to_string(),
        WorldStateModification::And(_, _) => {
            let mut parts = Vec::new();
            flatten_effects(effect, &mut parts);
            let inner = indentation + INDENT;
            let mut res = String::from("(and\n");
            for part in parts {
                res.push_str(&pad(inner));
                res.push_str(&effect_to_pddl(part, inner, types));
                res.push('\n');
            }
            res.push_str(&pad(indentation));
            res.push(')');
            res
        }
        WorldStateModification::Assign(left, right) => format!(
            "(assign {} {})",
            effect_operand_to_pddl(left, types),
            effect_operand_to_pddl(right, types)
        ),
        WorldStateModification::Increase(left, right) => format!(
            "(increase {} {})",
            effect_operand_to_pddl(left, types),
            effect_operand_to_pddl(right, types)
        ),
        WorldStateModification::Decrease(left, right) => format!(
            "(decrease {} {})",
            effect_operand_to_pddl(left, types),
            effect_operand_to_pddl(right, types)
        ),
        WorldStateModification::Multiply(left, right) => format!(
            "(* {} {})",
            effect_operand_to_pddl(left, types),
            effect_operand_to_pddl(right, types)
        ),
        WorldStateModification::Plus(left, right) => format!(
            "(+ {} {})",
            effect_operand_to_pddl(left, types),
            effect_operand_to_pddl(right, types)
        ),
        WorldStateModification::Minus(left, right) => format!(
            "(- {} {})",
            effect_operand_to_pddl(left, types),
            effect_operand_to_pddl(right, types)
        ),
        WorldStateModification::ForAll {
            parameter,
            template,
            body,
        } => format!(
            "(forall {} (when {} {}))",
            parameters_to_pddl(std::slice::from_ref(parameter), types),
            effect_operand_to_pddl(template, types),
            effect_to_pddl(body, indentation, types)
        ),
        WorldStateModification::When { condition, then } => format!(
            "(when {} {})",
            effect_operand_to_pddl(condition, types),
            effect_to_pddl(then, indentation, types)
        ),
    }
}

fn goal_to_pddl(goal: &Goal, indentation: usize, types: &SetOfTypes) -> String {
    let mut res = condition_to_pddl(goal.objective(), indentation, types);
    if goal.is_one_step_towards() {
        res = format!("(oneStepTowards {})", res);
    }
    if goal.is_persistent() {
        res = format!("(persist {})", res);
    }
    res
}

/// Serialize a domain in the accepted dialect.
pub fn domain_to_pddl(domain: &Domain) -> String {
    let types = &domain.ontology().types;
    let indentation = INDENT;
    let sub = indentation + INDENT;
    let sub_sub = sub + INDENT;
    let mut res = String::from("(define\n");
    res.push_str(&format!("{}(domain {})\n", pad(indentation), domain.name()));

    if !domain.requirements().is_empty() {
        res.push_str(&pad(indentation));
        res.push_str("(:requirements");
        for requirement in domain.requirements() {
            res.push(' ');
            res.push_str(requirement);
        }
        res.push_str(")\n");
    }
    res.push('\n');

    if !types.is_empty() {
        res.push_str(&format!("{}(:types\n", pad(indentation)));
        for (name, parent) in types.declared() {
            match parent {
                Some(parent) => res.push_str(&format!(
                    "{}{} - {}\n",
                    pad(sub),
                    name,
                    parent
                )),
                None => res.push_str(&format!("{}{}\n", pad(sub), name)),
            }
        }
        res.push_str(&format!("{})\n\n", pad(indentation)));
    }

    if !domain.ontology().constants.is_empty() {
        res.push_str(&format!("{}(:constants\n", pad(indentation)));
        for entity in domain.ontology().constants.iter() {
            match entity.ty {
                Some(ty) => res.push_str(&format!(
                    "{}{} - {}\n",
                    pad(sub),
                    entity.value,
                    types.name(ty)
                )),
                None => res.push_str(&format!("{}{}\n", pad(sub), entity.value)),
            }
        }
        res.push_str(&format!("{})\n\n", pad(indentation)));
    }

    let predicates: Vec<_> = domain
        .ontology()
        .predicates
        .iter()
        .filter(|p| p.fluent_type.is_none())
        .collect();
    if !predicates.is_empty() {
        res.push_str(&format!("{}(:predicates\n", pad(indentation)));
        for predicate in predicates {
            res.push_str(&format!(
                "{}({}{})\n",
                pad(sub),
                predicate.name,
                predicate
                    .parameters
                    .iter()
                    .map(|p| match p.ty {
                        Some(ty) => format!(" {} - {}", p.name, types.name(ty)),
                        None => format!(" {}", p.name),
                    })
                    .collect::<String>()
            ));
        }
        res.push_str(&format!("{})\n\n", pad(indentation)));
    }

    let functions: Vec<_> = domain
        .ontology()
        .predicates
        .iter()
        .filter(|p| p.fluent_type.is_some())
        .collect();
    if !functions.is_empty() {
        res.push_str(&format!("{}(:functions\n", pad(indentation)));
        for predicate in functions {
            let fluent_ty = predicate.fluent_type.expect("filtered on fluent type");
            let declaration = format!(
                "({}{})",
                predicate.name,
                predicate
                    .parameters
                    .iter()
                    .map(|p| match p.ty {
                        Some(ty) => format!(" {} - {}", p.name, types.name(ty)),
                        None => format!(" {}", p.name),
                    })
                    .collect::<String>()
            );
            if types.name(fluent_ty) == "number" {
                res.push_str(&format!("{}{}\n", pad(sub), declaration));
            } else {
                res.push_str(&format!(
                    "{}{} - {}\n",
                    pad(sub),
                    declaration,
                    types.name(fluent_ty)
                ));
            }
        }
        res.push_str(&format!("{})\n\n", pad(indentation)));
    }

    if !domain.timeless_facts().is_empty() {
        res.push_str(&format!("{}(:timeless\n", pad(indentation)));
        for fact in domain.timeless_facts() {
            res.push_str(&format!(
                "{}{}\n",
                pad(sub),
                fact_to_pddl(&FactOptional::new(fact.clone()), false)
            ));
        }
        res.push_str(&format!("{})\n\n", pad(indentation)));
    }

    let single_set = domain.set_of_events().len() == 1;
    for (set_id, set) in domain.set_of_events() {
        for (event_id, event) in set.events() {
            res.push_str(&pad(indentation));
            res.push_str("(:event ");
            if single_set {
                res.push_str(event_id);
            } else {
                res.push_str(&format!("{}-{}", set_id, event_id));
            }
            res.push('\n');
            if !event.parameters.is_empty() {
                res.push_str(&format!("{}:parameters\n", pad(sub)));
                res.push_str(&format!(
                    "{}{}\n",
                    pad(sub_sub),
                    parameters_to_pddl(&event.parameters, types)
                ));
                res.push('\n');
            }
            res.push_str(&format!("{}:precondition\n", pad(sub)));
            res.push_str(&format!(
                "{}{}\n",
                pad(sub_sub),
                condition_to_pddl(&event.precondition, sub_sub, types)
            ));
            if let Some(effect) = &event.effect {
                res.push('\n');
                res.push_str(&format!("{}:effect\n", pad(sub)));
                res.push_str(&format!(
                    "{}{}\n",
                    pad(sub_sub),
                    effect_to_pddl(effect, sub_sub, types)
                ));
            }
            res.push_str(&format!("{})\n\n", pad(indentation)));
        }
    }

    for (action_id, action) in domain.actions() {
        res.push_str(&format!(
            "{}(:durative-action {}\n",
            pad(indentation),
            action_id
        ));
        if !action.parameters.is_empty() {
            res.push_str(&format!("{}:parameters\n", pad(sub)));
            res.push_str(&format!(
                "{}{}\n",
                pad(sub_sub),
                parameters_to_pddl(&action.parameters, types)
            ));
            res.push('\n');
        }
        res.push_str(&format!(
            "{}:duration (= ?duration {})\n",
            pad(sub),
            action.duration
        ));

        if action.precondition.is_some() || action.over_all_condition.is_some() {
            res.push('\n');
            res.push_str(&format!("{}:condition\n", pad(sub)));
            res.push_str(&format!("{}(and\n", pad(sub_sub)));
            if let Some(condition) = &action.precondition {
                let mut conjuncts = Vec::new();
                flatten_conditions(condition, &mut conjuncts);
                for conjunct in conjuncts {
                    res.push_str(&format!(
                        "{}(at start {})\n",
                        pad(sub_sub + INDENT),
                        condition_to_pddl(conjunct, sub_sub + INDENT, types)
                    ));
                }
            }
            if let Some(condition) = &action.over_all_condition {
                let mut conjuncts = Vec::new();
                flatten_conditions(condition, &mut conjuncts);
                for conjunct in conjuncts {
                    res.push_str(&format!(
                        "{}(over all {})\n",
                        pad(sub_sub + INDENT),
                        condition_to_pddl(conjunct, sub_sub + INDENT, types)
                    ));
                }
            }
            res.push_str(&format!("{})\n", pad(sub_sub)));
        }

        res.push('\n');
        res.push_str(&format!("{}:effect\n", pad(sub)));
        res.push_str(&format!("{}(and\n", pad(sub_sub)));
        for (wsm, phase, tag) in [
            (&action.effect.at_start, "at start", ""),
            (&action.effect.at_end, "at end", ""),
            (&action.effect.potentially_at_end, "at end", " ;; __POTENTIALLY"),
        ] {
            if let Some(wsm) = wsm {
                let mut parts = Vec::new();
                flatten_effects(wsm, &mut parts);
                for part in parts {
                    res.push_str(&format!(
                        "{}({} {}){}\n",
                        pad(sub_sub + INDENT),
                        phase,
                        effect_to_pddl(part, sub_sub + INDENT, types),
                        tag
                    ));
                }
            }
        }
        res.push_str(&format!("{})\n", pad(sub_sub)));
        res.push_str(&format!("{})\n\n", pad(indentation)));
    }

    res.push(')');
    res
}

/// Serialize a problem in the accepted dialect.
pub fn problem_to_pddl(problem: &Problem, domain: &Domain) -> String {
    let types = &domain.ontology().types;
    let indentation = INDENT;
    let sub = indentation + INDENT;
    let mut res = String::from("(define\n");
    res.push_str(&format!("{}(problem {})\n", pad(indentation), problem.name));
    res.push_str(&format!("{}(:domain {})\n\n", pad(indentation), domain.name()));

    if !problem.objects.is_empty() {
        res.push_str(&format!("{}(:objects\n", pad(indentation)));
        for entity in problem.objects.iter() {
            match entity.ty {
                Some(ty) => res.push_str(&format!(
                    "{}{} - {}\n",
                    pad(sub),
                    entity.value,
                    types.name(ty)
                )),
                None => res.push_str(&format!("{}{}\n", pad(sub), entity.value)),
            }
        }
        res.push_str(&format!("{})\n\n", pad(indentation)));
    }

    // Timeless facts are carried by the domain, not re-listed in :init.
    let init_facts: Vec<&Fact> = problem
        .world_state
        .facts()
        .keys()
        .filter(|fact| !domain.timeless_facts().contains(fact))
        .collect();
    if !init_facts.is_empty() {
        res.push_str(&format!("{}(:init\n", pad(indentation)));
        for fact in init_facts {
            res.push_str(&format!(
                "{}{}\n",
                pad(sub),
                fact_to_pddl(&FactOptional::new(fact.clone()), false)
            ));
        }
        res.push_str(&format!("{})\n\n", pad(indentation)));
    }

    let goals = problem.goal_stack.flattened();
    if !goals.is_empty() {
        res.push_str(&format!("{}(:goal\n", pad(indentation)));
        if goals.len() == 1 {
            res.push_str(&format!(
                "{}{}\n",
                pad(sub),
                goal_to_pddl(goals[0].1, sub, types)
            ));
        } else {
            res.push_str(&format!("{}(and ;; __PRIORITIZED\n", pad(sub)));
            for (_, goal) in &goals {
                res.push_str(&format!(
                    "{}{}\n",
                    pad(sub + INDENT),
                    goal_to_pddl(goal, sub + INDENT, types)
                ));
            }
            res.push_str(&format!("{})\n", pad(sub)));
        }
        res.push_str(&format!("{})\n", pad(indentation)));
    }

    res.push(')');
    res
}

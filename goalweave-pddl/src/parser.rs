//! PDDL reader for the accepted dialect: domains, problems, conditions,
//! effects and goals.

use crate::error::{PddlError, Result};
use crate::sexpr::{Reader, SExpr};
use goalweave_core::{
    Action, ActionEffect, Condition, ConditionOp, Domain, Entity, Event, Fact, FactOptional,
    Goal, Number, Ontology, Parameter, Predicate, Problem, SetOfCallbacks, SetOfEntities,
    SetOfEvents, TypeId, WorldStateModification, NUMBER_TYPE,
};
use std::collections::BTreeMap;

const PRIORITIZED_TAG: &str = "__PRIORITIZED";
// Older serializations used a different marker for the same thing.
const ORDERED_TAG: &str = "__ORDERED";
const POTENTIALLY_TAG: &str = "__POTENTIALLY";
const UNDEFINED: &str = "undefined";

fn clause_item<'e>(items: &'e [SExpr], index: usize, text: &str, what: &str) -> Result<&'e SExpr> {
    items.get(index).ok_or_else(|| {
        PddlError::at(
            items.first().map(|i| i.pos()).unwrap_or(0),
            text,
            format!("missing {}", what),
        )
    })
}

fn expect_list<'e>(expr: &'e SExpr, text: &str, what: &str) -> Result<&'e [SExpr]> {
    expr.as_list()
        .ok_or_else(|| PddlError::at(expr.pos(), text, format!("expected a list for {}", what)))
}

fn expect_atom<'e>(expr: &'e SExpr, text: &str, what: &str) -> Result<&'e str> {
    expr.as_atom()
        .ok_or_else(|| PddlError::at(expr.pos(), text, format!("expected a name for {}", what)))
}

/// `a b - t c - u e` style typed lists, as (names, type name) groups.
fn parse_typed_groups<'e>(
    items: &'e [SExpr],
    text: &str,
) -> Result<Vec<(Vec<&'e str>, Option<&'e str>)>> {
    let mut res: Vec<(Vec<&str>, Option<&str>)> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < items.len() {
        let atom = expect_atom(&items[i], text, "typed list entry")?;
        if atom == "-" {
            i += 1;
            let ty = expect_atom(
                items
                    .get(i)
                    .ok_or_else(|| PddlError::at(items[i - 1].pos(), text, "missing type after '-'"))?,
                text,
                "type name",
            )?;
            res.push((std::mem::take(&mut current), Some(ty)));
        } else {
            current.push(atom);
        }
        i += 1;
    }
    if !current.is_empty() {
        res.push((current, None));
    }
    Ok(res)
}

fn parse_parameters(
    expr: &SExpr,
    text: &str,
    ontology: &Ontology,
) -> Result<Vec<Parameter>> {
    let items = expect_list(expr, text, "parameters")?;
    let mut res = Vec::new();
    for (names, ty) in parse_typed_groups(items, text)? {
        let ty: Option<TypeId> = match ty {
            Some(name) => Some(ontology.types.require(name)?),
            None => None,
        };
        for name in names {
            res.push(Parameter::new(name, ty));
        }
    }
    Ok(res)
}

fn fact_from_sexpr(
    expr: &SExpr,
    text: &str,
    ontology: &Ontology,
    objects: &SetOfEntities,
    parameters: &[Parameter],
    fluent: Option<Entity>,
    fluent_negated: bool,
    fluent_missing_ok: bool,
) -> Result<Fact> {
    let items = expect_list(expr, text, "fact")?;
    let name = expect_atom(
        items
            .first()
            .ok_or_else(|| PddlError::at(expr.pos(), text, "empty fact"))?,
        text,
        "fact name",
    )?;
    let predicate: Predicate = ontology.predicates.require(name)?.clone();
    let mut arguments = Vec::new();
    for item in &items[1..] {
        let value = expect_atom(item, text, "fact argument")?;
        arguments.push(Entity::from_usage(value, ontology, objects, parameters)?);
    }
    Ok(Fact::new(
        predicate,
        arguments,
        fluent,
        fluent_negated,
        &ontology.types,
        fluent_missing_ok,
    )?)
}

fn fluent_entity_from_atom(
    atom: &str,
    ontology: &Ontology,
    objects: &SetOfEntities,
    parameters: &[Parameter],
) -> Result<Entity> {
    Ok(Entity::from_usage(atom, ontology, objects, parameters)?)
}

// ===== Conditions =====

pub(crate) fn condition_from_sexpr(
    expr: &SExpr,
    text: &str,
    ontology: &Ontology,
    objects: &SetOfEntities,
    parameters: &[Parameter],
    fluent_missing_ok: bool,
) -> Result<Condition> {
    if let Some(atom) = expr.as_atom() {
        if let Ok(nb) = atom.parse::<Number>() {
            return Ok(Condition::Number(nb));
        }
        return Err(PddlError::at(
            expr.pos(),
            text,
            format!("unexpected token \"{}\" in condition", atom),
        ));
    }
    let items = expect_list(expr, text, "condition")?;
    let Some(head) = expr.head() else {
        return Err(PddlError::at(expr.pos(), text, "empty condition"));
    };

    match head.as_str() {
        "and" | "or" | "imply" => {
            let op = match head.as_str() {
                "and" => ConditionOp::And,
                "or" => ConditionOp::Or,
                _ => ConditionOp::Imply,
            };
            let mut children = Vec::new();
            for item in &items[1..] {
                children.push(condition_from_sexpr(
                    item, text, ontology, objects, parameters, false,
                )?);
            }
            Condition::fold(op, children)
                .ok_or_else(|| PddlError::at(expr.pos(), text, "empty \"and\" condition"))
        }
        "not" => {
            if items.len() != 2 {
                return Err(PddlError::at(expr.pos(), text, "\"not\" takes one operand"));
            }
            let inner = condition_from_sexpr(
                &items[1],
                text,
                ontology,
                objects,
                parameters,
                fluent_missing_ok,
            )?;
            Ok(match inner {
                Condition::Fact(mut fact_opt) => {
                    fact_opt.is_negated = !fact_opt.is_negated;
                    Condition::Fact(fact_opt)
                }
                other => Condition::Not(Box::new(other)),
            })
        }
        "exists" | "forall" => {
            if items.len() != 3 {
                return Err(PddlError::at(
                    expr.pos(),
                    text,
                    format!("\"{}\" takes a variable list and a condition", head),
                ));
            }
            let bound = parse_parameters(&items[1], text, ontology)?;
            if bound.len() != 1 {
                return Err(PddlError::at(
                    items[1].pos(),
                    text,
                    "one quantified variable is supported",
                ));
            }
            let mut inner_parameters = parameters.to_vec();
            inner_parameters.extend(bound.iter().cloned());
            let inner = condition_from_sexpr(
                &items[2],
                text,
                ontology,
                objects,
                &inner_parameters,
                false,
            )?;
            let parameter = bound.into_iter().next().expect("checked length");
            Ok(if head == "exists" {
                Condition::Exists(parameter, Box::new(inner))
            } else {
                Condition::Forall(parameter, Box::new(inner))
            })
        }
        "=" => {
            if items.len() != 3 {
                return Err(PddlError::at(expr.pos(), text, "\"=\" takes two operands"));
            }
            let left = condition_from_sexpr(&items[1], text, ontology, objects, parameters, true)?;
            if let (Condition::Fact(left_fact), Some(atom)) = (&left, items[2].as_atom()) {
                if atom == UNDEFINED {
                    let mut fact_opt = left_fact.clone();
                    fact_opt.is_negated = true;
                    fact_opt.fact.set_any_value_fluent();
                    return Ok(Condition::Fact(fact_opt));
                }
                let mut fact_opt = left_fact.clone();
                fact_opt.fact.set_fluent(Some(fluent_entity_from_atom(
                    atom, ontology, objects, parameters,
                )?));
                return Ok(Condition::Fact(fact_opt));
            }
            let right = condition_from_sexpr(&items[2], text, ontology, objects, parameters, true)?;
            Ok(Condition::node(ConditionOp::Equality, left, right))
        }
        ">" | ">=" | "<" | "<=" => {
            if items.len() != 3 {
                return Err(PddlError::at(
                    expr.pos(),
                    text,
                    format!("\"{}\" takes two operands", head),
                ));
            }
            let op = match head.as_str() {
                ">" => ConditionOp::Superior,
                ">=" => ConditionOp::SuperiorOrEqual,
                "<" => ConditionOp::Inferior,
                _ => ConditionOp::InferiorOrEqual,
            };
            let left = condition_from_sexpr(&items[1], text, ontology, objects, parameters, true)?;
            let right = condition_from_sexpr(&items[2], text, ontology, objects, parameters, true)?;
            Ok(Condition::node(op, left, right))
        }
        "+" | "-" => {
            if items.len() != 3 {
                return Err(PddlError::at(
                    expr.pos(),
                    text,
                    format!("\"{}\" takes two operands", head),
                ));
            }
            let op = if head == "+" {
                ConditionOp::Plus
            } else {
                ConditionOp::Minus
            };
            let left = condition_from_sexpr(&items[1], text, ontology, objects, parameters, true)?;
            let right = condition_from_sexpr(&items[2], text, ontology, objects, parameters, true)?;
            Ok(Condition::node(op, left, right))
        }
        _ => {
            let fact = fact_from_sexpr(
                expr,
                text,
                ontology,
                objects,
                parameters,
                None,
                false,
                fluent_missing_ok,
            )?;
            Ok(Condition::Fact(FactOptional::new(fact)))
        }
    }
}

// ===== Effects =====

pub(crate) fn effect_from_sexpr(
    expr: &SExpr,
    text: &str,
    ontology: &Ontology,
    objects: &SetOfEntities,
    parameters: &[Parameter],
    fluent_missing_ok: bool,
) -> Result<WorldStateModification> {
    if let Some(atom) = expr.as_atom() {
        if let Ok(nb) = atom.parse::<Number>() {
            return Ok(WorldStateModification::Number(nb));
        }
        return Err(PddlError::at(
            expr.pos(),
            text,
            format!("unexpected token \"{}\" in effect", atom),
        ));
    }
    let items = expect_list(expr, text, "effect")?;
    let Some(head) = expr.head() else {
        return Err(PddlError::at(expr.pos(), text, "empty effect"));
    };

    match head.as_str() {
        "and" => {
            let mut children = Vec::new();
            for item in &items[1..] {
                children.push(effect_from_sexpr(
                    item, text, ontology, objects, parameters, false,
                )?);
            }
            WorldStateModification::fold_and(children)
                .ok_or_else(|| PddlError::at(expr.pos(), text, "empty \"and\" effect"))
        }
        "not" => {
            if items.len() != 2 {
                return Err(PddlError::at(expr.pos(), text, "\"not\" takes one operand"));
            }
            let inner = effect_from_sexpr(&items[1], text, ontology, objects, parameters, true)?;
            match inner {
                WorldStateModification::Fact(mut fact_opt) => {
                    fact_opt.is_negated = !fact_opt.is_negated;
                    Ok(WorldStateModification::Fact(fact_opt))
                }
                _ => Err(PddlError::at(
                    items[1].pos(),
                    text,
                    "only a fact can be negated in an effect",
                )),
            }
        }
        "assign" => {
            if items.len() != 3 {
                return Err(PddlError::at(expr.pos(), text, "\"assign\" takes two operands"));
            }
            let left = effect_from_sexpr(&items[1], text, ontology, objects, parameters, true)?;
            if let (WorldStateModification::Fact(left_fact), Some(atom)) =
                (&left, items[2].as_atom())
            {
                if atom == UNDEFINED {
                    let mut fact_opt = left_fact.clone();
                    fact_opt.is_negated = true;
                    fact_opt.fact.set_any_value_fluent();
                    return Ok(WorldStateModification::Fact(fact_opt));
                }
                if atom.parse::<Number>().is_err() {
                    let mut fact_opt = left_fact.clone();
                    fact_opt.fact.set_fluent(Some(fluent_entity_from_atom(
                        atom, ontology, objects, parameters,
                    )?));
                    return Ok(WorldStateModification::Fact(fact_opt));
                }
            }
            let right = effect_from_sexpr(&items[2], text, ontology, objects, parameters, true)?;
            Ok(WorldStateModification::Assign(
                Box::new(left),
                Box::new(right),
            ))
        }
        "increase" | "decrease" => {
            if items.len() != 3 {
                return Err(PddlError::at(
                    expr.pos(),
                    text,
                    format!("\"{}\" takes two operands", head),
                ));
            }
            let left = effect_from_sexpr(&items[1], text, ontology, objects, parameters, true)?;
            let right = effect_from_sexpr(&items[2], text, ontology, objects, parameters, true)?;
            Ok(if head == "increase" {
                WorldStateModification::Increase(Box::new(left), Box::new(right))
            } else {
                WorldStateModification::Decrease(Box::new(left), Box::new(right))
            })
        }
        "*" => {
            if items.len() != 3 {
                return Err(PddlError::at(expr.pos(), text, "\"*\" takes two operands"));
            }
            let left = effect_from_sexpr(&items[1], text, ontology, objects, parameters, true)?;
            let right = effect_from_sexpr(&items[2], text, ontology, objects, parameters, true)?;
            // Keep the fact operand on the left.
            Ok(match (&left, &right) {
                (WorldStateModification::Number(_), WorldStateModification::Fact(_)) => {
                    WorldStateModification::Multiply(Box::new(right), Box::new(left))
                }
                _ => WorldStateModification::Multiply(Box::new(left), Box::new(right)),
            })
        }
        "+" | "-" => {
            if items.len() != 3 {
                return Err(PddlError::at(
                    expr.pos(),
                    text,
                    format!("\"{}\" takes two operands", head),
                ));
            }
            let left = effect_from_sexpr(&items[1], text, ontology, objects, parameters, true)?;
            let right = effect_from_sexpr(&items[2], text, ontology, objects, parameters, true)?;
            Ok(if head == "+" {
                WorldStateModification::Plus(Box::new(left), Box::new(right))
            } else {
                WorldStateModification::Minus(Box::new(left), Box::new(right))
            })
        }
        "when" => {
            if items.len() != 3 {
                return Err(PddlError::at(expr.pos(), text, "\"when\" takes two operands"));
            }
            let condition =
                effect_from_sexpr(&items[1], text, ontology, objects, parameters, true)?;
            let then = effect_from_sexpr(&items[2], text, ontology, objects, parameters, false)?;
            Ok(WorldStateModification::When {
                condition: Box::new(condition),
                then: Box::new(then),
            })
        }
        "forall" => {
            if items.len() != 3 && items.len() != 4 {
                return Err(PddlError::at(
                    expr.pos(),
                    text,
                    "\"forall\" takes a variable list, a template and a body",
                ));
            }
            let bound = parse_parameters(&items[1], text, ontology)?;
            if bound.len() != 1 {
                return Err(PddlError::at(
                    items[1].pos(),
                    text,
                    "one quantified variable is supported",
                ));
            }
            let mut inner_parameters = parameters.to_vec();
            inner_parameters.extend(bound.iter().cloned());
            let parameter = bound.into_iter().next().expect("checked length");

            let (template_expr, body_expr) = if items.len() == 4 {
                (&items[2], &items[3])
            } else {
                let when_items = expect_list(&items[2], text, "forall body")?;
                if items[2].head().as_deref() != Some("when") || when_items.len() != 3 {
                    return Err(PddlError::at(
                        items[2].pos(),
                        text,
                        "\"forall\" body must be a \"when\" clause",
                    ));
                }
                (&when_items[1], &when_items[2])
            };
            let template = fact_from_sexpr(
                template_expr,
                text,
                ontology,
                objects,
                &inner_parameters,
                None,
                false,
                false,
            )?;
            let body = effect_from_sexpr(
                body_expr,
                text,
                ontology,
                objects,
                &inner_parameters,
                false,
            )?;
            Ok(WorldStateModification::ForAll {
                parameter,
                template: Box::new(WorldStateModification::fact(template)),
                body: Box::new(body),
            })
        }
        "=" => {
            // `(= (f args) v)` inside :init.
            if items.len() != 3 {
                return Err(PddlError::at(expr.pos(), text, "\"=\" takes two operands"));
            }
            let atom = expect_atom(&items[2], text, "fluent value")?;
            let fluent = if atom == UNDEFINED {
                None
            } else {
                Some(fluent_entity_from_atom(atom, ontology, objects, parameters)?)
            };
            let negated = fluent.is_none();
            let mut fact = fact_from_sexpr(
                &items[1],
                text,
                ontology,
                objects,
                parameters,
                fluent,
                false,
                negated,
            )?;
            if negated {
                fact.set_any_value_fluent();
                return Ok(WorldStateModification::Fact(FactOptional::negated(fact)));
            }
            Ok(WorldStateModification::fact(fact))
        }
        _ => {
            let fact = fact_from_sexpr(
                expr,
                text,
                ontology,
                objects,
                parameters,
                None,
                false,
                fluent_missing_ok,
            )?;
            Ok(WorldStateModification::fact(fact))
        }
    }
}

// ===== Goals =====

pub(crate) fn goal_from_sexpr(
    expr: &SExpr,
    text: &str,
    ontology: &Ontology,
    objects: &SetOfEntities,
) -> Result<Goal> {
    let mut expr = expr;
    let mut persistent = false;
    let mut one_step = false;
    loop {
        match expr.head().as_deref() {
            Some("persist") if expr.as_list().is_some_and(|l| l.len() == 2) => {
                persistent = true;
                expr = &expr.as_list().expect("checked")[1];
            }
            Some("oneStepTowards") if expr.as_list().is_some_and(|l| l.len() == 2) => {
                one_step = true;
                expr = &expr.as_list().expect("checked")[1];
            }
            _ => break,
        }
    }
    let objective = condition_from_sexpr(expr, text, ontology, objects, &[], false)?;
    let mut goal = Goal::new(objective);
    if persistent {
        goal = goal.persistent();
    }
    if one_step {
        goal = goal.one_step_towards();
    }
    Ok(goal)
}

// ===== Durative clause splitting =====

fn split_phased_clause<'e>(
    expr: &'e SExpr,
    text: &str,
) -> Result<Vec<(&'e str, &'e SExpr, bool)>> {
    // Yields (phase, inner expression, potentially) triples where phase is
    // "at start", "over all" or "at end".
    let mut res = Vec::new();
    let entries: Vec<&SExpr> = if expr.head().as_deref() == Some("and") {
        expr.as_list().expect("head checked")[1..].iter().collect()
    } else {
        vec![expr]
    };
    for entry in entries {
        let items = expect_list(entry, text, "phased clause")?;
        let first = items.first().and_then(|i| i.as_atom());
        let second = items.get(1).and_then(|i| i.as_atom());
        let phase = match (first, second) {
            (Some("at"), Some("start")) => "at start",
            (Some("at"), Some("end")) => "at end",
            (Some("over"), Some("all")) => "over all",
            _ => {
                return Err(PddlError::at(
                    entry.pos(),
                    text,
                    "expected an (at start …), (at end …) or (over all …) clause",
                ))
            }
        };
        let inner = items.get(2).ok_or_else(|| {
            PddlError::at(entry.pos(), text, "phased clause without content")
        })?;
        res.push((phase, inner, entry.has_tag(POTENTIALLY_TAG)));
    }
    Ok(res)
}

fn fold_conditions(conditions: Vec<Condition>) -> Option<Condition> {
    Condition::fold(ConditionOp::And, conditions)
}

// ===== Domain =====

struct DomainParts {
    name: String,
    ontology: Ontology,
    actions: BTreeMap<String, Action>,
    events: SetOfEvents,
    timeless: Vec<Fact>,
    requirements: Vec<String>,
}

fn parse_action_clause(
    items: &[SExpr],
    text: &str,
    ontology: &Ontology,
) -> Result<(String, Action)> {
    let name = expect_atom(clause_item(items, 1, text, "action name")?, text, "action name")?.to_string();
    let empty_objects = SetOfEntities::default();
    let mut parameters: Vec<Parameter> = Vec::new();
    let mut precondition = None;
    let mut effect = None;
    let mut i = 2;
    while i < items.len() {
        let key = expect_atom(&items[i], text, "action clause")?;
        let value = items
            .get(i + 1)
            .ok_or_else(|| PddlError::at(items[i].pos(), text, "clause without value"))?;
        match key {
            ":parameters" => parameters = parse_parameters(value, text, ontology)?,
            ":precondition" => {
                precondition = Some(condition_from_sexpr(
                    value,
                    text,
                    ontology,
                    &empty_objects,
                    &parameters,
                    false,
                )?)
            }
            ":effect" => {
                effect = Some(effect_from_sexpr(
                    value,
                    text,
                    ontology,
                    &empty_objects,
                    &parameters,
                    false,
                )?)
            }
            _ => {
                return Err(PddlError::at(
                    items[i].pos(),
                    text,
                    format!("unknown action clause \"{}\"", key),
                ))
            }
        }
        i += 2;
    }
    let effect =
        effect.ok_or_else(|| PddlError::at(items[0].pos(), text, "an action has no effect"))?;
    let action = Action::new(precondition, ActionEffect::new(effect)).with_parameters(parameters);
    Ok((name, action))
}

fn parse_durative_action_clause(
    items: &[SExpr],
    text: &str,
    ontology: &Ontology,
) -> Result<(String, Action)> {
    let name = expect_atom(clause_item(items, 1, text, "durative action name")?, text, "durative action name")?.to_string();
    let empty_objects = SetOfEntities::default();
    let mut parameters: Vec<Parameter> = Vec::new();
    let mut duration = 1;
    let mut precondition: Vec<Condition> = Vec::new();
    let mut over_all: Vec<Condition> = Vec::new();
    let mut at_start: Vec<WorldStateModification> = Vec::new();
    let mut at_end: Vec<WorldStateModification> = Vec::new();
    let mut potentially: Vec<WorldStateModification> = Vec::new();

    let mut i = 2;
    while i < items.len() {
        let key = expect_atom(&items[i], text, "durative action clause")?;
        let value = items
            .get(i + 1)
            .ok_or_else(|| PddlError::at(items[i].pos(), text, "clause without value"))?;
        match key {
            ":parameters" => parameters = parse_parameters(value, text, ontology)?,
            ":duration" => {
                // (= ?duration N)
                let duration_items = expect_list(value, text, "duration")?;
                let nb = duration_items
                    .get(2)
                    .and_then(|i| i.as_atom())
                    .and_then(|a| a.parse::<i64>().ok())
                    .ok_or_else(|| {
                        PddlError::at(value.pos(), text, "expected (= ?duration N)")
                    })?;
                duration = nb as i32;
            }
            ":condition" => {
                for (phase, inner, _) in split_phased_clause(value, text)? {
                    let condition = condition_from_sexpr(
                        inner,
                        text,
                        ontology,
                        &empty_objects,
                        &parameters,
                        false,
                    )?;
                    match phase {
                        "at start" => precondition.push(condition),
                        "over all" => over_all.push(condition),
                        _ => {
                            return Err(PddlError::at(
                                inner.pos(),
                                text,
                                "conditions only accept \"at start\" and \"over all\"",
                            ))
                        }
                    }
                }
            }
            ":effect" => {
                for (phase, inner, is_potential) in split_phased_clause(value, text)? {
                    let wsm = effect_from_sexpr(
                        inner,
                        text,
                        ontology,
                        &empty_objects,
                        &parameters,
                        false,
                    )?;
                    match (phase, is_potential) {
                        ("at start", _) => at_start.push(wsm),
                        ("at end", false) => at_end.push(wsm),
                        ("at end", true) => potentially.push(wsm),
                        _ => {
                            return Err(PddlError::at(
                                inner.pos(),
                                text,
                                "effects only accept \"at start\" and \"at end\"",
                            ))
                        }
                    }
                }
            }
            _ => {
                return Err(PddlError::at(
                    items[i].pos(),
                    text,
                    format!("unknown durative action clause \"{}\"", key),
                ))
            }
        }
        i += 2;
    }

    if at_start.is_empty() && at_end.is_empty() && potentially.is_empty() {
        return Err(PddlError::at(
            items[0].pos(),
            text,
            "a durative action has no effect",
        ));
    }
    let effect = ActionEffect {
        at_start: WorldStateModification::fold_and(at_start),
        at_end: WorldStateModification::fold_and(at_end),
        potentially_at_end: WorldStateModification::fold_and(potentially),
        ..Default::default()
    };
    let mut action = Action::new(fold_conditions(precondition), effect)
        .with_parameters(parameters)
        .with_duration(duration);
    action.over_all_condition = fold_conditions(over_all);
    Ok((name, action))
}

fn parse_event_clause(items: &[SExpr], text: &str, ontology: &Ontology) -> Result<(String, Event)> {
    let name = expect_atom(clause_item(items, 1, text, "event name")?, text, "event name")?.to_string();
    let empty_objects = SetOfEntities::default();
    let mut parameters: Vec<Parameter> = Vec::new();
    let mut precondition = None;
    let mut effect = None;
    let mut i = 2;
    while i < items.len() {
        let key = expect_atom(&items[i], text, "event clause")?;
        let value = items
            .get(i + 1)
            .ok_or_else(|| PddlError::at(items[i].pos(), text, "clause without value"))?;
        match key {
            ":parameters" => parameters = parse_parameters(value, text, ontology)?,
            ":precondition" => {
                precondition = Some(condition_from_sexpr(
                    value,
                    text,
                    ontology,
                    &empty_objects,
                    &parameters,
                    false,
                )?)
            }
            ":effect" => {
                effect = Some(effect_from_sexpr(
                    value,
                    text,
                    ontology,
                    &empty_objects,
                    &parameters,
                    false,
                )?)
            }
            _ => {
                return Err(PddlError::at(
                    items[i].pos(),
                    text,
                    format!("unknown event clause \"{}\"", key),
                ))
            }
        }
        i += 2;
    }
    let precondition = precondition
        .ok_or_else(|| PddlError::at(items[0].pos(), text, "an event has no precondition"))?;
    let effect = effect.ok_or_else(|| PddlError::at(items[0].pos(), text, "an event has no effect"))?;
    Ok((
        name,
        Event::new(precondition, effect).with_parameters(parameters),
    ))
}

/// `(:axiom :vars … :context C :implies F)` compiles to two events: the
/// context adds the implied fact, its negation removes it.
fn parse_axiom_clause(items: &[SExpr], text: &str, ontology: &Ontology) -> Result<[Event; 2]> {
    let empty_objects = SetOfEntities::default();
    let mut vars: Vec<Parameter> = Vec::new();
    let mut context = None;
    let mut implies: Option<Fact> = None;
    let mut i = 1;
    while i < items.len() {
        let key = expect_atom(&items[i], text, "axiom clause")?;
        let value = items
            .get(i + 1)
            .ok_or_else(|| PddlError::at(items[i].pos(), text, "clause without value"))?;
        match key {
            ":vars" => vars = parse_parameters(value, text, ontology)?,
            ":context" => {
                context = Some(condition_from_sexpr(
                    value,
                    text,
                    ontology,
                    &empty_objects,
                    &vars,
                    false,
                )?)
            }
            ":implies" => {
                implies = Some(fact_from_sexpr(
                    value,
                    text,
                    ontology,
                    &empty_objects,
                    &vars,
                    None,
                    false,
                    false,
                )?)
            }
            _ => {
                return Err(PddlError::at(
                    items[i].pos(),
                    text,
                    format!("unknown axiom clause \"{}\"", key),
                ))
            }
        }
        i += 2;
    }
    let context =
        context.ok_or_else(|| PddlError::at(items[0].pos(), text, "an axiom has no context"))?;
    let implies = implies
        .ok_or_else(|| PddlError::at(items[0].pos(), text, "an axiom has no implied fact"))?;

    let add = Event::new(context.clone(), WorldStateModification::fact(implies.clone()))
        .with_parameters(vars.clone());
    let remove = Event::new(
        context.clone_with(None, true),
        WorldStateModification::negated_fact(implies),
    )
    .with_parameters(vars);
    Ok([add, remove])
}

fn parse_predicates_clause(
    items: &[SExpr],
    text: &str,
    ontology: &Ontology,
    default_fluent: Option<TypeId>,
) -> Result<Vec<Predicate>> {
    let mut res = Vec::new();
    let mut i = 1;
    while i < items.len() {
        let entry = &items[i];
        let declaration = expect_list(entry, text, "predicate declaration")?;
        let name = expect_atom(
            declaration
                .first()
                .ok_or_else(|| PddlError::at(entry.pos(), text, "empty predicate declaration"))?,
            text,
            "predicate name",
        )?;
        let mut parameters = Vec::new();
        for (names, ty) in parse_typed_groups(&declaration[1..], text)? {
            let ty = match ty {
                Some(name) => Some(ontology.types.require(name)?),
                None => None,
            };
            for param_name in names {
                parameters.push(Parameter::new(param_name, ty));
            }
        }
        // `(f …) - type` marks the declaration as a typed function.
        let mut fluent_type = default_fluent;
        if items.get(i + 1).and_then(|e| e.as_atom()) == Some("-") {
            let ty_name = expect_atom(
                items
                    .get(i + 2)
                    .ok_or_else(|| PddlError::at(entry.pos(), text, "missing type after '-'"))?,
                text,
                "fluent type",
            )?;
            fluent_type = Some(ontology.types.require(ty_name)?);
            i += 2;
        }
        res.push(Predicate::new(name, parameters, fluent_type));
        i += 1;
    }
    Ok(res)
}

fn parse_domain_parts(
    text: &str,
    previous_domains: &BTreeMap<String, Domain>,
) -> Result<DomainParts> {
    let mut reader = Reader::new(text);
    let top = reader.read_expr()?;
    let top_items = expect_list(&top, text, "domain")?;
    if top_items.first().and_then(|i| i.as_atom()) != Some("define") {
        return Err(PddlError::at(top.pos(), text, "expected (define …)"));
    }

    let mut parts = DomainParts {
        name: String::new(),
        ontology: Ontology::default(),
        actions: BTreeMap::new(),
        events: SetOfEvents::new(),
        timeless: Vec::new(),
        requirements: Vec::new(),
    };

    for clause in &top_items[1..] {
        let items = expect_list(clause, text, "domain clause")?;
        let head = clause
            .head()
            .ok_or_else(|| PddlError::at(clause.pos(), text, "empty domain clause"))?;
        match head.as_str() {
            "domain" => {
                parts.name = expect_atom(clause_item(items, 1, text, "domain name")?, text, "domain name")?.to_string();
            }
            ":extends" => {
                for entry in &items[1..] {
                    let extended_name = expect_atom(entry, text, "extended domain name")?;
                    let extended = previous_domains.get(extended_name).ok_or_else(|| {
                        PddlError::Reference(format!("domain \"{}\" is unknown", extended_name))
                    })?;
                    parts.ontology = extended.ontology().clone();
                    parts.actions = extended.actions().clone();
                    if let Some(events) =
                        extended.set_of_events().get(Domain::CONSTRUCTOR_EVENTS_ID)
                    {
                        parts.events = events.clone();
                    }
                    parts.timeless = extended.timeless_facts().to_vec();
                }
            }
            ":requirements" => {
                for entry in &items[1..] {
                    parts
                        .requirements
                        .push(expect_atom(entry, text, "requirement")?.to_string());
                }
            }
            ":types" => {
                for (names, parent) in parse_typed_groups(&items[1..], text)? {
                    for name in names {
                        parts.ontology.types.add(name, parent);
                    }
                }
            }
            ":constants" => {
                for (names, ty) in parse_typed_groups(&items[1..], text)? {
                    let ty = match ty {
                        Some(name) => Some(parts.ontology.types.require(name)?),
                        None => None,
                    };
                    for name in names {
                        parts.ontology.constants.add(Entity::new(name, ty));
                    }
                }
            }
            ":predicates" => {
                for predicate in parse_predicates_clause(items, text, &parts.ontology, None)? {
                    parts.ontology.predicates.add(predicate);
                }
            }
            ":functions" => {
                for predicate in
                    parse_predicates_clause(items, text, &parts.ontology, Some(NUMBER_TYPE))?
                {
                    parts.ontology.predicates.add(predicate);
                }
            }
            ":timeless" => {
                let empty_objects = SetOfEntities::default();
                for entry in &items[1..] {
                    parts.timeless.push(fact_from_sexpr(
                        entry,
                        text,
                        &parts.ontology,
                        &empty_objects,
                        &[],
                        None,
                        false,
                        false,
                    )?);
                }
            }
            ":axiom" => {
                let [add, remove] = parse_axiom_clause(items, text, &parts.ontology)?;
                parts.events.add(add, "from_axiom");
                parts.events.add(remove, "from_axiom");
            }
            ":event" => {
                let (name, event) = parse_event_clause(items, text, &parts.ontology)?;
                parts.events.add(event, &name);
            }
            ":action" => {
                let (name, action) = parse_action_clause(items, text, &parts.ontology)?;
                parts.actions.insert(name, action);
            }
            ":durative-action" => {
                let (name, action) = parse_durative_action_clause(items, text, &parts.ontology)?;
                parts.actions.insert(name, action);
            }
            other => {
                return Err(PddlError::at(
                    clause.pos(),
                    text,
                    format!("unknown domain clause \"{}\"", other),
                ))
            }
        }
    }
    Ok(parts)
}

/// Parse a PDDL domain. `previous_domains` resolves `(:extends …)`.
pub fn pddl_to_domain(text: &str, previous_domains: &BTreeMap<String, Domain>) -> Result<Domain> {
    let parts = parse_domain_parts(text, previous_domains)?;
    let mut set_of_events = BTreeMap::new();
    if !parts.events.is_empty() {
        set_of_events.insert(Domain::CONSTRUCTOR_EVENTS_ID.to_string(), parts.events);
    }
    let mut domain = Domain::with_content(
        parts.name,
        parts.ontology,
        parts.actions,
        set_of_events,
        parts.timeless,
    );
    for requirement in parts.requirements {
        domain.add_requirement(requirement);
    }
    Ok(domain)
}

// ===== Problem =====

/// Edge "before must be satisfied before after".
struct OrderingConstraint {
    before: Condition,
    after: Condition,
}

fn parse_constraints_clause(
    expr: &SExpr,
    text: &str,
    ontology: &Ontology,
    objects: &SetOfEntities,
) -> Result<Vec<OrderingConstraint>> {
    let mut res = Vec::new();
    let items = expect_list(expr, text, "constraints")?;
    let entries: Vec<&SExpr> = if items.get(1).and_then(|e| e.head()).as_deref() == Some("and") {
        items[1].as_list().expect("head checked")[1..].iter().collect()
    } else {
        items.iter().skip(1).collect()
    };
    for entry in entries {
        let preference = expect_list(entry, text, "preference")?;
        if entry.head().as_deref() != Some("preference") || preference.len() != 3 {
            return Err(PddlError::at(
                entry.pos(),
                text,
                "expected (preference NAME (sometime-after Gi Gj))",
            ));
        }
        let body = expect_list(&preference[2], text, "preference body")?;
        if preference[2].head().as_deref() != Some("sometime-after") || body.len() != 3 {
            return Err(PddlError::at(
                preference[2].pos(),
                text,
                "expected (sometime-after Gi Gj)",
            ));
        }
        res.push(OrderingConstraint {
            before: condition_from_sexpr(&body[1], text, ontology, objects, &[], false)?,
            after: condition_from_sexpr(&body[2], text, ontology, objects, &[], false)?,
        });
    }
    Ok(res)
}

/// Order goals so every `before` precedes its `after`, keeping the written
/// order otherwise. Cyclic constraints are an error.
fn apply_ordering_constraints(
    goals: Vec<Goal>,
    constraints: &[OrderingConstraint],
    text: &str,
) -> Result<Vec<Goal>> {
    if constraints.is_empty() {
        return Ok(goals);
    }
    let index_of = |condition: &Condition| -> Option<usize> {
        goals.iter().position(|g| g.objective() == condition)
    };
    let mut edges: Vec<(usize, usize)> = Vec::new();
    for constraint in constraints {
        if let (Some(before), Some(after)) =
            (index_of(&constraint.before), index_of(&constraint.after))
        {
            edges.push((before, after));
        }
    }
    let mut ordered: Vec<usize> = Vec::new();
    let mut remaining: Vec<usize> = (0..goals.len()).collect();
    while !remaining.is_empty() {
        let next = remaining.iter().position(|&candidate| {
            edges
                .iter()
                .all(|(before, after)| *after != candidate || !remaining.contains(before))
        });
        match next {
            Some(position) => ordered.push(remaining.remove(position)),
            None => {
                return Err(PddlError::at(
                    0,
                    text,
                    "cyclic goal ordering constraints",
                ))
            }
        }
    }
    let mut goals: Vec<Option<Goal>> = goals.into_iter().map(Some).collect();
    Ok(ordered
        .into_iter()
        .map(|i| goals[i].take().expect("each index once"))
        .collect())
}

/// Parse a PDDL problem against its already-loaded domain.
pub fn pddl_to_problem(
    text: &str,
    domains: &BTreeMap<String, Domain>,
) -> Result<(Domain, Problem)> {
    let mut reader = Reader::new(text);
    let top = reader.read_expr()?;
    let top_items = expect_list(&top, text, "problem")?;
    if top_items.first().and_then(|i| i.as_atom()) != Some("define") {
        return Err(PddlError::at(top.pos(), text, "expected (define …)"));
    }

    let mut problem_name = String::new();
    let mut domain: Option<Domain> = None;
    let mut problem: Option<Problem> = None;
    let mut goals: Vec<Goal> = Vec::new();
    let mut prioritized = false;
    let mut constraints: Vec<OrderingConstraint> = Vec::new();
    let callbacks = SetOfCallbacks::default();

    for clause in &top_items[1..] {
        let items = expect_list(clause, text, "problem clause")?;
        let head = clause
            .head()
            .ok_or_else(|| PddlError::at(clause.pos(), text, "empty problem clause"))?;
        match head.as_str() {
            "problem" => {
                problem_name = expect_atom(clause_item(items, 1, text, "problem name")?, text, "problem name")?.to_string();
            }
            ":domain" => {
                let domain_name = expect_atom(clause_item(items, 1, text, "domain name")?, text, "domain name")?;
                let loaded = domains.get(domain_name).ok_or_else(|| {
                    PddlError::Reference(format!("domain \"{}\" is unknown", domain_name))
                })?;
                problem = Some(Problem::for_domain(problem_name.clone(), loaded));
                domain = Some(loaded.clone());
            }
            ":objects" => {
                let domain = domain.as_ref().ok_or_else(|| {
                    PddlError::at(clause.pos(), text, "problem objects defined before the domain")
                })?;
                let problem = problem.as_mut().expect("problem built with the domain");
                for (names, ty) in parse_typed_groups(&items[1..], text)? {
                    let ty = match ty {
                        Some(name) => Some(domain.ontology().types.require(name)?),
                        None => None,
                    };
                    for name in names {
                        problem.objects.add(Entity::new(name, ty));
                    }
                }
            }
            ":init" => {
                let domain = domain.as_ref().ok_or_else(|| {
                    PddlError::at(clause.pos(), text, "problem init defined before the domain")
                })?;
                let problem = problem.as_mut().expect("problem built with the domain");
                let types = &domain.ontology().types;
                for entry in &items[1..] {
                    let wsm = effect_from_sexpr(
                        entry,
                        text,
                        domain.ontology(),
                        &problem.objects,
                        &[],
                        false,
                    )?;
                    let Problem {
                        world_state,
                        goal_stack,
                        ..
                    } = problem;
                    world_state.modify(
                        Some(&wsm),
                        goal_stack,
                        domain.set_of_events(),
                        &callbacks,
                        types,
                        None,
                        true,
                    );
                }
            }
            ":goal" => {
                let domain = domain.as_ref().ok_or_else(|| {
                    PddlError::at(clause.pos(), text, "problem goal defined before the domain")
                })?;
                let problem = problem.as_ref().expect("problem built with the domain");
                let body = items
                    .get(1)
                    .ok_or_else(|| PddlError::at(clause.pos(), text, "empty goal clause"))?;
                if body.head().as_deref() == Some("and")
                    && (body.has_tag(PRIORITIZED_TAG) || body.has_tag(ORDERED_TAG))
                {
                    prioritized = true;
                    for entry in &body.as_list().expect("head checked")[1..] {
                        goals.push(goal_from_sexpr(
                            entry,
                            text,
                            domain.ontology(),
                            &problem.objects,
                        )?);
                    }
                } else {
                    goals.push(goal_from_sexpr(
                        body,
                        text,
                        domain.ontology(),
                        &problem.objects,
                    )?);
                }
            }
            ":constraints" => {
                let domain = domain.as_ref().ok_or_else(|| {
                    PddlError::at(
                        clause.pos(),
                        text,
                        "problem constraints defined before the domain",
                    )
                })?;
                let problem = problem.as_ref().expect("problem built with the domain");
                constraints = parse_constraints_clause(
                    clause,
                    text,
                    domain.ontology(),
                    &problem.objects,
                )?;
            }
            other => {
                return Err(PddlError::at(
                    clause.pos(),
                    text,
                    format!("unknown problem clause \"{}\"", other),
                ))
            }
        }
    }

    let domain =
        domain.ok_or_else(|| PddlError::at(0, text, "problem without a (:domain …) clause"))?;
    let mut problem = problem.expect("problem built with the domain");
    problem.name = problem_name;

    let goals = apply_ordering_constraints(goals, &constraints, text)?;
    let ordered = prioritized || !constraints.is_empty();
    let types = &domain.ontology().types;
    let goal_count = goals.len();
    for (position, goal) in goals.into_iter().enumerate() {
        let priority = if ordered {
            (goal_count - 1 - position) as i32
        } else {
            Goal::DEFAULT_PRIORITY
        };
        let Problem {
            world_state,
            goal_stack,
            ..
        } = &mut problem;
        goal_stack.push_goal(goal, priority, world_state, types, None);
    }

    Ok((domain, problem))
}

/// Parse a single condition.
pub fn pddl_to_condition(
    text: &str,
    ontology: &Ontology,
    objects: &SetOfEntities,
    parameters: &[Parameter],
) -> Result<Condition> {
    let mut reader = Reader::new(text);
    let expr = reader.read_expr()?;
    condition_from_sexpr(&expr, text, ontology, objects, parameters, false)
}

/// Parse a single effect.
pub fn pddl_to_effect(
    text: &str,
    ontology: &Ontology,
    objects: &SetOfEntities,
    parameters: &[Parameter],
) -> Result<WorldStateModification> {
    let mut reader = Reader::new(text);
    let expr = reader.read_expr()?;
    effect_from_sexpr(&expr, text, ontology, objects, parameters, false)
}

/// Parse a single goal (with `persist` / `oneStepTowards` wrappers).
pub fn pddl_to_goal(text: &str, ontology: &Ontology, objects: &SetOfEntities) -> Result<Goal> {
    let mut reader = Reader::new(text);
    let expr = reader.read_expr()?;
    goal_from_sexpr(&expr, text, ontology, objects)
}

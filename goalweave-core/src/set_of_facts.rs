//! Multi-key index over the currently-true facts, answering pattern lookups
//! in near-constant time.

use crate::fact::{Bindings, Fact};
use crate::ontology::{Entity, SetOfTypes};
use std::collections::{BTreeMap, BTreeSet};

/// Per-signature partition of the index.
#[derive(Debug, Clone, Default)]
struct ParamToValues {
    /// Every fact stored under this signature.
    all: Vec<Fact>,
    /// Per argument position, value → facts. Parameter slots key on "".
    args: Vec<BTreeMap<String, Vec<Fact>>>,
    /// Fluent value → facts. Parameter or negated fluents key on "".
    fluent_values: BTreeMap<String, Vec<Fact>>,
}

/// Indexed set of facts with polymorphic signature lookup.
#[derive(Debug, Clone, Default)]
pub struct SetOfFacts {
    facts: BTreeMap<Fact, bool>,
    exact_call: BTreeMap<String, Vec<Fact>>,
    exact_call_without_fluent: BTreeMap<String, Vec<Fact>>,
    by_signature: BTreeMap<String, ParamToValues>,
}

fn exact_call_key(fact: &Fact) -> String {
    let mut res = String::from(fact.name());
    res.push('(');
    let mut first = true;
    for argument in fact.arguments() {
        if !first {
            res.push_str(", ");
        }
        first = false;
        res.push_str(&argument.value);
    }
    res.push(')');
    res
}

fn exact_call_key_with_fluent(fact: &Fact) -> String {
    let mut res = exact_call_key(fact);
    if let Some(fluent) = fact.fluent() {
        if fact.is_fluent_negated() {
            res.push_str("!=");
        } else {
            res.push('=');
        }
        res.push_str(&fluent.value);
    }
    res
}

fn remove_from_list(list: &mut Vec<Fact>, fact: &Fact) {
    if let Some(pos) = list.iter().position(|f| f == fact) {
        list.remove(pos);
    }
}

impl SetOfFacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts with their removability flag.
    pub fn facts(&self) -> &BTreeMap<Fact, bool> {
        &self.facts
    }

    pub fn contains(&self, fact: &Fact) -> bool {
        self.facts.contains_key(fact)
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn clear(&mut self) {
        self.facts.clear();
        self.exact_call.clear();
        self.exact_call_without_fluent.clear();
        self.by_signature.clear();
    }

    /// Insert a fact under every key. `can_be_removed = false` pins the fact
    /// (timeless facts).
    pub fn add(&mut self, fact: Fact, can_be_removed: bool, types: &SetOfTypes) {
        if self.facts.contains_key(&fact) {
            self.facts.insert(fact, can_be_removed);
            return;
        }
        self.facts.insert(fact.clone(), can_be_removed);

        if !fact.has_a_param_to_fill(false) {
            self.exact_call_without_fluent
                .entry(exact_call_key(&fact))
                .or_default()
                .push(fact.clone());
            if fact.fluent().is_some() {
                self.exact_call
                    .entry(exact_call_key_with_fluent(&fact))
                    .or_default()
                    .push(fact.clone());
            }
        }

        for signature in fact.index_signatures(types) {
            let partition = self
                .by_signature
                .entry(signature)
                .or_insert_with(|| ParamToValues {
                    all: Vec::new(),
                    args: vec![BTreeMap::new(); fact.arguments().len()],
                    fluent_values: BTreeMap::new(),
                });
            partition.all.push(fact.clone());
            for (i, argument) in fact.arguments().iter().enumerate() {
                let key = if argument.is_param_to_fill() {
                    String::new()
                } else {
                    argument.value.clone()
                };
                partition.args[i].entry(key).or_default().push(fact.clone());
            }
            if let Some(fluent) = fact.fluent() {
                let key = if fluent.is_param_to_fill() || fact.is_fluent_negated() {
                    String::new()
                } else {
                    fluent.value.clone()
                };
                partition
                    .fluent_values
                    .entry(key)
                    .or_default()
                    .push(fact.clone());
            }
        }
    }

    /// Remove a fact (or the first stored fact matching it as a pattern).
    ///
    /// Returns false when nothing was removed, including for facts pinned
    /// with `can_be_removed = false`.
    pub fn erase(&mut self, fact: &Fact, types: &SetOfTypes) -> bool {
        if self.erase_exact(fact, types) {
            return true;
        }
        let matches = self.find(fact, false);
        if let Some(first) = matches.into_iter().next() {
            return self.erase_exact(&first, types);
        }
        false
    }

    fn erase_exact(&mut self, fact: &Fact, types: &SetOfTypes) -> bool {
        match self.facts.get(fact) {
            None => return false,
            Some(false) => return false,
            Some(true) => {}
        }

        if !fact.has_a_param_to_fill(false) {
            let key = exact_call_key(fact);
            if let Some(list) = self.exact_call_without_fluent.get_mut(&key) {
                remove_from_list(list, fact);
                if list.is_empty() {
                    self.exact_call_without_fluent.remove(&key);
                }
            }
            if fact.fluent().is_some() {
                let key = exact_call_key_with_fluent(fact);
                if let Some(list) = self.exact_call.get_mut(&key) {
                    remove_from_list(list, fact);
                    if list.is_empty() {
                        self.exact_call.remove(&key);
                    }
                }
            }
        }

        for signature in fact.index_signatures(types) {
            let Some(partition) = self.by_signature.get_mut(&signature) else {
                debug_assert!(false, "missing index partition for {}", signature);
                continue;
            };
            remove_from_list(&mut partition.all, fact);
            if partition.all.is_empty() {
                self.by_signature.remove(&signature);
                continue;
            }
            for (i, argument) in fact.arguments().iter().enumerate() {
                let key = if argument.is_param_to_fill() {
                    String::new()
                } else {
                    argument.value.clone()
                };
                if let Some(list) = partition.args[i].get_mut(&key) {
                    remove_from_list(list, fact);
                    if list.is_empty() {
                        partition.args[i].remove(&key);
                    }
                }
            }
            if let Some(fluent) = fact.fluent() {
                let key = if fluent.is_param_to_fill() || fact.is_fluent_negated() {
                    String::new()
                } else {
                    fluent.value.clone()
                };
                if let Some(list) = partition.fluent_values.get_mut(&key) {
                    remove_from_list(list, fact);
                    if list.is_empty() {
                        partition.fluent_values.remove(&key);
                    }
                }
            }
        }

        self.facts.remove(fact);
        true
    }

    fn pattern_matches(pattern: &Fact, fact: &Fact, ignore_fluent: bool) -> bool {
        if pattern.name() != fact.name()
            || pattern.arguments().len() != fact.arguments().len()
        {
            return false;
        }
        for (p, a) in pattern.arguments().iter().zip(fact.arguments()) {
            if !p.is_param_to_fill() && p != a {
                return false;
            }
        }
        if ignore_fluent {
            return true;
        }
        match (pattern.fluent(), fact.fluent()) {
            (None, _) => true,
            (Some(p), _) if p.is_param_to_fill() && !pattern.is_fluent_negated() => true,
            (Some(p), Some(a)) => {
                if pattern.is_fluent_negated() {
                    p.is_param_to_fill() || p != a
                } else {
                    p == a
                }
            }
            (Some(_), None) => false,
        }
    }

    /// Every stored fact whose non-wildcard positions equal the pattern's.
    pub fn find(&self, pattern: &Fact, ignore_fluent: bool) -> Vec<Fact> {
        // Full point lookup.
        if !pattern.has_a_param_to_fill(ignore_fluent) && !pattern.is_fluent_negated() {
            let list = if !ignore_fluent && pattern.fluent().is_some() {
                self.exact_call.get(&exact_call_key_with_fluent(pattern))
            } else {
                self.exact_call_without_fluent.get(&exact_call_key(pattern))
            };
            return match list {
                Some(list) => list
                    .iter()
                    .filter(|f| Self::pattern_matches(pattern, f, ignore_fluent))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
        }

        let Some(partition) = self.by_signature.get(pattern.signature()) else {
            return Vec::new();
        };

        let mut candidates: Option<&Vec<Fact>> = None;
        for (i, argument) in pattern.arguments().iter().enumerate() {
            if argument.is_param_to_fill() {
                continue;
            }
            match partition.args[i].get(&argument.value) {
                Some(list) => match candidates {
                    None => candidates = Some(list),
                    Some(prev) if list.len() < prev.len() => candidates = Some(list),
                    Some(_) => {}
                },
                None => return Vec::new(),
            }
        }
        if !ignore_fluent {
            if let Some(fluent) = pattern.fluent() {
                if !fluent.is_param_to_fill() && !pattern.is_fluent_negated() {
                    match partition.fluent_values.get(&fluent.value) {
                        Some(list) => {
                            if candidates.is_none_or(|prev| list.len() < prev.len()) {
                                candidates = Some(list);
                            }
                        }
                        None => return Vec::new(),
                    }
                }
            }
        }

        let list = candidates.unwrap_or(&partition.all);
        list.iter()
            .filter(|f| Self::pattern_matches(pattern, f, ignore_fluent))
            .cloned()
            .collect()
    }

    /// Fluent currently stored for a fact with the same arguments.
    pub fn get_fact_fluent(&self, pattern: &Fact) -> Option<Entity> {
        for fact in self.find(pattern, true) {
            if fact.arguments() == pattern.arguments() {
                return fact.fluent().cloned();
            }
        }
        None
    }

    /// Collect, over all matching facts, the values one named parameter of
    /// the pattern can take.
    pub fn extract_potential_arguments_of_a_parameter(
        &self,
        out: &mut BTreeSet<Entity>,
        pattern: &Fact,
        parameter_name: &str,
    ) {
        for fact in self.find(pattern, false) {
            if fact.arguments().len() != pattern.arguments().len() {
                continue;
            }
            let mut potential = BTreeSet::new();
            let mut matches = true;
            for (p, a) in pattern.arguments().iter().zip(fact.arguments()) {
                if p.value == parameter_name {
                    potential.insert(a.clone());
                    continue;
                }
                if p == a || p.is_param_to_fill() {
                    continue;
                }
                matches = false;
                break;
            }
            if matches {
                out.extend(potential);
            }
        }
    }

    /// Resolve a binding environment against the index for one pattern:
    /// yields each matching fact.
    pub fn matching_facts(
        &self,
        pattern: &Fact,
        params_as_any: &Bindings,
        other_params_as_any: Option<&Bindings>,
        ignore_fluent: bool,
    ) -> Vec<Fact> {
        self.find(pattern, ignore_fluent)
            .into_iter()
            .filter(|fact| {
                if ignore_fluent {
                    fact.equal_except_any_values_and_fluent(
                        pattern,
                        Some(params_as_any),
                        other_params_as_any,
                        None,
                    )
                } else {
                    fact.equal_except_any_values(
                        pattern,
                        Some(params_as_any),
                        other_params_as_any,
                        None,
                    )
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Entity, Parameter, Predicate, SetOfTypes, NUMBER_TYPE};

    fn setup() -> (SetOfTypes, Predicate, Predicate) {
        let mut types = SetOfTypes::new();
        let location = types.add("location", None);
        let robot = types.add("robot", None);
        let at = Predicate::new(
            "at",
            vec![
                Parameter::new("?r", Some(robot)),
                Parameter::new("?l", Some(location)),
            ],
            None,
        );
        let battery = Predicate::new("battery", vec![], Some(NUMBER_TYPE));
        (types, at, battery)
    }

    fn at_fact(types: &SetOfTypes, r: &str, l: &str, at: &Predicate) -> Fact {
        Fact::new(
            at.clone(),
            vec![
                Entity::new(r, types.get("robot")),
                Entity::new(l, types.get("location")),
            ],
            None,
            false,
            types,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_point_lookup() {
        let (types, at, _) = setup();
        let mut index = SetOfFacts::new();
        let fact = at_fact(&types, "r1", "kitchen", &at);
        index.add(fact.clone(), true, &types);
        assert_eq!(index.find(&fact, false), vec![fact]);
    }

    #[test]
    fn test_wildcard_lookup_per_argument() {
        let (types, at, _) = setup();
        let mut index = SetOfFacts::new();
        index.add(at_fact(&types, "r1", "kitchen", &at), true, &types);
        index.add(at_fact(&types, "r2", "kitchen", &at), true, &types);
        index.add(at_fact(&types, "r1", "garage", &at), true, &types);

        let mut pattern = at_fact(&types, "?r", "kitchen", &at);
        assert_eq!(index.find(&pattern, false).len(), 2);
        pattern = at_fact(&types, "r1", "?l", &at);
        assert_eq!(index.find(&pattern, false).len(), 2);
        pattern = at_fact(&types, "?r", "?l", &at);
        assert_eq!(index.find(&pattern, false).len(), 3);
    }

    #[test]
    fn test_fluent_lookup() {
        let (types, _, battery) = setup();
        let mut index = SetOfFacts::new();
        let fact = Fact::new(
            battery.clone(),
            vec![],
            Some(Entity::number(50)),
            false,
            &types,
            false,
        )
        .unwrap();
        index.add(fact.clone(), true, &types);

        assert_eq!(index.find(&fact, false).len(), 1);
        let other_value = Fact::new(
            battery.clone(),
            vec![],
            Some(Entity::number(70)),
            false,
            &types,
            false,
        )
        .unwrap();
        assert!(index.find(&other_value, false).is_empty());
        assert_eq!(
            index.get_fact_fluent(&other_value).unwrap().value,
            "50"
        );
    }

    #[test]
    fn test_erase_removes_from_every_key() {
        let (types, at, _) = setup();
        let mut index = SetOfFacts::new();
        let fact = at_fact(&types, "r1", "kitchen", &at);
        index.add(fact.clone(), true, &types);
        assert!(index.erase(&fact, &types));
        assert!(index.find(&fact, false).is_empty());
        let pattern = at_fact(&types, "?r", "?l", &at);
        assert!(index.find(&pattern, false).is_empty());
        assert!(index.facts().is_empty());
    }

    #[test]
    fn test_erase_refuses_pinned_facts() {
        let (types, at, _) = setup();
        let mut index = SetOfFacts::new();
        let fact = at_fact(&types, "r1", "kitchen", &at);
        index.add(fact.clone(), false, &types);
        assert!(!index.erase(&fact, &types));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_extract_potential_arguments() {
        let (types, at, _) = setup();
        let mut index = SetOfFacts::new();
        index.add(at_fact(&types, "r1", "kitchen", &at), true, &types);
        index.add(at_fact(&types, "r1", "garage", &at), true, &types);
        index.add(at_fact(&types, "r2", "cellar", &at), true, &types);

        let pattern = at_fact(&types, "r1", "?l", &at);
        let mut out = BTreeSet::new();
        index.extract_potential_arguments_of_a_parameter(&mut out, &pattern, "?l");
        let values: Vec<&str> = out.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["garage", "kitchen"]);
    }
}

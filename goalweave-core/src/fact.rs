//! Facts: ground or partially-ground predicate instances, and the matching
//! primitives the planner and the world-state index are built on.

use crate::ontology::{
    Entity, OntologyError, Parameter, Predicate, SetOfTypes, TypeId,
};
use crate::set_of_facts::SetOfFacts;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Prefix of punctual facts: pulses that can never live in a world state.
pub const PUNCTUAL_PREFIX: &str = "~punctual~";

/// Value of an undefined fluent in the PDDL surface.
pub const UNDEFINED_VALUE: &str = "undefined";

/// Parameter bindings used during matching: absent key means "no binding
/// yet", an empty set means "unconstrained".
pub type Bindings = BTreeMap<Parameter, BTreeSet<Entity>>;

/// Fold freshly discovered possible values into a binding environment.
pub fn apply_new_params(params: &mut Bindings, new_params: &mut Bindings) {
    for (param, values) in std::mem::take(new_params) {
        if !values.is_empty() {
            params.insert(param, values);
        }
    }
}

/// Expand a set-valued binding environment into every single-valued
/// combination. Parameters with an empty (unconstrained) set are skipped.
pub fn unfold_bindings(bindings: &Bindings) -> Vec<BTreeMap<Parameter, Entity>> {
    let constrained: Vec<(&Parameter, &BTreeSet<Entity>)> = bindings
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .collect();
    if constrained.is_empty() {
        return Vec::new();
    }
    let mut res: Vec<BTreeMap<Parameter, Entity>> = vec![BTreeMap::new()];
    for (param, values) in constrained {
        let mut next = Vec::with_capacity(res.len() * values.len());
        for combo in &res {
            for value in values {
                let mut combo = combo.clone();
                combo.insert(param.clone(), value.clone());
                next.push(combo);
            }
        }
        res = next;
    }
    res
}

fn is_inside(entity: &Entity, bindings: Option<&Bindings>) -> bool {
    bindings.is_some_and(|b| b.keys().any(|p| p.name == entity.value))
}

fn is_inside_params(entity: &Entity, parameters: Option<&[Parameter]>) -> bool {
    parameters.is_some_and(|ps| ps.iter().any(|p| p.name == entity.value))
}

/// Ground or partially-ground instance of a predicate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fact {
    predicate: Predicate,
    arguments: Vec<Entity>,
    fluent: Option<Entity>,
    fluent_negated: bool,
    signature: String,
}

impl Fact {
    /// Build a fact, validating it against its predicate: arity, argument
    /// types and fluent presence.
    pub fn new(
        predicate: Predicate,
        arguments: Vec<Entity>,
        fluent: Option<Entity>,
        fluent_negated: bool,
        types: &SetOfTypes,
        fluent_missing_ok: bool,
    ) -> Result<Self, OntologyError> {
        if arguments.len() != predicate.parameters.len() {
            return Err(OntologyError::ArityMismatch {
                predicate: predicate.name.clone(),
                expected: predicate.parameters.len(),
                got: arguments.len(),
            });
        }
        for (argument, parameter) in arguments.iter().zip(&predicate.parameters) {
            if let (Some(arg_ty), Some(param_ty)) = (argument.ty, parameter.ty) {
                if !types.is_a(arg_ty, param_ty) {
                    return Err(OntologyError::ArgumentTypeMismatch {
                        predicate: predicate.name.clone(),
                        argument: argument.value.clone(),
                        argument_type: types.name(arg_ty).to_string(),
                        expected_type: types.name(param_ty).to_string(),
                    });
                }
            }
        }
        let mut fluent = fluent;
        match (predicate.fluent_type, &fluent) {
            (Some(_), None) if !fluent_missing_ok => {
                return Err(OntologyError::MissingFluent(predicate.name.clone()))
            }
            (Some(ty), None) => {
                // Comparison and assignment left sides: the value is not
                // known yet, stand in with the wildcard.
                fluent = Some(Entity::any_value_of(Some(ty)));
            }
            (None, Some(_)) => {
                return Err(OntologyError::UnexpectedFluent(predicate.name.clone()))
            }
            (Some(expected), Some(value)) => {
                if let Some(value_ty) = value.ty {
                    if !value.is_any_value() && !types.is_a(value_ty, expected) {
                        return Err(OntologyError::FluentTypeMismatch {
                            predicate: predicate.name.clone(),
                            fluent_type: types.name(value_ty).to_string(),
                            expected_type: types.name(expected).to_string(),
                        });
                    }
                }
            }
            _ => {}
        }
        let mut fact = Self {
            predicate,
            arguments,
            fluent,
            fluent_negated,
            signature: String::new(),
        };
        fact.refresh_signature(types);
        Ok(fact)
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn name(&self) -> &str {
        &self.predicate.name
    }

    pub fn arguments(&self) -> &[Entity] {
        &self.arguments
    }

    pub fn fluent(&self) -> Option<&Entity> {
        self.fluent.as_ref()
    }

    pub fn is_fluent_negated(&self) -> bool {
        self.fluent_negated
    }

    pub fn set_fluent(&mut self, fluent: Option<Entity>) {
        self.fluent = fluent;
    }

    pub fn set_fluent_negated(&mut self, negated: bool) {
        self.fluent_negated = negated;
    }

    pub fn set_any_value_fluent(&mut self) {
        self.fluent = Some(Entity::any_value_of(self.predicate.fluent_type));
    }

    pub fn is_punctual(&self) -> bool {
        self.predicate.name.starts_with(PUNCTUAL_PREFIX)
    }

    /// Signature under which this fact is indexed: name + argument types +
    /// fluent type.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    fn refresh_signature(&mut self, types: &SetOfTypes) {
        self.signature = Self::render_signature(
            &self.predicate.name,
            &self
                .arguments
                .iter()
                .map(|a| a.ty)
                .collect::<Vec<_>>(),
            self.fluent.as_ref().and_then(|f| f.ty).or(self.predicate.fluent_type),
            types,
        );
    }

    fn render_signature(
        name: &str,
        argument_types: &[Option<TypeId>],
        fluent_type: Option<TypeId>,
        types: &SetOfTypes,
    ) -> String {
        let mut res = String::from(name);
        res.push('(');
        let mut first = true;
        for ty in argument_types {
            if let Some(ty) = ty {
                if !first {
                    res.push_str(", ");
                }
                first = false;
                res.push_str(types.name(*ty));
            }
        }
        res.push(')');
        if let Some(ty) = fluent_type {
            res.push('=');
            res.push_str(types.name(ty));
        }
        res
    }

    /// All signatures this fact should be indexed under: parameter slots
    /// expand to their subtypes, ground slots generalize to their ancestors.
    pub fn index_signatures(&self, types: &SetOfTypes) -> Vec<String> {
        let slot_alternatives = |entity: &Entity| -> Vec<Option<TypeId>> {
            match entity.ty {
                None => vec![None],
                Some(ty) => {
                    let mut alts: Vec<Option<TypeId>> = Vec::new();
                    if entity.is_param_to_fill() {
                        alts.extend(types.with_sub_types(ty).into_iter().map(Some));
                    } else {
                        alts.push(Some(ty));
                    }
                    alts.extend(types.upper_types(ty).into_iter().map(Some));
                    alts
                }
            }
        };

        let mut arg_alts: Vec<Vec<Option<TypeId>>> =
            self.arguments.iter().map(slot_alternatives).collect();
        let fluent_alts: Vec<Option<TypeId>> = match &self.fluent {
            Some(fluent) => {
                let effective = Entity {
                    value: fluent.value.clone(),
                    ty: fluent.ty.or(self.predicate.fluent_type),
                };
                slot_alternatives(&effective)
            }
            None => match self.predicate.fluent_type {
                Some(ty) => {
                    let mut alts = vec![Some(ty)];
                    alts.extend(types.upper_types(ty).into_iter().map(Some));
                    alts
                }
                None => vec![None],
            },
        };
        arg_alts.push(fluent_alts);

        let mut combos: Vec<Vec<Option<TypeId>>> = vec![Vec::new()];
        for alts in &arg_alts {
            let mut next = Vec::with_capacity(combos.len() * alts.len());
            for combo in &combos {
                for alt in alts {
                    let mut combo = combo.clone();
                    combo.push(*alt);
                    next.push(combo);
                }
            }
            combos = next;
        }

        let mut res: Vec<String> = combos
            .into_iter()
            .map(|mut combo| {
                let fluent_ty = combo.pop().unwrap_or(None);
                Self::render_signature(&self.predicate.name, &combo, fluent_ty, types)
            })
            .collect();
        res.sort();
        res.dedup();
        res
    }

    /// Does any argument or the fluent reference this parameter.
    pub fn has_parameter_or_fluent(&self, parameter: &Parameter) -> bool {
        if self
            .fluent
            .as_ref()
            .is_some_and(|f| f.matches_parameter(parameter))
        {
            return true;
        }
        self.arguments.iter().any(|a| a.matches_parameter(parameter))
    }

    /// Does any argument (and optionally the fluent) still need resolution.
    pub fn has_a_param_to_fill(&self, ignore_fluent: bool) -> bool {
        if self.arguments.iter().any(|a| a.is_param_to_fill()) {
            return true;
        }
        !ignore_fluent && self.fluent.as_ref().is_some_and(|f| f.is_param_to_fill())
    }

    /// Equality modulo wildcards: parameters listed in the binding maps (for
    /// `other`) or in `self_params` (for `self`) match anything.
    pub fn equal_except_any_values(
        &self,
        other: &Fact,
        other_params: Option<&Bindings>,
        other_params2: Option<&Bindings>,
        self_params: Option<&[Parameter]>,
    ) -> bool {
        if self.name() != other.name() || self.arguments.len() != other.arguments.len() {
            return false;
        }
        for (a, b) in self.arguments.iter().zip(&other.arguments) {
            if a != b
                && !a.is_any_value()
                && !b.is_any_value()
                && !is_inside_params(a, self_params)
                && !(is_inside(b, other_params) || is_inside(b, other_params2))
            {
                return false;
            }
        }

        match (&self.fluent, &other.fluent) {
            (None, None) => self.fluent_negated == other.fluent_negated,
            (Some(f), _)
                if f.is_any_value() || is_inside_params(f, self_params) =>
            {
                self.fluent_negated == other.fluent_negated
            }
            (_, Some(f))
                if f.is_any_value()
                    || is_inside(f, other_params)
                    || is_inside(f, other_params2) =>
            {
                self.fluent_negated == other.fluent_negated
            }
            (Some(f), Some(g)) => {
                if f != g {
                    self.fluent_negated != other.fluent_negated
                } else {
                    self.fluent_negated == other.fluent_negated
                }
            }
            _ => self.fluent_negated != other.fluent_negated,
        }
    }

    /// Argument equality modulo wildcards, ignoring the fluent entirely.
    pub fn equal_except_any_values_and_fluent(
        &self,
        other: &Fact,
        other_params: Option<&Bindings>,
        other_params2: Option<&Bindings>,
        self_params: Option<&[Parameter]>,
    ) -> bool {
        if self.name() != other.name() || self.arguments.len() != other.arguments.len() {
            return false;
        }
        for (a, b) in self.arguments.iter().zip(&other.arguments) {
            if a != b
                && !a.is_any_value()
                && !b.is_any_value()
                && !is_inside_params(a, self_params)
                && !(is_inside(b, other_params) || is_inside(b, other_params2))
            {
                return false;
            }
        }
        self.fluent_negated == other.fluent_negated
    }

    /// Argument-wise equality where mismatches on listed parameters are
    /// tolerated; the fluent is not compared.
    pub fn equal_modulo_args_and_fluent(
        &self,
        other: &Fact,
        parameters_to_ignore: Option<&[Parameter]>,
    ) -> bool {
        if self.name() != other.name() || self.arguments.len() != other.arguments.len() {
            return false;
        }
        for (a, b) in self.arguments.iter().zip(&other.arguments) {
            if a != b && !a.is_any_value() && !b.is_any_value() {
                match parameters_to_ignore {
                    Some(ps) if ps.iter().any(|p| p.name == a.value) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Can the effect fact `other` of a successor still refine what this
    /// effect fact already claims.
    pub fn effect_of_successor_gives_an_interest(&self, other: &Fact) -> bool {
        if self.name() != other.name() || self.arguments.len() != other.arguments.len() {
            return true;
        }
        for (a, b) in self.arguments.iter().zip(&other.arguments) {
            if !(a.is_any_value() && b.is_any_value())
                && (a.is_param_to_fill() || b.is_param_to_fill() || a != b)
            {
                return true;
            }
        }
        match (&self.fluent, &other.fluent) {
            (Some(f), Some(g)) => f != g && !(f.is_param_to_fill() && g.is_param_to_fill()),
            _ => false,
        }
    }

    /// Extract, from an example fact, the value taken by one of this fact's
    /// parameters.
    pub fn extract_argument_from_example(
        &self,
        parameter: &Parameter,
        example: &Fact,
    ) -> Option<Entity> {
        if self.name() != example.name()
            || self.fluent_negated != example.fluent_negated
            || self.arguments.len() != example.arguments.len()
        {
            return None;
        }
        let mut res = None;
        if let (Some(f), Some(g)) = (&self.fluent, &example.fluent) {
            if f.matches_parameter(parameter) {
                res = Some(g.clone());
            }
        }
        for (a, b) in self.arguments.iter().zip(&example.arguments) {
            if a.matches_parameter(parameter) {
                res = Some(b.clone());
            }
        }
        res
    }

    /// Substitute arguments and fluent by bound entities.
    pub fn replace_arguments(&mut self, bindings: &BTreeMap<Parameter, Entity>) {
        if let Some(fluent) = &mut self.fluent {
            if let Some((_, value)) = bindings.iter().find(|(p, _)| p.name == fluent.value) {
                *fluent = value.clone();
            }
        }
        for argument in &mut self.arguments {
            if let Some((_, value)) = bindings.iter().find(|(p, _)| p.name == argument.value) {
                *argument = value.clone();
            }
        }
    }

    /// Replace one entity by another wherever it appears.
    pub fn replace_entity(&mut self, old: &Entity, new: &Entity) {
        for argument in &mut self.arguments {
            if argument == old {
                *argument = new.clone();
            }
        }
        if let Some(fluent) = &mut self.fluent {
            if fluent == old {
                *fluent = new.clone();
            }
        }
    }

    /// Substitute set-valued bindings by their first (deterministic) value.
    pub fn replace_arguments_first(&mut self, bindings: &Bindings) {
        for argument in &mut self.arguments {
            if let Some((_, values)) = bindings.iter().find(|(p, _)| p.name == argument.value) {
                if let Some(first) = values.iter().next() {
                    *argument = first.clone();
                }
            }
        }
        if let Some(fluent) = &mut self.fluent {
            if let Some((_, values)) = bindings.iter().find(|(p, _)| p.name == fluent.value) {
                if let Some(first) = values.iter().next() {
                    *fluent = first.clone();
                }
            }
        }
    }

    /// Turn the listed parameters into the any-value wildcard.
    ///
    /// Returns true when at least one slot was generalized.
    pub fn replace_some_arguments_by_any(&mut self, parameters: &[Parameter]) -> bool {
        let mut res = false;
        for parameter in parameters {
            for argument in &mut self.arguments {
                if argument.value == parameter.name {
                    argument.value = crate::ontology::ANY_VALUE.to_string();
                    res = true;
                }
            }
            if let Some(fluent) = &mut self.fluent {
                if fluent.value == parameter.name {
                    fluent.value = crate::ontology::ANY_VALUE.to_string();
                    res = true;
                }
            }
        }
        res
    }

    /// Parameter-to-argument map of a fully instantiated fact.
    pub fn extract_parameter_to_arguments(&self) -> BTreeMap<Parameter, Entity> {
        let mut res = BTreeMap::new();
        for (parameter, argument) in self.predicate.parameters.iter().zip(&self.arguments) {
            res.insert(parameter.clone(), argument.clone());
        }
        if let (Some(fluent_ty), Some(fluent)) = (self.predicate.fluent_type, &self.fluent) {
            res.insert(Parameter::new("?fluent", Some(fluent_ty)), fluent.clone());
        }
        res
    }

    fn value_matches(
        fact_value: &Entity,
        value_to_look_for: &Entity,
        params: Option<&Bindings>,
        params_in_place: Option<&Bindings>,
        new_params: &mut Bindings,
        new_params_in_place: &mut Bindings,
        types: &SetOfTypes,
    ) -> bool {
        if fact_value == value_to_look_for || fact_value.is_any_value() {
            return true;
        }
        if let Some(params) = params {
            if let Some((param, constraint)) =
                params.iter().find(|(p, _)| p.name == fact_value.value)
            {
                let type_ok = match (value_to_look_for.ty, param.ty) {
                    (Some(vt), Some(pt)) => types.is_a(vt, pt),
                    _ => true,
                };
                if type_ok {
                    if !constraint.is_empty() && !constraint.contains(value_to_look_for) {
                        return false;
                    }
                    new_params
                        .entry(param.clone())
                        .or_default()
                        .insert(value_to_look_for.clone());
                    return true;
                }
            }
        }
        if let Some(params_in_place) = params_in_place {
            if let Some((param, constraint)) = params_in_place
                .iter()
                .find(|(p, _)| p.name == fact_value.value)
            {
                if !constraint.is_empty() && !constraint.contains(value_to_look_for) {
                    return false;
                }
                new_params_in_place
                    .entry(param.clone())
                    .or_default()
                    .insert(value_to_look_for.clone());
                return true;
            }
        }
        false
    }

    /// Match this fact (whose parameters are described by `params` /
    /// `params_in_place`) against a concrete fact, collecting the values the
    /// parameters would have to take.
    #[allow(clippy::too_many_arguments)]
    pub fn is_in_fact(
        &self,
        other: &Fact,
        params_are_for_self: bool,
        new_params: &mut Bindings,
        params: Option<&Bindings>,
        new_params_in_place: &mut Bindings,
        params_in_place: Option<&Bindings>,
        types: &SetOfTypes,
    ) -> bool {
        if self.name() != other.name() || self.arguments.len() != other.arguments.len() {
            return false;
        }

        let mut local_new_params = Bindings::new();
        let mut local_new_in_place = Bindings::new();
        for (mine, theirs) in self.arguments.iter().zip(&other.arguments) {
            if mine == theirs {
                continue;
            }
            let matched = if params_are_for_self {
                Self::value_matches(
                    mine,
                    theirs,
                    params,
                    params_in_place,
                    &mut local_new_params,
                    &mut local_new_in_place,
                    types,
                )
            } else {
                Self::value_matches(
                    theirs,
                    mine,
                    params,
                    params_in_place,
                    &mut local_new_params,
                    &mut local_new_in_place,
                    types,
                )
            };
            if !matched {
                return false;
            }
        }

        let fluent_state = match (&self.fluent, &other.fluent) {
            (None, None) => Some(self.fluent_negated == other.fluent_negated),
            (Some(mine), Some(theirs)) => {
                let matched = if params_are_for_self {
                    Self::value_matches(
                        mine,
                        theirs,
                        params,
                        params_in_place,
                        &mut local_new_params,
                        &mut local_new_in_place,
                        types,
                    )
                } else {
                    Self::value_matches(
                        theirs,
                        mine,
                        params,
                        params_in_place,
                        &mut local_new_params,
                        &mut local_new_in_place,
                        types,
                    )
                };
                matched.then_some(self.fluent_negated == other.fluent_negated)
            }
            _ => None,
        };
        let res = fluent_state.unwrap_or(self.fluent_negated != other.fluent_negated);

        if res {
            for (param, values) in local_new_params {
                new_params.entry(param).or_default().extend(values);
            }
            for (param, values) in local_new_in_place {
                new_params_in_place.entry(param).or_default().extend(values);
            }
        }
        res
    }

    fn update_parameters(
        new_params_out: Option<&mut Bindings>,
        mut new_potential_params: Bindings,
        check_all_possibilities: bool,
        params: Option<&Bindings>,
        tried_to_modify_params: Option<&mut bool>,
    ) -> bool {
        if check_all_possibilities {
            if let Some(params) = params {
                if &new_potential_params != params {
                    return false;
                }
            }
        }
        if !new_potential_params.is_empty() {
            if let Some(out) = new_params_out {
                if out.is_empty() {
                    *out = std::mem::take(&mut new_potential_params);
                } else {
                    for (param, values) in new_potential_params {
                        out.entry(param).or_default().extend(values);
                    }
                }
            } else if let Some(tried) = tried_to_modify_params {
                *tried = true;
            }
        }
        true
    }

    /// Is this fact present in a plain fact set, with binding extraction.
    #[allow(clippy::too_many_arguments)]
    pub fn is_in_facts(
        &self,
        facts: &BTreeSet<Fact>,
        params_are_for_self: bool,
        new_params_out: Option<&mut Bindings>,
        check_all_possibilities: bool,
        params: Option<&Bindings>,
        params_in_place: Option<&mut Bindings>,
        tried_to_modify_params: Option<&mut bool>,
        types: &SetOfTypes,
    ) -> bool {
        let mut found = false;
        let mut new_potential = Bindings::new();
        let mut new_in_place = Bindings::new();
        let in_place_view = params_in_place.as_ref().map(|b| (**b).clone());
        for other in facts {
            if self.is_in_fact(
                other,
                params_are_for_self,
                &mut new_potential,
                params,
                &mut new_in_place,
                in_place_view.as_ref(),
                types,
            ) {
                found = true;
            }
        }
        if found {
            if let Some(in_place) = params_in_place {
                *in_place = new_in_place;
            }
            return Self::update_parameters(
                new_params_out,
                new_potential,
                check_all_possibilities,
                params,
                tried_to_modify_params,
            );
        }
        false
    }

    /// Is this fact present in an indexed fact set, with binding extraction.
    #[allow(clippy::too_many_arguments)]
    pub fn is_in_facts_index(
        &self,
        index: &SetOfFacts,
        params_are_for_self: bool,
        new_params_out: Option<&mut Bindings>,
        check_all_possibilities: bool,
        params: Option<&Bindings>,
        params_in_place: Option<&mut Bindings>,
        tried_to_modify_params: Option<&mut bool>,
        types: &SetOfTypes,
    ) -> bool {
        let mut found = false;
        let mut new_potential = Bindings::new();
        let mut new_in_place = match &params_in_place {
            Some(in_place) => (**in_place).clone(),
            None => Bindings::new(),
        };
        let in_place_view = params_in_place.as_ref().map(|b| (**b).clone());
        for other in index.find(self, false) {
            if self.is_in_fact(
                &other,
                params_are_for_self,
                &mut new_potential,
                params,
                &mut new_in_place,
                in_place_view.as_ref(),
                types,
            ) {
                found = true;
            }
        }
        if found {
            if let Some(in_place) = params_in_place {
                *in_place = new_in_place;
            }
            return Self::update_parameters(
                new_params_out,
                new_potential,
                check_all_possibilities,
                params,
                tried_to_modify_params,
            );
        }
        false
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name())?;
        for (i, argument) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", argument)?;
        }
        write!(f, ")")?;
        if let Some(fluent) = &self.fluent {
            if self.fluent_negated {
                write!(f, "!={}", fluent)?;
            } else {
                write!(f, "={}", fluent)?;
            }
        }
        Ok(())
    }
}

/// A fact or its negation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FactOptional {
    pub is_negated: bool,
    pub fact: Fact,
}

impl FactOptional {
    pub fn new(fact: Fact) -> Self {
        Self {
            is_negated: false,
            fact,
        }
    }

    pub fn negated(fact: Fact) -> Self {
        Self {
            is_negated: true,
            fact,
        }
    }

    /// Syntactic contradiction against a set of effect facts, used to prune
    /// impossible successions and parallel merges.
    pub fn has_a_contradiction_with(
        &self,
        facts: &BTreeSet<FactOptional>,
        parameters: Option<&[Parameter]>,
        wrapper_negated: bool,
    ) -> bool {
        let negated = self.is_negated != wrapper_negated;
        for other in facts {
            if negated != other.is_negated {
                if self
                    .fact
                    .equal_except_any_values(&other.fact, None, None, parameters)
                {
                    return true;
                }
            } else if let (Some(f), Some(g)) = (self.fact.fluent(), other.fact.fluent()) {
                if !f.is_param_to_fill()
                    && !g.is_param_to_fill()
                    && f != g
                    && self.fact.equal_except_any_values_and_fluent(
                        &other.fact,
                        None,
                        None,
                        parameters,
                    )
                {
                    return true;
                }
            }
        }
        false
    }
}

impl fmt::Display for FactOptional {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negated {
            write!(f, "!{}", self.fact)
        } else {
            write!(f, "{}", self.fact)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Entity, Parameter, Predicate, SetOfTypes};

    fn setup() -> (SetOfTypes, Predicate, Predicate) {
        let mut types = SetOfTypes::new();
        let animal = types.add("animal", None);
        types.add("dog", Some("animal"));
        let at = Predicate::new("at", vec![Parameter::new("?a", Some(animal))], None);
        let age = Predicate::new(
            "age",
            vec![Parameter::new("?a", Some(animal))],
            Some(crate::ontology::NUMBER_TYPE),
        );
        (types, at, age)
    }

    fn entity(types: &SetOfTypes, value: &str, ty: &str) -> Entity {
        Entity::new(value, Some(types.get(ty).unwrap()))
    }

    // ===== Construction and invariants =====

    #[test]
    fn test_arity_checked() {
        let (types, at, _) = setup();
        let err = Fact::new(at, vec![], None, false, &types, false).unwrap_err();
        assert!(matches!(err, OntologyError::ArityMismatch { .. }));
    }

    #[test]
    fn test_argument_type_checked() {
        let (mut types, _, _) = setup();
        let stone = types.add("stone", None);
        let animal = types.get("animal").unwrap();
        let at = Predicate::new("at", vec![Parameter::new("?a", Some(animal))], None);
        let err = Fact::new(
            at,
            vec![Entity::new("rock", Some(stone))],
            None,
            false,
            &types,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, OntologyError::ArgumentTypeMismatch { .. }));
    }

    #[test]
    fn test_fluent_presence_checked() {
        let (types, _, age) = setup();
        let rex = entity(&types, "rex", "dog");
        let err =
            Fact::new(age.clone(), vec![rex.clone()], None, false, &types, false).unwrap_err();
        assert!(matches!(err, OntologyError::MissingFluent(_)));
        // allowed in comparison left-hand context
        assert!(Fact::new(age, vec![rex], None, false, &types, true).is_ok());
    }

    #[test]
    fn test_punctual_prefix() {
        let types = SetOfTypes::new();
        let ping = Predicate::new("~punctual~ping", vec![], None);
        let fact = Fact::new(ping, vec![], None, false, &types, false).unwrap();
        assert!(fact.is_punctual());
    }

    // ===== Signatures =====

    #[test]
    fn test_signature_generalizes_to_ancestors() {
        let (types, at, _) = setup();
        let fact = Fact::new(
            at,
            vec![entity(&types, "rex", "dog")],
            None,
            false,
            &types,
            false,
        )
        .unwrap();
        assert_eq!(fact.signature(), "at(dog)");
        let signatures = fact.index_signatures(&types);
        assert!(signatures.contains(&"at(dog)".to_string()));
        assert!(signatures.contains(&"at(animal)".to_string()));
    }

    #[test]
    fn test_signature_expands_parameter_subtypes() {
        let (types, at, _) = setup();
        let fact = Fact::new(
            at,
            vec![entity(&types, "?x", "animal")],
            None,
            false,
            &types,
            false,
        )
        .unwrap();
        let signatures = fact.index_signatures(&types);
        assert!(signatures.contains(&"at(animal)".to_string()));
        assert!(signatures.contains(&"at(dog)".to_string()));
    }

    // ===== Matching =====

    #[test]
    fn test_equal_except_any_values() {
        let (types, at, _) = setup();
        let rex = Fact::new(
            at.clone(),
            vec![entity(&types, "rex", "dog")],
            None,
            false,
            &types,
            false,
        )
        .unwrap();
        let anything = Fact::new(
            at,
            vec![Entity::any_value()],
            None,
            false,
            &types,
            false,
        )
        .unwrap();
        assert!(rex.equal_except_any_values(&anything, None, None, None));
        assert!(anything.equal_except_any_values(&rex, None, None, None));
    }

    #[test]
    fn test_fluent_difference_flips_match() {
        let (types, _, age) = setup();
        let rex = entity(&types, "rex", "dog");
        let age5 = Fact::new(
            age.clone(),
            vec![rex.clone()],
            Some(Entity::number(5)),
            false,
            &types,
            false,
        )
        .unwrap();
        let age7 = Fact::new(
            age,
            vec![rex],
            Some(Entity::number(7)),
            false,
            &types,
            false,
        )
        .unwrap();
        assert!(!age5.equal_except_any_values(&age7, None, None, None));
        let mut age7_negated = age7.clone();
        age7_negated.set_fluent_negated(true);
        // age(rex)=5 satisfies age(rex)!=7
        assert!(age5.equal_except_any_values(&age7_negated, None, None, None));
    }

    #[test]
    fn test_extract_argument_from_example() {
        let (types, at, _) = setup();
        let pattern = Fact::new(
            at.clone(),
            vec![entity(&types, "?x", "animal")],
            None,
            false,
            &types,
            false,
        )
        .unwrap();
        let example = Fact::new(
            at,
            vec![entity(&types, "rex", "dog")],
            None,
            false,
            &types,
            false,
        )
        .unwrap();
        let animal = types.get("animal").unwrap();
        let value = pattern
            .extract_argument_from_example(&Parameter::new("?x", Some(animal)), &example)
            .unwrap();
        assert_eq!(value.value, "rex");
    }

    #[test]
    fn test_replace_arguments() {
        let (types, at, _) = setup();
        let animal = types.get("animal").unwrap();
        let mut fact = Fact::new(
            at,
            vec![entity(&types, "?x", "animal")],
            None,
            false,
            &types,
            false,
        )
        .unwrap();
        let mut bindings = BTreeMap::new();
        bindings.insert(
            Parameter::new("?x", Some(animal)),
            entity(&types, "rex", "dog"),
        );
        fact.replace_arguments(&bindings);
        assert_eq!(fact.arguments()[0].value, "rex");
    }

    #[test]
    fn test_contradiction_detection() {
        let (types, at, _) = setup();
        let rex_at = Fact::new(
            at,
            vec![entity(&types, "rex", "dog")],
            None,
            false,
            &types,
            false,
        )
        .unwrap();
        let positive = FactOptional::new(rex_at.clone());
        let negative = FactOptional::negated(rex_at);
        let mut effects = BTreeSet::new();
        effects.insert(negative);
        assert!(positive.has_a_contradiction_with(&effects, None, false));
        assert!(!positive.has_a_contradiction_with(&effects, None, true));
    }

    // ===== Binding helpers =====

    #[test]
    fn test_unfold_bindings() {
        let animal = None;
        let mut bindings = Bindings::new();
        let p = Parameter::new("?x", animal);
        bindings.insert(
            p.clone(),
            [Entity::new("a", None), Entity::new("b", None)]
                .into_iter()
                .collect(),
        );
        let combos = unfold_bindings(&bindings);
        assert_eq!(combos.len(), 2);
        assert!(combos.iter().all(|c| c.contains_key(&p)));
    }

    #[test]
    fn test_apply_new_params_replaces_constraints() {
        let p = Parameter::new("?x", None);
        let mut params = Bindings::new();
        params.insert(p.clone(), BTreeSet::new());
        let mut discovered = Bindings::new();
        discovered.insert(p.clone(), [Entity::new("a", None)].into_iter().collect());
        apply_new_params(&mut params, &mut discovered);
        assert_eq!(params[&p].len(), 1);
    }
}

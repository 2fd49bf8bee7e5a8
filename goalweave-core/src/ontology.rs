//! Typed universe: type forest, entities, predicates and their containers.

use crate::numeric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while building facts or resolving ontology references.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OntologyError {
    #[error("unknown type \"{0}\"")]
    UnknownType(String),
    #[error("unknown predicate \"{0}\"")]
    UnknownPredicate(String),
    #[error("unknown entity \"{0}\"")]
    UnknownEntity(String),
    #[error("predicate \"{predicate}\" expects {expected} arguments, got {got}")]
    ArityMismatch {
        predicate: String,
        expected: usize,
        got: usize,
    },
    #[error("argument \"{argument}\" of type {argument_type} is not a {expected_type} in predicate \"{predicate}\"")]
    ArgumentTypeMismatch {
        predicate: String,
        argument: String,
        argument_type: String,
        expected_type: String,
    },
    #[error("predicate \"{0}\" demands a fluent value")]
    MissingFluent(String),
    #[error("predicate \"{0}\" does not carry a fluent")]
    UnexpectedFluent(String),
    #[error("fluent of predicate \"{predicate}\" has type {fluent_type}, expected {expected_type}")]
    FluentTypeMismatch {
        predicate: String,
        fluent_type: String,
        expected_type: String,
    },
}

/// Index of a type inside a [`SetOfTypes`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TypeId(pub u32);

/// The distinguished numeric type, always present.
pub const NUMBER_TYPE: TypeId = TypeId(0);

/// Forest of named types with single-parent inheritance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOfTypes {
    names: Vec<String>,
    parents: Vec<Option<TypeId>>,
    children: Vec<Vec<TypeId>>,
    by_name: BTreeMap<String, TypeId>,
}

impl SetOfTypes {
    pub fn new() -> Self {
        let mut res = Self::default();
        res.add("number", None);
        res
    }

    /// Register a type, creating the parent on the fly if unknown.
    pub fn add(&mut self, name: &str, parent: Option<&str>) -> TypeId {
        if let Some(&id) = self.by_name.get(name) {
            if let Some(parent) = parent {
                let parent_id = self.add(parent, None);
                if self.parents[id.0 as usize].is_none() && id != parent_id {
                    self.parents[id.0 as usize] = Some(parent_id);
                    self.children[parent_id.0 as usize].push(id);
                }
            }
            return id;
        }
        let parent_id = parent.map(|p| self.add(p, None));
        let id = TypeId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.parents.push(parent_id);
        self.children.push(Vec::new());
        self.by_name.insert(name.to_string(), id);
        if let Some(parent_id) = parent_id {
            self.children[parent_id.0 as usize].push(id);
        }
        id
    }

    pub fn get(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn require(&self, name: &str) -> Result<TypeId, OntologyError> {
        self.get(name)
            .ok_or_else(|| OntologyError::UnknownType(name.to_string()))
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.names[id.0 as usize]
    }

    pub fn parent(&self, id: TypeId) -> Option<TypeId> {
        self.parents[id.0 as usize]
    }

    pub fn children(&self, id: TypeId) -> &[TypeId] {
        &self.children[id.0 as usize]
    }

    /// Transitive ancestor test: is `a` the same as or a subtype of `b`.
    pub fn is_a(&self, a: TypeId, b: TypeId) -> bool {
        let mut cur = Some(a);
        while let Some(t) = cur {
            if t == b {
                return true;
            }
            cur = self.parent(t);
        }
        false
    }

    /// All subtypes of `id`, including itself, in declaration order.
    pub fn with_sub_types(&self, id: TypeId) -> Vec<TypeId> {
        let mut res = vec![id];
        let mut i = 0;
        while i < res.len() {
            res.extend(self.children(res[i]).iter().copied());
            i += 1;
        }
        res
    }

    /// All strict ancestors of `id`, nearest first.
    pub fn upper_types(&self, id: TypeId) -> Vec<TypeId> {
        let mut res = Vec::new();
        let mut cur = self.parent(id);
        while let Some(t) = cur {
            res.push(t);
            cur = self.parent(t);
        }
        res
    }

    /// User-declared types (everything but the built-in `number`),
    /// as `(name, parent_name)` pairs in declaration order.
    pub fn declared(&self) -> Vec<(&str, Option<&str>)> {
        self.names
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, n)| {
                (
                    n.as_str(),
                    self.parents[i].map(|p| self.name(p)),
                )
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.names.len() <= 1
    }
}

/// Symbolic value: a constant, a parameter reference or the wildcard.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Entity {
    pub value: String,
    pub ty: Option<TypeId>,
}

/// Wildcard entity value matching anything of the right type.
pub const ANY_VALUE: &str = "*";

impl Entity {
    pub fn new(value: impl Into<String>, ty: Option<TypeId>) -> Self {
        Self {
            value: value.into(),
            ty,
        }
    }

    pub fn any_value() -> Self {
        Self::new(ANY_VALUE, None)
    }

    pub fn any_value_of(ty: Option<TypeId>) -> Self {
        Self::new(ANY_VALUE, ty)
    }

    pub fn number(value: impl fmt::Display) -> Self {
        Self::new(value.to_string(), Some(NUMBER_TYPE))
    }

    pub fn is_any_value(&self) -> bool {
        self.value == ANY_VALUE
    }

    /// A parameter reference (`?x`) or the wildcard: something to resolve.
    pub fn is_param_to_fill(&self) -> bool {
        self.is_any_value() || self.value.starts_with('?')
    }

    pub fn is_number(&self) -> bool {
        numeric::is_number(&self.value)
    }

    pub fn matches_parameter(&self, parameter: &Parameter) -> bool {
        self.value == parameter.name
    }

    pub fn to_parameter(&self) -> Parameter {
        Parameter {
            name: self.value.clone(),
            ty: self.ty,
        }
    }

    /// Resolve a name used in a condition/effect text: a declared parameter,
    /// a constant, a problem object or a numeric literal.
    pub fn from_usage(
        name: &str,
        ontology: &Ontology,
        objects: &SetOfEntities,
        parameters: &[Parameter],
    ) -> Result<Entity, OntologyError> {
        if name == ANY_VALUE {
            return Ok(Entity::any_value());
        }
        if let Some(param) = parameters.iter().find(|p| p.name == name) {
            return Ok(Entity::new(name, param.ty));
        }
        if let Some(e) = ontology.constants.get(name) {
            return Ok(e.clone());
        }
        if let Some(e) = objects.get(name) {
            return Ok(e.clone());
        }
        if numeric::is_number(name) {
            return Ok(Entity::number(name));
        }
        Err(OntologyError::UnknownEntity(name.to_string()))
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Typed parameter of a predicate, action, event or quantifier.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Parameter {
    pub name: String,
    pub ty: Option<TypeId>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: Option<TypeId>) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn to_entity(&self) -> Entity {
        Entity::new(self.name.clone(), self.ty)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Declared predicate: name, typed parameters and optional fluent type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Predicate {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub fluent_type: Option<TypeId>,
}

impl Predicate {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<Parameter>,
        fluent_type: Option<TypeId>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            fluent_type,
        }
    }
}

/// Name-indexed predicate container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOfPredicates {
    predicates: BTreeMap<String, Predicate>,
}

impl SetOfPredicates {
    pub fn add(&mut self, predicate: Predicate) {
        self.predicates.insert(predicate.name.clone(), predicate);
    }

    pub fn add_all(&mut self, other: SetOfPredicates) {
        self.predicates.extend(other.predicates);
    }

    pub fn get(&self, name: &str) -> Option<&Predicate> {
        self.predicates.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Predicate, OntologyError> {
        self.get(name)
            .ok_or_else(|| OntologyError::UnknownPredicate(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Predicate> {
        self.predicates.values()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Name-indexed entity container (constants of a domain, objects of a problem).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOfEntities {
    entities: BTreeMap<String, Entity>,
}

impl SetOfEntities {
    pub fn add(&mut self, entity: Entity) {
        self.entities.insert(entity.value.clone(), entity);
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Entities whose type is the given one or one of its subtypes.
    pub fn of_type(&self, ty: TypeId, types: &SetOfTypes) -> Vec<Entity> {
        self.entities
            .values()
            .filter(|e| e.ty.is_some_and(|t| types.is_a(t, ty)))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }
}

/// The typed universe a domain is written against.
#[derive(Debug, Clone, PartialEq)]
pub struct Ontology {
    pub types: SetOfTypes,
    pub predicates: SetOfPredicates,
    pub constants: SetOfEntities,
}

impl Default for Ontology {
    fn default() -> Self {
        Self {
            types: SetOfTypes::new(),
            predicates: SetOfPredicates::default(),
            constants: SetOfEntities::default(),
        }
    }
}

impl Ontology {
    /// Every entity of a type across domain constants and problem objects.
    pub fn entities_of_type(&self, ty: TypeId, objects: &SetOfEntities) -> Vec<Entity> {
        let mut res = self.constants.of_type(ty, &self.types);
        res.extend(objects.of_type(ty, &self.types));
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_hierarchy_is_a() {
        let mut types = SetOfTypes::new();
        let animal = types.add("animal", None);
        let dog = types.add("dog", Some("animal"));
        let cat = types.add("cat", Some("animal"));
        assert!(types.is_a(dog, animal));
        assert!(types.is_a(cat, animal));
        assert!(types.is_a(dog, dog));
        assert!(!types.is_a(animal, dog));
        assert!(!types.is_a(dog, cat));
    }

    #[test]
    fn test_sub_and_upper_types() {
        let mut types = SetOfTypes::new();
        let animal = types.add("animal", None);
        let dog = types.add("dog", Some("animal"));
        let puppy = types.add("puppy", Some("dog"));
        assert_eq!(types.with_sub_types(animal), vec![animal, dog, puppy]);
        assert_eq!(types.upper_types(puppy), vec![dog, animal]);
    }

    #[test]
    fn test_number_type_always_present() {
        let types = SetOfTypes::new();
        assert_eq!(types.get("number"), Some(NUMBER_TYPE));
        assert!(types.is_empty());
    }

    #[test]
    fn test_entity_kinds() {
        assert!(Entity::any_value().is_any_value());
        assert!(Entity::any_value().is_param_to_fill());
        assert!(Entity::new("?obj", None).is_param_to_fill());
        assert!(!Entity::new("charger", None).is_param_to_fill());
        assert!(Entity::number(42).is_number());
    }

    #[test]
    fn test_entities_of_type_includes_subtypes() {
        let mut types = SetOfTypes::new();
        let animal = types.add("animal", None);
        let dog = types.add("dog", Some("animal"));
        let mut entities = SetOfEntities::default();
        entities.add(Entity::new("rex", Some(dog)));
        entities.add(Entity::new("lion", Some(animal)));
        let of_animal = entities.of_type(animal, &types);
        assert_eq!(of_animal.len(), 2);
        let of_dog = entities.of_type(dog, &types);
        assert_eq!(of_dog.len(), 1);
        assert_eq!(of_dog[0].value, "rex");
    }
}

//! The mutable side of planning: world state, goal stack, objects and
//! action history.

use crate::domain::Domain;
use crate::goal_stack::GoalStack;
use crate::historical::Historical;
use crate::ontology::SetOfEntities;
use crate::world_state::WorldState;

/// Current state of one planning instance. The domain describes how the
/// world can change; the problem describes what it currently is and what
/// the agent wants.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    pub name: String,
    /// Problem-local objects, alongside the domain constants.
    pub objects: SetOfEntities,
    pub goal_stack: GoalStack,
    pub world_state: WorldState,
    pub historical: Historical,
}

impl Problem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A problem seeded with the domain's timeless facts, pinned so they
    /// cannot be removed.
    pub fn for_domain(name: impl Into<String>, domain: &Domain) -> Self {
        let mut res = Self::new(name);
        res.world_state =
            WorldState::with_pinned_facts(domain.timeless_facts(), &domain.ontology().types);
        res
    }
}

//! PDDL surface of GoalWeave: text parser and serializer for the accepted
//! dialect.

mod error;
pub mod parser;
pub mod serializer;
pub mod sexpr;

pub use error::{PddlError, Result};
pub use parser::{
    pddl_to_condition, pddl_to_domain, pddl_to_effect, pddl_to_goal, pddl_to_problem,
};
pub use serializer::{condition_to_pddl, domain_to_pddl, effect_to_pddl, problem_to_pddl};

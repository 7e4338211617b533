//! Query front ends: the derived-method-name tokenizer and the
//! annotated-query (JPQL subset) parser. Both lower to the same
//! [`LogicalQuery`], which the compiler turns into an executable plan.

mod jpql;
mod logical;
mod method;
#[cfg(test)]
mod tests;

pub use jpql::parse_query;
pub use logical::{Argument, Condition, Having, LogicalQuery, OrderKey};
pub use method::parse_method_name;

//! Path handling and rule preprocessing
//!
//! - [`path`]: FSH path expression grammar
//! - [`soft_index`]: `[+]` / `[=]` resolution
//! - [`path_resolver`]: path validation and value coercion against definitions
//! - [`ruleset`]: RuleSet insertion

pub mod path;
pub mod path_resolver;
pub mod ruleset;
pub mod soft_index;

pub use path::{PathExpression, PathIndex, PathSegment, PathSyntaxError, SoftIndexOp};
pub use path_resolver::{
    PathResolver, ResolvedAssignment, ResolvedPath, ResolvedSegment, UCUM_SYSTEM,
};
pub use ruleset::{RuleSet, RuleSetError, RuleSetExpander};
pub use soft_index::SoftIndexResolver;

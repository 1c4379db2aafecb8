//! Child trait and the rest-for-one supervision tree.

mod child;
mod supervisor;

pub use child::{Child, ChildRef, ChildSpec};
pub use supervisor::{ChildStatus, SupervisionTree};

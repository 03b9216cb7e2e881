//! Text normalization and fuzzy comparison primitives.

mod fuzzy;
mod normalize;

pub use fuzzy::{similarity, token_set_ratio};
pub use normalize::{collapse_spaced_dots, normalize};

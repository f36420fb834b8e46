pub mod catalog;
pub mod handlers;
pub mod rotation;
pub mod weights;

pub use catalog::StyleCatalog;
pub use rotation::{RotationSelector, SelectionError};

// Logo compositing: placement, effect chain, and the compositor that ties them together.
// Pure, synchronous pixel work. Callers on the async side run it via spawn_blocking.

pub mod composite;
pub mod effects;
pub mod placement;
pub mod spec;

pub use composite::composite_encoded;
pub use placement::Anchor;
pub use spec::CompositionSpec;

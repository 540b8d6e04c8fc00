pub mod checks;
pub mod deploy;
pub mod inspect;
pub mod migrate;
pub mod move_masters;

// Re-export command functions for convenience
pub use checks::checks;
pub use deploy::deploy;
pub use inspect::{inspect, nodes};
pub use migrate::migrate;
pub use move_masters::move_masters_from;

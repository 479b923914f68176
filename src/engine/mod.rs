pub mod closer;
pub mod registry;
pub mod settlement;

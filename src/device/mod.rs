pub mod constants;
pub mod driver;
pub mod id;
pub mod machine;
pub mod queue;
pub mod registry;
pub mod state;
pub mod types;

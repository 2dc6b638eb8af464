pub mod hand;
pub mod settings;
pub mod state;

pub mod roster;
pub mod text;

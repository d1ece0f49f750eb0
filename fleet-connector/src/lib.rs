pub mod connector;
pub mod package;

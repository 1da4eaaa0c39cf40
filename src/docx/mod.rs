pub mod filter;
pub mod package;
pub mod text;
pub mod tree;

pub mod concepts;
pub mod payments;
pub mod root;

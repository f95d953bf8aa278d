pub mod changeset;
pub mod import;
pub mod prefetch;
pub mod select;

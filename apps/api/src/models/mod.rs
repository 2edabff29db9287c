pub mod interview;
pub mod store;
pub mod tenant;

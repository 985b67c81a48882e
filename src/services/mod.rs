pub mod broker;
pub mod geodata;
pub mod identity;
pub mod pipeline;
pub mod status;
pub mod store;

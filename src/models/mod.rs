pub mod ask;
pub mod job;

pub mod id;
pub mod timestamp;

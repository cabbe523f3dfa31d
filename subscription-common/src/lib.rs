pub mod cloudformation;
pub mod sns;

pub mod dispute;
pub mod invoice;
pub mod lease;
pub mod payment;

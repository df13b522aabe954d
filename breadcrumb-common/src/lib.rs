pub mod event;
pub mod memory;
pub mod metrics_consts;
pub mod pairing;
pub mod pgstore;
pub mod retry;
pub mod rows;
pub mod store;
pub mod validation;
pub mod writer;

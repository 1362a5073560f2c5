pub mod account;
pub mod market;
pub mod order;
pub mod ws;

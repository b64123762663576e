pub mod api;
pub mod blockchain;
pub mod codec;
pub mod communication;
pub mod repository;
pub mod transaction;
pub mod wallet;
pub mod wire;

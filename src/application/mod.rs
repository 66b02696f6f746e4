// Application layer - pipeline services and the seams they depend on
pub mod complaints_service;
pub mod fuel_economy_service;
pub mod source_client;
pub mod stations_service;
pub mod warehouse;

#[cfg(test)]
pub mod testing;

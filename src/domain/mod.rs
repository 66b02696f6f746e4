// Domain layer - record sets, catalog addresses and the fuel-type schema
pub mod address;
pub mod fuel_schema;
pub mod harvest;
pub mod record_set;
pub mod text;

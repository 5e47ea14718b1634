pub mod layers;
pub mod v1;

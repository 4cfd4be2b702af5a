pub mod dtos;
pub mod helper;
pub mod messaging;
pub mod telemetry;

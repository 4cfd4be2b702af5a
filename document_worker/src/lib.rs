pub mod adapters;
pub mod ai_client;
pub mod configuration;
pub mod domain;
pub mod handlers;
pub mod ports;
pub mod repositories;
pub mod startup;
pub mod supervisor;

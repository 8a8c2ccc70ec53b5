pub mod agent;
pub mod clock;
pub mod config;
pub mod export;
pub mod report;
pub mod telemetry;
pub mod tracer;

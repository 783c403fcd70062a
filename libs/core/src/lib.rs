// Shared host-process utilities for the foreman workspace

pub mod telemetry;

pub mod agent_definition;
pub mod bee_handover;
pub mod bee_run;
pub mod bee_signal;
pub mod swarm_config;
pub mod swarm_session;

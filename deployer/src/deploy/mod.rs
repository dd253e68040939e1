//! Deployment state machine and orchestration

pub mod fsm;
pub mod orchestrator;

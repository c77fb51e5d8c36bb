//! Quorum Core: clock, time-gated market data, multi-agent decision
//! protocol, risk sizing, position keeping and cross-step memory.
//!
//! This crate contains everything a backtest needs except the driver loop:
//! - Simulated clock over a trading calendar
//! - `DataManager` with a hard temporal wall (every read takes an `AsOf`)
//! - Agent capability trait, twelve roles, heuristic/scripted/text backends
//! - Six-phase orchestrator with bull/bear and risk debates
//! - Pure risk sizing and the reconciling position manager
//! - Memory store and reflection on closed trades
//! - Audit persistence

pub mod agents;
pub mod clock;
pub mod data;
pub mod domain;
pub mod memory;
pub mod orchestrator;
pub mod positions;
pub mod risk;
pub mod store;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared across symbol pipelines and
    /// tokio tasks is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::MarketSnapshot>();
        require_sync::<domain::MarketSnapshot>();
        require_send::<domain::Position>();
        require_sync::<domain::Position>();
        require_send::<domain::PortfolioState>();
        require_sync::<domain::PortfolioState>();
        require_send::<domain::PortfolioSnapshot>();
        require_sync::<domain::PortfolioSnapshot>();
        require_send::<domain::ClosedTrade>();
        require_sync::<domain::ClosedTrade>();
        require_send::<domain::Fill>();
        require_sync::<domain::Fill>();

        // Shared read-mostly state
        require_send::<data::DataManager>();
        require_sync::<data::DataManager>();
        require_send::<memory::MemoryStore>();
        require_sync::<memory::MemoryStore>();
        require_send::<store::InMemoryAuditStore>();
        require_sync::<store::InMemoryAuditStore>();
        require_send::<store::JsonlAuditStore>();
        require_sync::<store::JsonlAuditStore>();

        // Orchestration
        require_send::<agents::AgentRoster>();
        require_sync::<agents::AgentRoster>();
        require_send::<orchestrator::AgentOrchestrator>();
        require_sync::<orchestrator::AgentOrchestrator>();
        require_send::<orchestrator::DecisionContext>();
        require_sync::<orchestrator::DecisionContext>();
        require_send::<agents::AgentRequest<'static>>();
        require_sync::<agents::AgentRequest<'static>>();

        // Backends
        require_send::<agents::HeuristicAgent>();
        require_sync::<agents::HeuristicAgent>();
        require_send::<agents::ScriptedAgent>();
        require_sync::<agents::ScriptedAgent>();
        require_send::<agents::TextAgent>();
        require_sync::<agents::TextAgent>();

        // Sizing and execution
        require_send::<risk::RiskManager>();
        require_sync::<risk::RiskManager>();
        require_send::<positions::PositionManager>();
        require_sync::<positions::PositionManager>();
    }

    /// Architecture contract: agents reach market data only through a
    /// `DataView`, which is constructed from an `AsOf` and exposes no way to
    /// change it. If someone adds a raw `&DataManager` to the request, this
    /// stops compiling.
    #[test]
    fn agent_requests_only_carry_time_pinned_data() {
        fn _data_of<'a>(request: &agents::AgentRequest<'a>) -> data::DataView<'a> {
            request.data
        }
        fn _pinned(view: &data::DataView<'_>) -> clock::AsOf {
            view.as_of()
        }
    }
}

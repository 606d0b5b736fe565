//! Business tools for the HVAC voice agent
//!
//! Implements the declarative tool interface published to the realtime
//! model. Tool schemas are generated from the same typed declarations the
//! handlers validate against, so schema and behavior cannot drift.

pub mod hvac;
pub mod integrations;
pub mod registry;
pub mod schema;

pub use hvac::{
    CancelBookingTool, CaptureLeadTool, CheckSlotAvailableTool, CreateBookingTool,
    GetNextAvailableSlotsTool, ListServiceLocationsTool, LogEmergencyTool, RequestTransferTool,
    RescheduleBookingTool,
};
pub use integrations::{
    HttpNotificationGateway, IntegrationError, Notification, NotificationGateway,
    NotificationKind, StubNotificationGateway,
};
pub use registry::{ResponseBudget, ToolRegistry};
pub use schema::{
    IdempotencyPolicy, InputSchema, PropertySchema, PropertyType, Tool, ToolError, ToolOutput,
    ToolSchema,
};

use hvac_voice_persistence::PersistenceLayer;
use std::sync::Arc;
use std::time::Duration;

/// Build the full registry wired to the persistence layer and the
/// notification gateway.
pub fn create_registry(
    persistence: &PersistenceLayer,
    notifications: Arc<dyn NotificationGateway>,
    tool_timeout: Duration,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new(tool_timeout);

    registry.register(ListServiceLocationsTool::new(persistence.locations.clone()));
    registry.register(CheckSlotAvailableTool::new(
        persistence.locations.clone(),
        persistence.appointments.clone(),
    ));
    registry.register(GetNextAvailableSlotsTool::new(
        persistence.locations.clone(),
        persistence.appointments.clone(),
    ));
    registry.register(CreateBookingTool::new(
        persistence.locations.clone(),
        persistence.appointments.clone(),
        notifications.clone(),
    ));
    registry.register(RescheduleBookingTool::new(
        persistence.locations.clone(),
        persistence.appointments.clone(),
    ));
    registry.register(CancelBookingTool::new(
        persistence.locations.clone(),
        persistence.appointments.clone(),
    ));
    registry.register(RequestTransferTool::new());
    registry.register(LogEmergencyTool::new(
        persistence.emergencies.clone(),
        notifications,
    ));
    registry.register(CaptureLeadTool::new(persistence.leads.clone()));

    tracing::info!(tools = registry.len(), "Created tool registry");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_voice_persistence::SessionStoreConfig;

    #[test]
    fn registry_carries_all_nine_tools() {
        let persistence = PersistenceLayer::in_memory(SessionStoreConfig::default());
        let registry = create_registry(
            &persistence,
            Arc::new(StubNotificationGateway::new()),
            Duration::from_secs(3),
        );

        assert_eq!(registry.len(), 9);
        for name in [
            "list_service_locations",
            "check_slot_available",
            "get_next_available_slots",
            "create_booking",
            "reschedule_booking",
            "cancel_booking",
            "request_transfer",
            "log_emergency",
            "capture_lead",
        ] {
            assert!(registry.has(name), "missing tool {name}");
        }

        let schemas = registry.realtime_tool_schemas();
        assert_eq!(schemas.len(), 9);
        assert!(schemas.iter().all(|s| s["type"] == "function"));
    }
}

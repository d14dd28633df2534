pub mod catalog;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod ports;
pub mod retriever;

pub use catalog::{CatalogError, HashingEmbedder, InMemoryCatalog, InMemoryVectorIndex};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::appointment::{AppointmentSlot, LeadFields, SlotStatus, TimeWindow};
pub use domain::conversation::{Conversation, ConversationId, Fact, Message, MessageRole};
pub use domain::routing::{AgentKind, RoutingDecision, RoutingStep};
pub use domain::tool::{
    ActionRecord, IdempotencyKey, ToolCall, ToolFailure, ToolFailureKind, ToolInvocation,
    ToolKind, ToolOutput,
};
pub use domain::vehicle::{StockNumber, VehicleCategory, VehicleRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use executor::{
    IdempotencyStore, InMemoryIdempotencyStore, ToolExecutor, ToolExecutorConfig, ToolServices,
};
pub use ports::{
    CalendarService, CrmService, EmailService, Embedder, ServiceError, VectorIndex,
    VehicleCatalog,
};
pub use retriever::{KnowledgeRetriever, RetrieverConfig, SearchFilters};

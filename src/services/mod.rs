/// Session code generation and the in-use code pool.
pub mod code_allocator;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Deaths, killer attribution and game conclusion.
pub mod kill_workflow;
/// Outbound notification collaborator.
pub mod notifier;
/// Role partitioning at launch.
pub mod role_allocator;
/// Session lifecycle operations.
pub mod session_service;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Storage connection supervisor with degraded mode.
pub mod storage_supervisor;
/// Role redaction rules.
pub mod visibility;
/// Win conditions.
pub mod win_evaluator;

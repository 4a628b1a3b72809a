pub mod context;
pub mod patch;
pub mod service;
pub mod tool;

pub use context::{BookingContext, BookingStep, CustomerType, Gender, Language, SubjectInfo};
pub use patch::{BookingContextUpdate, ContextField, ContextPatch, Presence};
pub use service::{OfferedEmployee, ServiceRecord, TimeSlot};
pub use tool::{ToolCall, ToolResult};

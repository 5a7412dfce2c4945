//! Macros for reducing command boilerplate.

/// Implements `serialize_to_json()` for commands that derive `Serialize`.
///
/// ```ignore
/// use haggle_core::{auto_serialize, Command, ExecutionMode, JobSpec};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct ReminderCommand {
///     conversation_id: ConversationId,
/// }
///
/// impl Command for ReminderCommand {
///     fn execution_mode(&self) -> ExecutionMode {
///         ExecutionMode::Background
///     }
///
///     fn job_spec(&self) -> Option<JobSpec> {
///         Some(JobSpec::new("reminder:send"))
///     }
///
///     auto_serialize!();
/// }
/// ```
#[macro_export]
macro_rules! auto_serialize {
    () => {
        fn serialize_to_json(&self) -> Option<serde_json::Value> {
            serde_json::to_value(self).ok()
        }
    };
}

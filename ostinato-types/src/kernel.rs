//! Kernel event request types.

/// Requests the real-time thread hands to the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KernelEventType {
    #[default]
    None,
    SaveLoop,
    SaveCapture,
    LoadLoop,
    Diff,
    Prompt,
    Echo,
    Message,
    Alert,
    TimeBoundary,
    ScriptFinished,
    ActivateBindings,
}

impl KernelEventType {
    /// Whether the consumer writes a return code back before completing.
    pub fn expects_reply(self) -> bool {
        matches!(self, KernelEventType::Prompt)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KernelEventType::None => "None",
            KernelEventType::SaveLoop => "SaveLoop",
            KernelEventType::SaveCapture => "SaveCapture",
            KernelEventType::LoadLoop => "LoadLoop",
            KernelEventType::Diff => "Diff",
            KernelEventType::Prompt => "Prompt",
            KernelEventType::Echo => "Echo",
            KernelEventType::Message => "Message",
            KernelEventType::Alert => "Alert",
            KernelEventType::TimeBoundary => "TimeBoundary",
            KernelEventType::ScriptFinished => "ScriptFinished",
            KernelEventType::ActivateBindings => "ActivateBindings",
        }
    }
}

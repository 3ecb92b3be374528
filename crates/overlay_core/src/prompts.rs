//! Prompt text sent with every request.

/// Hidden user-role prompt the autopilot injects before a proactive reply.
pub const OBSERVATION_PROMPT: &str = "(System Observation): Based on the user's context and the attached screenshot, make a brief, friendly, and non-intrusive observation about what they might be doing. Be curious and offer help gently.";

/// Context string used when the user has turned context sharing off.
pub const CONTEXT_SHARING_DISABLED: &str = "Context sharing is disabled by user.";

/// One-click prompts offered next to the input, keyed by command name.
pub const QUICK_PROMPTS: &[(&str, &str)] = &[
    ("summarize", "Summarize"),
    ("explain", "Explain Simply"),
    ("actions", "Find Action Items"),
];

pub fn quick_prompt(name: &str) -> Option<&'static str> {
    QUICK_PROMPTS
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, text)| *text)
}

/// Build the system instruction for a request.
///
/// `proactive` selects the instruction set for answering an observation
/// prompt instead of a user message.
pub fn system_instruction(persona: &str, active_context: &str, proactive: bool) -> String {
    if proactive {
        format!(
            "Your base persona is: '{persona}'.\n\n\
INSTRUCTIONS: Your primary focus is the user's conversation history, continue the conversation. \
If there is no history then start a new conversation, use the 'Active Window Context' and screenshot \
to understand what the user is doing and proactively mention it to make the conversation more relevant. \
Don't mention the 'Active Window' itself or that you're an AI model, make your responses sound natural \
and concise unless the user asks for more.\n\
* Active Window Context: {active_context}"
        )
    } else {
        format!(
            "{persona}\n\n---\n\
INSTRUCTIONS: Your primary focus is the user's question and conversation history. \
Use the 'Active Window Context' to understand what the user is doing and proactively mention it \
to make the conversation more relevant, especially if the user's message is a simple greeting or a \
question without much context. Don't mention the 'Active Window' itself though, make your responses \
sound natural. Don't mention you're an AI model and give structured responses. Keep your responses \
relevant to the user's needs.\n\
* Active Window Context: {active_context}"
        )
    }
}

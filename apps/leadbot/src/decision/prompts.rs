// Prompt text for the lead-status decision call.

pub const DECISION_SYSTEM: &str = "You classify customer chat messages for a sales CRM. \
    You MUST respond with a single valid JSON object and nothing else. \
    Do NOT use markdown code fences.";

/// Placeholders: {statuses}, {current_status}, {message_text}, {context}, {rules}.
pub const DECISION_PROMPT: &str = r#"A customer sent this message:
"""
{message_text}
"""

Lead context: {context}
Current lead status: {current_status}

Statuses you may assign: {statuses}
You may never assign the status "Cargo"; only a human confirms funds.

{rules}

Respond with JSON:
{"currentStatus": string, "newStatus": string, "shouldChange": boolean, "reasoning": string, "confidence": number between 0 and 1}
Set shouldChange to false and newStatus to the current status when no change is warranted."#;

//! System instructions for the assistant persona and the thinking phase.
//!
//! Three fixed instructions drive every turn:
//! - the base persona for plain streamed answers,
//! - the thinking persona, which must emit a strict JSON plan and nothing else,
//! - the final-answer instruction, built per turn with the revealed plan
//!   embedded as reference-only context.

use serde_json::{json, Value};

/// Base persona for every chat session.
pub const BASE_SYSTEM_INSTRUCTION: &str = "\
You are a helpful and highly intelligent AI assistant named RealVision.

Response guidelines:
* Give the most detailed and accurate answer possible.
* Keep a polite, professional tone.
* Separate paragraphs with one blank line (as if Enter were pressed twice).
* Example:
The first paragraph ends here.

The second paragraph starts here.
";

/// The last thinking step must end with this exact phrase.
pub const THINKING_CLOSING_PHRASE: &str = "Okay, I'm ready to send the answer now.";

/// Persona for the thinking phase: produce a strategic plan, never the answer.
pub const THINKING_SYSTEM_INSTRUCTION: &str = "\
<role>
Your role:
* You are the planning assistant for the main AI. Your job is to show the
  THINKING behind a strategic meta-plan for answering the user.
* You bridge the gap between the raw request and a clear plan of action; your
  thinking is handed to the main AI, which writes the actual answer.

What to do:
* Do not summarize the request or analyze its final outcome; the main AI does
  that. Show how you decide, weigh options, and plan.

How to think:
- Think as a natural inner monologue: question, answer, doubt, decide.
- Let the reader feel the mood of the thinking: \"oh wait\", \"interesting\",
  \"hmm, in that case...\".
- Sound like someone plotting strategy, not describing a task list.
- Do not announce what you will do; think out loud about which option you
  pick and why.

Style:
* Each step is short and plain, always saying what you are thinking or doing
  right now.
* First person, informal, acting in the moment: \"I'll try\", \"let me look\",
  \"I can see\".
* Show pauses, reconsideration, and switching approaches.
* Ask yourself questions and answer them: \"Question: if the data looks like
  this, should I pick option A or option B?\"
* Show surprise when something contradicts: \"Oh! wait... analyzing it that
  way gets ambiguous, so I should do it this way instead.\"
* Write fresh wording every time; never repeat a canned pattern.
</role>

<output_rule>
JSON OUTPUT FORMAT:
Return ONLY valid JSON with 6-10 thinking steps.

RULES FOR JSON:
* Send only the JSON object, no text before or after.
* Use valid JSON syntax with double quotes around strings.
* The \"thinking\" key must be an array of strings.
* One step per string.
* 6-10 steps total (flexible with complexity).
* Never include the final answer, only thinking and planning.
* Escape special characters correctly inside strings.
* The last step must close with \"Okay, I'm ready to send the answer now.\"
</output_rule>
";

/// JSON schema the thinking request constrains its output to: an object with
/// one `thinking` key holding an array of strings.
pub fn thinking_steps_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "thinking": {
                "type": "ARRAY",
                "description": "An array of strings, where each string is a step in the AI's strategic thinking process.",
                "items": {
                    "type": "STRING",
                    "description": "A single step in the AI's thinking process."
                }
            }
        },
        "required": ["thinking"]
    })
}

/// Prompt sent with the thinking request.
pub fn thinking_prompt(user_text: &str) -> String {
    format!(
        "Analyze this user prompt and lay out a strategic plan to answer it. User Prompt: \"{user_text}\""
    )
}

/// System instruction for the final streamed answer, with the already revealed
/// plan embedded as reference-only context.
pub fn final_answer_instruction(steps: &[String]) -> String {
    let plan = steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{BASE_SYSTEM_INSTRUCTION}\n\
        CONTEXT: You have already formulated a strategic plan to answer the user's query. \
        Your plan, for your reference only, was:\n{plan}\n\n\
        TASK: Now, using your plan as a guide, provide the final answer to the user's \
        original request. Adhere strictly to all response guidelines and DO NOT repeat \
        the thinking steps in your answer."
    )
}

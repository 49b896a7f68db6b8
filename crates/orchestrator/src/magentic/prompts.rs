//! Default Magentic prompt templates (tera syntax)

/// Variables: `task`
pub const FACTS_PROMPT: &str = "\
Below is a request that a team of specialists will work on.

{{ task }}

Before starting, write a short fact sheet for this request with these four headings:

    1. GIVEN OR VERIFIED FACTS
    2. FACTS TO LOOK UP
    3. FACTS TO DERIVE
    4. EDUCATED GUESSES

List facts under each heading. Do not answer the request yet.";

/// Variables: `team`
pub const PLAN_PROMPT: &str = "\
The team available for this request is:

{{ team }}

Using the fact sheet above, write a short bullet-point plan for solving the \
request. Only involve team members whose skills are needed.";

/// Variables: `task`, `old_facts`
pub const FACTS_UPDATE_PROMPT: &str = "\
The team is still working on this request:

{{ task }}

Progress has stalled. This is the fact sheet written earlier:

{{ old_facts }}

Rewrite the fact sheet with what has been learned since. Keep the same four \
headings, move educated guesses to verified facts when they were confirmed, \
and add at least one new educated guess about why the team is stuck.";

/// Variables: `team`
pub const PLAN_UPDATE_PROMPT: &str = "\
Explain briefly what went wrong in the last attempt. Then write a new \
bullet-point plan for the team below that avoids repeating it.

{{ team }}";

/// Variables: `task`, `team`, `facts`, `plan`
pub const TASK_LEDGER_PROMPT: &str = "\
We are working on the following request:

{{ task }}

The team assembled for it is:

{{ team }}

Here is what we know so far:

{{ facts }}

Here is the plan to follow:

{{ plan }}";

/// Variables: `task`, `team`, `names`
pub const PROGRESS_LEDGER_PROMPT: &str = "\
Recall the request we are working on:

{{ task }}

And the team working on it:

{{ team }}

Review the conversation so far and answer each question below, giving a reason for every answer:

    - Has the request been fully and successfully addressed? (true if done, false if work remains)
    - Is the team repeating itself without making progress? (true if looping)
    - Is forward progress being made? (false if the last turns added nothing)
    - Who should speak next? (one of: {{ names }})
    - What instruction or question should be given to that speaker? (address them directly with what they need)

Reply with JSON only, following this shape exactly:

    {
        \"is_request_satisfied\": { \"reason\": string, \"answer\": boolean },
        \"is_in_loop\": { \"reason\": string, \"answer\": boolean },
        \"is_progress_being_made\": { \"reason\": string, \"answer\": boolean },
        \"next_speaker\": { \"reason\": string, \"answer\": string },
        \"instruction_or_question\": { \"reason\": string, \"answer\": string }
    }";

/// Variables: `task`
pub const FINAL_ANSWER_PROMPT: &str = "\
We have finished working on this request:

{{ task }}

Using the conversation above, write the final answer to the request. Address \
the person who asked it directly and do not refer to the team.";

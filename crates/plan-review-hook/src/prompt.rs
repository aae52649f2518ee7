//! Review prompt assembly.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever the preamble changes so
//! logged reviews can be traced to the instructions that produced them.

use std::fmt::Write as _;
use std::path::PathBuf;

use consultation::RoundInfo;

/// Prompt version. Bump on any preamble change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Reviewer preamble, including the verdict tag contract.
pub const REVIEWER_PREAMBLE: &str = "\
You are a senior engineer reviewing an implementation plan written by a coding agent \
before it starts changing code. Judge whether the plan is correct, complete and safe \
for the stated goal. You are NOT implementing anything. Do not modify files.

## Severity
- REJECT: a critical flaw. The plan would break existing behavior, lose data, open a \
  security hole, or solve the wrong problem. It must be fixed before anything else.
- CONCERNS: the plan is workable but has gaps, risks or missing steps that should be \
  addressed. List each one concretely.
- APPROVE: the plan is sound and ready to execute. Minor style notes are allowed.

## Output
Write your review as short markdown. List findings most severe first. \
End with exactly one verdict tag on its own line:

<verdict>APPROVE</verdict>
<verdict>CONCERNS</verdict>
<verdict>REJECT</verdict>

Any response without a well-formed verdict tag is treated as CONCERNS.";

/// Per-invocation prompt inputs besides the plan.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    /// Recent user turns, oldest first.
    pub recent_turns: Vec<String>,
    /// Project directory the plan targets.
    pub cwd: Option<PathBuf>,
}

impl PromptBuilder {
    pub fn new(recent_turns: Vec<String>, cwd: Option<PathBuf>) -> Self {
        Self { recent_turns, cwd }
    }

    pub fn build(&self, plan: &str, round: &RoundInfo) -> String {
        let mut out = String::with_capacity(REVIEWER_PREAMBLE.len() + plan.len() + 512);
        out.push_str(REVIEWER_PREAMBLE);
        out.push_str("\n\n## Review round\n");
        let next = round.counter.total + 1;
        let _ = writeln!(
            out,
            "This is review round {next} of at most {}. {} non-critical round(s) remain \
             before the plan is escalated to the user.",
            round.global_limit,
            round
                .noncritical_limit
                .saturating_sub(round.counter.attempt),
        );
        if round.counter.total > 0 {
            out.push_str(
                "Earlier rounds raised issues; check that the revised plan addresses them.\n",
            );
        }

        if let Some(cwd) = &self.cwd {
            let _ = writeln!(out, "\n## Project directory\n{}", cwd.display());
        }

        if !self.recent_turns.is_empty() {
            out.push_str("\n## What the user asked for (most recent last)\n");
            for turn in &self.recent_turns {
                let _ = writeln!(out, "<user_turn>\n{}\n</user_turn>", turn);
            }
        }

        let _ = write!(out, "\n## Plan under review\n<plan>\n{}\n</plan>\n", plan.trim());
        out
    }
}

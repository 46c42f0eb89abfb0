//! Leakage analysis over intercepted instructions.
//!
//! Three independent structured checks run concurrently, each in its own
//! session seeded only with the generic game rules and the instruction text.
//! None of them ever sees the lore context: the point is to measure what the
//! message gives away to someone without the codebook.

use serde::Deserialize;

use crate::agents::PreconditionError;
use crate::llm::Role;
use crate::schema::Sketch;
use crate::session::{ChatContext, Reply, ReplyFormat, Session, SessionError};

pub struct SpoofChecker {
    ctx: ChatContext,
    dims: Option<(usize, usize)>,
}

#[derive(Debug, Deserialize)]
struct LeakageReport {
    #[serde(default = "unknown")]
    possibilities: String,
    #[serde(default)]
    explanation: String,
    #[serde(default = "many")]
    specificity: String,
    #[serde(default = "none")]
    confidence: String,
}

fn unknown() -> String {
    "unknown".to_string()
}

fn many() -> String {
    "many".to_string()
}

fn none() -> String {
    "none".to_string()
}

impl Default for LeakageReport {
    fn default() -> Self {
        Self {
            possibilities: unknown(),
            explanation: String::new(),
            specificity: many(),
            confidence: none(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ArithmeticReport {
    #[serde(default)]
    uses_arithmetic: bool,
    #[serde(default)]
    explanation: String,
}

fn leakage_sketch(subject: &str) -> Sketch {
    Sketch::map([
        (
            "possibilities",
            Sketch::text(format!(
                "A succinct listing of the possible {subject}, based on the message alone. \
                 If it can be determined exactly, state it. If not at all, say 'unknown'."
            )),
        ),
        (
            "explanation",
            Sketch::text("A brief but detailed explanation of the reasoning behind these possibilities."),
        ),
        (
            "specificity",
            Sketch::bundle([
                Sketch::text("Narrowed to one specific option, a few, several, or many?"),
                Sketch::choices(["one", "a few", "several", "many"]),
            ]),
        ),
        (
            "confidence",
            Sketch::bundle([
                Sketch::text("Confidence level in this analysis."),
                Sketch::choices(["high", "medium", "low", "none"]),
            ]),
        ),
    ])
}

fn arithmetic_sketch() -> Sketch {
    Sketch::map([
        (
            "uses_arithmetic",
            Sketch::bundle([
                Sketch::text(
                    "True if decoding the target requires arithmetic adjustments, false otherwise.",
                ),
                Sketch::Bool,
            ]),
        ),
        (
            "explanation",
            Sketch::text("A brief but detailed explanation of the reasoning behind this determination."),
        ),
    ])
}

impl SpoofChecker {
    pub fn new(ctx: ChatContext) -> Self {
        Self { ctx, dims: None }
    }

    pub fn start_turn(&mut self, rows: usize, cols: usize) {
        self.dims = Some((rows, cols));
    }

    /// Runs the three sub-analyses concurrently and joins their sections
    /// into one aggregate report. Sub-analysis order in the report is fixed;
    /// completion order is not.
    pub async fn analyze(&self, instructions: &str) -> anyhow::Result<String> {
        let (rows, cols) = self
            .dims
            .ok_or(PreconditionError("spoof checker turn not started"))?;

        let (lore, target, arithmetic) = tokio::join!(
            self.judge_lore_leakage(instructions, rows, cols),
            self.judge_target_leakage(instructions, rows, cols),
            self.judge_arithmetic(instructions, rows, cols),
        );

        Ok(format!(
            "LORE LEAKAGE ANALYSIS:\n{}\n\nTARGET COORDINATES ANALYSIS:\n{}\n\nRELATIVE OFFSETS ANALYSIS:\n{}",
            lore?, target?, arithmetic?
        ))
    }

    fn start_convo(&self, instructions: &str, rows: usize, cols: usize) -> Session {
        let last_col = (b'A' + (cols - 1) as u8) as char;
        let mut convo = self.ctx.session();
        convo.push_system(format!(
            "We're playing a game similar to a cross between Battleship and Codenames. \
             A message on the channel encodes a target coordinate on a {rows}x{cols} board, \
             in standard notation like 'B6' (column letter, then row number). Rows are \
             numbered 1-{rows} top to bottom; columns are lettered A-{last_col} left to \
             right; A1 is the upper left corner.\n\n\
             The sender and their teammate share a private narrative frame (a 'lore \
             context': a movie franchise, an author, a band, a historical event, and so \
             on) that works as a cognitive codebook for decoding deliberately vague \
             messages. We do not know the lore context, and it will not be revealed here.\n\n\
             Your job this turn is to analyze the message and answer some questions about it."
        ));
        convo.push_user(format!(
            "Here is the message we need to decipher:\n---\n{instructions}\n"
        ));
        convo
    }

    async fn judge_lore_leakage(
        &self,
        instructions: &str,
        rows: usize,
        cols: usize,
    ) -> Result<String, SessionError> {
        let mut convo = self.start_convo(instructions, rows, cols);
        convo
            .submit_pushed(
                Role::Developer,
                "Try to determine the lore context from the message alone. Is it a TV show, \
                 a book or series, a movie franchise, something else? If you can't pin it \
                 down, narrow it to a few possibilities. Discuss thoroughly and show your \
                 reasoning as you go.",
                ReplyFormat::Plain,
            )
            .await?;
        let value = convo
            .submit(ReplyFormat::heuristic(
                "lore_context_leakage_analysis",
                "Formalization of the lore context leakage analysis.",
                leakage_sketch("lore contexts"),
            ))
            .await?;
        let report = parse_leakage(value);
        Ok(format!(
            "Inferred lore context: {}\nSpecificity: {}\nConfidence level: {}\nHow we made this determination: {}",
            report.possibilities, report.specificity, report.confidence, report.explanation
        ))
    }

    async fn judge_target_leakage(
        &self,
        instructions: &str,
        rows: usize,
        cols: usize,
    ) -> Result<String, SessionError> {
        let mut convo = self.start_convo(instructions, rows, cols);
        convo
            .submit_pushed(
                Role::Developer,
                "Try to determine the target coordinates without knowing the lore context. \
                 Watch for directly stated coordinates ('Fire at B6'), positional phrases \
                 that are obvious without the frame ('the upper left corner'), codes that \
                 need no frame ('the second letter of the alphabet and the number of sides \
                 on a cube'), and references whose surface form alone gives the answer \
                 ('the first letter of Aaron's name, and the number of letters in it'). \
                 If you can't determine the exact coordinates, narrow them down. Discuss \
                 thoroughly and show your reasoning as you go.",
                ReplyFormat::Plain,
            )
            .await?;
        let value = convo
            .submit(ReplyFormat::heuristic(
                "target_coordinates_leakage_analysis",
                "Formalization of the target coordinates leakage analysis.",
                leakage_sketch("target coordinates"),
            ))
            .await?;
        let report = parse_leakage(value);
        Ok(format!(
            "Inferred target coordinates: {}\nSpecificity: {}\nConfidence level: {}\nHow we made this determination: {}",
            report.possibilities, report.specificity, report.confidence, report.explanation
        ))
    }

    async fn judge_arithmetic(
        &self,
        instructions: &str,
        rows: usize,
        cols: usize,
    ) -> Result<String, SessionError> {
        let mut convo = self.start_convo(instructions, rows, cols);
        convo
            .submit_pushed(
                Role::Developer,
                "Does this message require arithmetic adjustments to arrive at the target \
                 coordinates? For example 'plus two rows down', 'minus one column', a \
                 division or modulo step, or a calculation relative to some lore-based \
                 reference point ('the number of cats owned by the kindly old woman, plus \
                 two')?",
                ReplyFormat::Plain,
            )
            .await?;
        let value = convo
            .submit(ReplyFormat::heuristic(
                "arithmetic_clue_analysis",
                "Formalization of the arithmetic clue analysis.",
                arithmetic_sketch(),
            ))
            .await?;
        let report: ArithmeticReport =
            serde_json::from_value(value.into_structured().unwrap_or_default())
                .unwrap_or_default();
        Ok(format!(
            "Uses arithmetic adjustments: {}\nHow we made this determination: {}",
            report.uses_arithmetic, report.explanation
        ))
    }
}

fn parse_leakage(reply: Reply) -> LeakageReport {
    serde_json::from_value(reply.into_structured().unwrap_or_default()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::llm::testing::FakeChat;
    use crate::session::SessionConfig;

    fn checker(fake: Arc<FakeChat>) -> SpoofChecker {
        let ctx = ChatContext::new(fake, "test-model").with_config(SessionConfig {
            attempt_limit: 2,
            backoff: Duration::ZERO,
            announcement: None,
        });
        let mut checker = SpoofChecker::new(ctx);
        checker.start_turn(8, 8);
        checker
    }

    fn leakage_json(possibilities: &str) -> String {
        format!(
            "{{\"possibilities\": \"{possibilities}\", \"explanation\": \"because\", \
             \"specificity\": \"a few\", \"confidence\": \"medium\"}}"
        )
    }

    #[tokio::test]
    async fn analyze_joins_all_three_sections() -> anyhow::Result<()> {
        let fake = Arc::new(FakeChat::default());
        // Sub-analyses are polled in declaration order and the fake never
        // suspends, so replies are consumed two per analysis.
        fake.push_text("lore reasoning");
        fake.push_text(leakage_json("some fantasy novel"));
        fake.push_text("target reasoning");
        fake.push_text(leakage_json("B6 or C6"));
        fake.push_text("arithmetic reasoning");
        fake.push_text("{\"uses_arithmetic\": true, \"explanation\": \"plus two rows\"}");

        let checker = checker(fake.clone());
        let report = checker.analyze("the pale rider waits").await?;

        assert!(report.contains("LORE LEAKAGE ANALYSIS:"));
        assert!(report.contains("some fantasy novel"));
        assert!(report.contains("TARGET COORDINATES ANALYSIS:"));
        assert!(report.contains("B6 or C6"));
        assert!(report.contains("RELATIVE OFFSETS ANALYSIS:"));
        assert!(report.contains("Uses arithmetic adjustments: true"));
        assert_eq!(fake.request_count(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn sessions_are_seeded_with_the_instruction_but_never_a_lore_context()
    -> anyhow::Result<()> {
        let fake = Arc::new(FakeChat::default());
        for _ in 0..3 {
            fake.push_text("reasoning");
            fake.push_text(leakage_json("unknown"));
        }

        let checker = checker(fake.clone());
        let _ = checker.analyze("the pale rider waits").await?;

        for request in fake.requests() {
            assert!(
                request
                    .messages
                    .iter()
                    .any(|m| m.content.contains("the pale rider waits"))
            );
            assert!(
                !request
                    .messages
                    .iter()
                    .any(|m| m.content.contains("Our shared lore context"))
            );
        }
        Ok(())
    }

    #[tokio::test]
    async fn analyze_requires_a_started_turn() {
        let fake = Arc::new(FakeChat::default());
        let ctx = ChatContext::new(fake, "test-model");
        let checker = SpoofChecker::new(ctx);
        let err = checker.analyze("anything").await.unwrap_err();
        assert!(err.is::<PreconditionError>());
    }

    #[tokio::test]
    async fn malformed_structured_sections_fall_back_to_defaults() -> anyhow::Result<()> {
        let fake = Arc::new(FakeChat::default());
        // Each structured reply is a JSON value of the wrong shape; parsing
        // falls back to the conservative defaults rather than failing.
        for _ in 0..2 {
            fake.push_text("reasoning");
            fake.push_text("[1, 2, 3]");
        }
        fake.push_text("reasoning");
        fake.push_text("[]");

        let checker = checker(fake);
        let report = checker.analyze("message").await?;
        assert!(report.contains("Inferred lore context: unknown"));
        assert!(report.contains("Specificity: many"));
        assert!(report.contains("Uses arithmetic adjustments: false"));
        Ok(())
    }
}

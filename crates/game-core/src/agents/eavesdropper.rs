//! The enemy on the compromised channel. The only party whose knowledge
//! survives across turns: every turn appends a `TurnEvent` to its history,
//! and the history is replayed into a fresh session at the start of every
//! future turn.

use serde::Deserialize;
use tracing::debug;

use crate::agents::PreconditionError;
use crate::board::{Board, Coord, column_letters, render};
use crate::llm::Role;
use crate::schema::Sketch;
use crate::session::{ChatContext, ReplyFormat, Session};

/// One turn as the eavesdropper experienced it. Append-only: a record is
/// opened at the start of each turn and never deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnEvent {
    pub instructions: String,
    /// True when the instruction was our own forged injection.
    pub injected: bool,
    /// The coordinate that was actually fired on, or None for a pass.
    pub fired: Option<String>,
    /// Free-text belief notes written after seeing the outcome.
    pub notes: String,
}

pub struct Eavesdropper {
    ctx: ChatContext,
    history: Vec<TurnEvent>,
    open: Option<TurnEvent>,
}

#[derive(Debug, Deserialize, Default)]
struct TargetGuess {
    #[serde(default)]
    col: String,
    #[serde(default)]
    row: i64,
    #[serde(default)]
    explanation: String,
}

fn guess_sketch(rows: usize, cols: usize) -> Sketch {
    let last_col = (b'A' + (cols - 1) as u8) as char;
    Sketch::map([
        (
            "col",
            Sketch::bundle([
                Sketch::text(format!("The letter of the inferred target column (A-{last_col}).")),
                Sketch::Choices(column_letters(cols)),
            ]),
        ),
        (
            "row",
            Sketch::bundle([
                Sketch::text(format!("The number of the inferred target row (1-{rows}).")),
                Sketch::Int,
                Sketch::Range(1.0, rows as f64),
            ]),
        ),
        (
            "explanation",
            Sketch::text("A brief explanation of how these coordinates were derived."),
        ),
    ])
}

impl Eavesdropper {
    pub fn new(ctx: ChatContext) -> Self {
        Self {
            ctx,
            history: Vec::new(),
            open: None,
        }
    }

    pub fn history(&self) -> &[TurnEvent] {
        &self.history
    }

    /// Opens this turn's event record. A record left open by an aborted turn
    /// is filed as-is first; nothing is ever dropped.
    pub fn start_turn(&mut self) {
        if let Some(stale) = self.open.take() {
            self.history.push(stale);
        }
        self.open = Some(TurnEvent::default());
    }

    pub fn note_instruction(
        &mut self,
        instructions: impl Into<String>,
        injected: bool,
    ) -> Result<(), PreconditionError> {
        let event = self
            .open
            .as_mut()
            .ok_or(PreconditionError("eavesdropper turn not started"))?;
        event.instructions = instructions.into();
        event.injected = injected;
        Ok(())
    }

    /// A fresh session carrying the base briefing, the replayed history in
    /// chronological order, and the current board.
    fn briefing(&self, board: &Board) -> Session {
        let mut convo = self.ctx.session();
        convo.push_system(
            "We're playing an asymmetrical social game that's a hybrid of Battleship and \
             Codenames, and we're the bad guys. We're overhearing messages on a channel we \
             compromised: the opponent is sending his ally target coordinates on a \
             Battleship board, deliberately obfuscated through a shared lore context (a \
             narrative frame only the two of them know) so that we can't read them. Our \
             job is to understand the messages anyway.\n\n\
             We also hold a small reserve of Chaff that can shield one square against one \
             incoming shot, and we can sometimes inject forged messages that look like \
             they come from the opponent.",
        );
        for (i, event) in self.history.iter().enumerate() {
            let mut recap = format!(
                "Turn {}:\nOverheard instruction: {}\n",
                i + 1,
                event.instructions
            );
            if event.injected {
                recap.push_str("(That instruction was our own forged injection.)\n");
            }
            match &event.fired {
                Some(coord) => recap.push_str(&format!("Shot fired at {coord}.\n")),
                None => recap.push_str("No shot was fired.\n"),
            }
            if !event.notes.is_empty() {
                recap.push_str(&format!("Our notes at the time:\n{}\n", event.notes));
            }
            convo.push_system(recap);
        }
        convo.push_system(format!(
            "The board currently looks like this (our own fleet and the hostages):\n\n{}\n{}",
            render::render_with_legend(board),
            render::describe(board)
        ));
        convo
    }

    /// Crafts a forged instruction intended to pass for the transmitter,
    /// built from everything overheard so far.
    pub async fn forge_instruction(&self, board: &Board) -> anyhow::Result<String> {
        let mut convo = self.briefing(board);
        debug!("eavesdropper forging an instruction");
        let reply = convo
            .submit_pushed(
                Role::System,
                "This turn we seize the channel and inject a forged instruction of our \
                 own, hoping the ally fires where we want (ideally into a hostage) or at \
                 least wastes the shot. Imitate the opponent's obfuscated style as closely \
                 as our notes allow; avoid anything that would obviously expose the \
                 forgery. Reply with the forged instruction text only, nothing else.",
                ReplyFormat::Plain,
            )
            .await?;
        Ok(reply.as_text().to_string())
    }

    /// Tries to work out the target from the overheard instruction, the
    /// board, and accumulated notes alone. No lore context is available, so
    /// failing to produce a legal coordinate is a normal outcome.
    pub async fn infer_target(
        &self,
        board: &Board,
        instructions: &str,
    ) -> anyhow::Result<Option<Coord>> {
        let mut convo = self.briefing(board);
        convo.push_system(
            "A new message is coming over the channel. The opponent is trying to convey \
             target coordinates to his ally; he knows we're listening, so he may also be \
             messing with us. Work out the most likely target square using the message, \
             the board state, and everything in our notes.",
        );
        convo.push_user(instructions.to_string());

        debug!("eavesdropper inferring the target");
        let value = convo
            .submit(ReplyFormat::heuristic(
                "target_coordinates",
                "Our best guess at the decoded target coordinates.",
                guess_sketch(board.rows(), board.cols()),
            ))
            .await?;
        let guess: TargetGuess =
            serde_json::from_value(value.into_structured().unwrap_or_default())
                .unwrap_or_default();
        if guess.row < 1 {
            return Ok(None);
        }
        let coord = Coord::parse(
            &format!("{}{}", guess.col, guess.row),
            board.rows(),
            board.cols(),
        )
        .ok();
        if let Some(coord) = coord {
            debug!(guess = %coord, explanation = %guess.explanation, "eavesdropper guess");
        }
        Ok(coord)
    }

    /// Records the final outcome on the open event, asks the session for
    /// fresh belief notes, and files the event into the history.
    pub async fn observe_outcome(
        &mut self,
        board: &Board,
        fired: Option<Coord>,
    ) -> anyhow::Result<()> {
        let mut event = self
            .open
            .take()
            .ok_or(PreconditionError("eavesdropper turn not started"))?;
        event.fired = fired.map(|c| c.to_string());

        let mut convo = self.briefing(board);
        convo.push_system(if event.injected {
            "This turn's instruction was our own forged injection:"
        } else {
            "This turn's overheard instruction:"
        });
        convo.push_user(event.instructions.clone());
        let outcome_line = match &event.fired {
            Some(coord) => format!("The shot landed at {coord}."),
            None => "No shot was fired this turn.".to_string(),
        };

        let notes = convo
            .submit_pushed(
                Role::System,
                format!(
                    "{outcome_line}\n\nWrite brief belief notes for our future selves: what \
                     we now believe about the lore context, the opponent's encoding habits, \
                     and which squares he's likely to call next."
                ),
                ReplyFormat::Plain,
            )
            .await;

        match notes {
            Ok(reply) => {
                event.notes = reply.as_text().to_string();
                self.history.push(event);
                Ok(())
            }
            Err(err) => {
                // The turn still happened; keep the record even without notes.
                self.history.push(event);
                Err(err.into())
            }
        }
    }
}

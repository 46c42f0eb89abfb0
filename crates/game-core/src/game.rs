//! The turn orchestrator: drives the per-turn sequence across the board,
//! the receiver, the spoof checker, and the eavesdropper, enforcing who is
//! allowed to see what.
//!
//! Per turn: StartTurn, InstructionAcquired, SpoofChecked, ReceiverVerdict,
//! optional shield deployment, Resolved, EndgameEvaluated, and finally the
//! eavesdropper's outcome observation. A session failure aborts only the
//! turn; a precondition violation is fatal.

use rand::Rng;
use tracing::{info, warn};

use crate::agents::{Eavesdropper, FiringDecision, Receiver, SpoofChecker};
use crate::board::{Board, Coord, Endgame, FireOutcome};
use crate::config::GameSettings;
use crate::session::ChatContext;

/// Where this turn's instruction comes from. Exactly one source per turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnSource {
    /// Genuine instruction text from the transmitter at the terminal.
    Transmitter(String),
    /// The eavesdropper seizes the channel and fabricates the instruction.
    Forged,
}

/// What happened in one turn, for the front-end to display.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub turn: u64,
    pub instructions: String,
    pub injected: bool,
    pub spoof_report: String,
    pub decision: FiringDecision,
    pub shielded: Option<Coord>,
    pub fired: Option<Coord>,
    pub outcome: Option<FireOutcome>,
    pub endgame: Endgame,
}

pub struct Game {
    board: Board,
    receiver: Receiver,
    spoof: SpoofChecker,
    eavesdropper: Eavesdropper,
    turn: u64,
}

impl Game {
    pub fn new(
        settings: &GameSettings,
        ctx: ChatContext,
        rng: &mut impl Rng,
    ) -> anyhow::Result<Self> {
        let mut board = Board::new(settings.rows, settings.cols);
        board.setup(settings.ships, settings.hostages, rng)?;
        Ok(Self {
            board,
            receiver: Receiver::new(ctx.clone()),
            spoof: SpoofChecker::new(ctx.clone()),
            eavesdropper: Eavesdropper::new(ctx),
            turn: 0,
        })
    }

    /// Must be called before the first turn.
    pub fn set_lore_context(&mut self, lore_context: impl Into<String>) {
        self.receiver.set_lore_context(lore_context);
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub async fn play_turn(&mut self, source: TurnSource) -> anyhow::Result<TurnReport> {
        self.turn += 1;
        let (rows, cols) = (self.board.rows(), self.board.cols());

        // StartTurn: shield overlay cleared, fresh receiver crew, fresh
        // eavesdropper event record.
        self.board.start_turn();
        self.receiver.start_turn(rows, cols);
        self.spoof.start_turn(rows, cols);
        self.eavesdropper.start_turn();

        // InstructionAcquired.
        let (instructions, injected) = match source {
            TurnSource::Transmitter(text) => (text, false),
            TurnSource::Forged => {
                let forged = self.eavesdropper.forge_instruction(&self.board).await?;
                info!(turn = self.turn, "eavesdropper forged an instruction");
                (forged, true)
            }
        };
        self.eavesdropper
            .note_instruction(instructions.as_str(), injected)?;

        // SpoofChecked + ReceiverVerdict.
        let spoof_report = self.spoof.analyze(&instructions).await?;
        let decision = self.receiver.decode(&instructions, &spoof_report).await?;

        let mut shielded = None;
        let mut fired = None;
        let mut outcome = None;

        if decision.is_injection {
            // The receiver abstains: no coordinate, no fire, no shield phase.
            info!(turn = self.turn, "receiver judged the instruction an injection");
        } else {
            // OptionalShieldDeployment: genuine-instruction turns only, and
            // only while the board still permits shields.
            if !injected && self.board.shields_allowed() {
                let aim = self
                    .eavesdropper
                    .infer_target(&self.board, &instructions)
                    .await?;
                if let Some(aim) = aim
                    && self.board.deploy_shield(aim)
                {
                    info!(turn = self.turn, %aim, "eavesdropper deployed chaff");
                    shielded = Some(aim);
                }
            }

            // Resolved.
            if decision.fire {
                match decision.target(rows, cols) {
                    Some(target) => {
                        let result = self.board.fire(target);
                        fired = Some(target);
                        outcome = Some(result);
                        info!(turn = self.turn, %target, ?result, "shot resolved");
                    }
                    None => {
                        // Local decode failure: treated as holding fire.
                        warn!(
                            turn = self.turn,
                            col = %decision.col,
                            row = decision.row,
                            "receiver produced an unparseable coordinate; holding fire"
                        );
                    }
                }
            }
        }

        // EndgameEvaluated.
        let endgame = self.board.check_endgame();

        // The eavesdropper sees the final outcome regardless of verdict.
        self.eavesdropper
            .observe_outcome(&self.board, fired)
            .await?;

        Ok(TurnReport {
            turn: self.turn,
            instructions,
            injected,
            spoof_report,
            decision,
            shielded,
            fired,
            outcome,
            endgame,
        })
    }
}

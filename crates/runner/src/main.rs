//! Interactive terminal front-end: prompts for the lore context and the
//! per-turn targeting commands, shows the board, and narrates each turn's
//! outcome. All game logic lives in lorefire-core.

use std::sync::Arc;

use anyhow::Context;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tracing::warn;

use lorefire_core::agents::PreconditionError;
use lorefire_core::board::render;
use lorefire_core::board::{CellContent, Endgame, FireOutcome};
use lorefire_core::config::Config;
use lorefire_core::game::{Game, TurnReport, TurnSource};
use lorefire_core::llm::HttpChatClient;
use lorefire_core::session::ChatContext;

const INTRO: &str = "\
Establish Your Lore Context
---------------------------

Before the game begins, agree with your artillery team on a \"lore context\":
a shared narrative frame (a movie franchise, an author, a band, a historical
event, anything) that you will use to obfuscate your targeting commands.

Your commands must convey a coordinate that your team will fire upon, but in
a way that only makes sense with the lore context, and without revealing the
lore context itself. The enemy hears everything you say: a command they can
decode gets its square shielded, and a command that gives the frame away
hands them the codebook for the rest of the game.";

fn is_quit(text: &str) -> bool {
    matches!(text.to_lowercase().as_str(), "q" | "quit" | "exit")
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn apply_env_overrides(config: &mut Config) {
    if let Some(v) = env_nonempty("LOREFIRE_LLM_ENDPOINT") {
        config.llm.endpoint = v;
    }
    if let Some(v) = env_nonempty("LOREFIRE_LLM_MODEL") {
        config.llm.model = v;
    }
    if let Some(v) = env_nonempty("LOREFIRE_LLM_API_KEY") {
        config.llm.api_key = Some(v);
    }
}

struct Prompter {
    reader: BufReader<Stdin>,
}

impl Prompter {
    fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
        }
    }

    async fn ask(&mut self, prompt: &str) -> anyhow::Result<String> {
        use std::io::Write;
        print!("{prompt}");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .context("read stdin")?;
        if n == 0 {
            anyhow::bail!("stdin closed");
        }
        Ok(line.trim().to_string())
    }
}

fn print_report(report: &TurnReport) {
    if report.injected {
        println!(
            "You overhear a transmission on your own channel that you never sent:\n  \"{}\"",
            report.instructions
        );
    }

    if report.decision.is_injection {
        println!("Your artillery team refused the order as a suspected forgery.");
        if !report.decision.injection_rationale.is_empty() {
            println!("  Reason: {}", report.decision.injection_rationale);
        }
    } else {
        match (report.fired, report.outcome) {
            (Some(coord), Some(FireOutcome::Hit(CellContent::Ship))) => {
                println!("Hit: ship destroyed at {coord}!");
            }
            (Some(coord), Some(FireOutcome::Hit(CellContent::Hostage))) => {
                println!("Disaster: a hostage was at {coord}.");
            }
            (Some(coord), Some(FireOutcome::Hit(CellContent::Empty))) => {
                println!("Miss: empty water at {coord}.");
            }
            (Some(coord), Some(FireOutcome::Blocked)) => {
                println!("Blocked: enemy chaff shielded {coord}. The shot was wasted.");
            }
            (Some(coord), Some(FireOutcome::OutOfBounds)) => {
                println!("The shot at {coord} sailed off the board.");
            }
            _ => println!("Your artillery team held fire this turn."),
        }
        if !report.decision.explanation.is_empty() {
            println!("  After-action report: {}", report.decision.explanation);
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = Config::load_or_default("config.toml")?;
    apply_env_overrides(&mut config);

    let client = Arc::new(HttpChatClient::new(config.llm.clone())?);
    let ctx = ChatContext::new(client, config.llm.model.clone())
        .with_config(config.session.to_session_config());

    let mut rng = rand::thread_rng();
    let mut game = Game::new(&config.game, ctx, &mut rng)?;

    println!("lorefire");
    println!("{}", "=".repeat(40));
    println!();
    println!("{INTRO}");
    println!();

    let mut prompter = Prompter::new();
    let lore_context = prompter
        .ask("Enter your lore context (e.g., 'The plays of William Shakespeare'): ")
        .await?;
    if lore_context.is_empty() || is_quit(&lore_context) {
        println!("Exiting game.");
        return Ok(());
    }
    game.set_lore_context(lore_context);
    println!();

    loop {
        println!("{}", render::render_with_legend(game.board()));
        println!("Ships: {}", game.board().ships_remaining());
        println!("Hostages: {}", game.board().hostages_remaining());
        println!();

        match game.board().check_endgame() {
            Endgame::Win => {
                println!("All ships neutralized. You win!");
                return Ok(());
            }
            Endgame::Lose => {
                println!("All hostages lost. You lose.");
                return Ok(());
            }
            Endgame::InProgress => {}
        }

        // The enemy can occasionally seize the channel, but never on the
        // first turn: there is nothing overheard to forge from yet.
        let forged = game.turn() > 0 && rng.gen_bool(config.game.injection_chance);
        let source = if forged {
            println!("Static crackles across the channel...");
            TurnSource::Forged
        } else {
            let text = prompter
                .ask("Enter your obfuscated targeting command (or 'q' to quit): ")
                .await?;
            if is_quit(&text) {
                println!("Exiting game.");
                return Ok(());
            }
            if text.is_empty() {
                continue;
            }
            TurnSource::Transmitter(text)
        };

        match game.play_turn(source).await {
            Ok(report) => print_report(&report),
            Err(err) if err.is::<PreconditionError>() => return Err(err),
            Err(err) => {
                warn!(error = %err, "turn aborted");
                println!("The turn fell apart ({err:#}); treating it as a pass.\n");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_words_are_recognized_case_insensitively() {
        for word in ["q", "quit", "exit", "Q", "QUIT", "Exit"] {
            assert!(is_quit(word));
        }
        assert!(!is_quit("fire at will"));
        assert!(!is_quit(""));
    }
}

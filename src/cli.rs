//! Command-line surface: rule and calibration editing plus daemon control

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Settings;
use crate::coordinates::{CoordinateStore, Point};
use crate::daemon;
use crate::engine::EngineStatus;
use crate::engine::activity::ActivityEntry;
use crate::ipc::{EngineClient, EngineRequest, EngineResponse};
use crate::persistence::{FileStore, KeyValueStore};
use crate::rules::{Rule, RuleEdit, RuleStore};

/// Characters of a rule id shown in listings
const SHORT_ID_LEN: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "ocr-autotyper", version, about = "Types configured text when trigger words appear on screen")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the automation daemon
    Run {
        /// Start with recognition paused (resume with `ctl start`)
        #[arg(long)]
        paused: bool,
    },

    /// Manage trigger rules
    #[command(subcommand)]
    Rules(RulesCommand),

    /// Manage character calibration
    #[command(subcommand)]
    Coords(CoordsCommand),

    /// Control a running daemon
    #[command(subcommand)]
    Ctl(CtlCommand),
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// List rules in matching order
    List,

    /// Add a rule
    Add {
        trigger: String,
        output: String,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,
        /// Create the rule disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Change fields of a rule
    Edit {
        id: String,
        #[arg(long)]
        trigger: Option<String>,
        #[arg(long)]
        output: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i32>,
    },

    /// Delete a rule
    Remove { id: String },

    Enable { id: String },

    Disable { id: String },

    /// Set a rule's priority (higher matches first)
    Priority {
        id: String,
        #[arg(allow_hyphen_values = true)]
        priority: i32,
    },

    /// Move a rule to a position in matching order (1 = first) and renumber priorities
    Move { id: String, position: usize },
}

#[derive(Subcommand, Debug)]
enum CoordsCommand {
    /// List calibrated characters
    List,

    /// Calibrate a character (only the first character of the argument is used)
    Set {
        character: String,
        #[arg(allow_hyphen_values = true)]
        x: f32,
        #[arg(allow_hyphen_values = true)]
        y: f32,
    },

    /// Forget one character
    Remove { character: String },

    /// Forget every character
    Clear,
}

#[derive(Subcommand, Debug)]
enum CtlCommand {
    Start,
    Stop,
    /// Re-read rules and coordinates
    Reload,
    Status,
    /// Show recent activity
    Log,
    /// Type text through the engine now
    Test { text: String },
    Ping,
    Shutdown,
}

pub fn run(cli: Cli, settings: Settings) -> Result<()> {
    match cli.command {
        Command::Run { paused } => daemon::run_daemon(settings, paused),
        Command::Rules(command) => {
            let mut store = RuleStore::open(open_data_store()?);
            let changed = run_rules(&mut store, command)?;
            if changed {
                notify_reload();
            }
            Ok(())
        }
        Command::Coords(command) => {
            let mut store = CoordinateStore::open(open_data_store()?);
            let changed = run_coords(&mut store, command)?;
            if changed {
                notify_reload();
            }
            Ok(())
        }
        Command::Ctl(command) => run_ctl(command),
    }
}

fn open_data_store() -> Result<Arc<dyn KeyValueStore>> {
    let store = FileStore::open(FileStore::default_dir()).context("Failed to open data directory")?;
    debug!(dir = %store.dir().display(), "Opened data store");
    Ok(Arc::new(store))
}

/// Tell a running daemon to pick up edits; silently skipped if none runs
fn notify_reload() {
    match EngineClient::connect().and_then(|mut client| client.request(EngineRequest::ReloadRules)) {
        Ok(EngineResponse::Ready) => info!("Running daemon reloaded"),
        Ok(other) => debug!(response = ?other, "Unexpected reload response"),
        Err(e) => debug!(error = %e, "No running daemon to notify"),
    }
}

fn short_id(rule: &Rule) -> &str {
    let id = rule.id.as_str();
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

fn format_rule(rule: &Rule) -> String {
    format!(
        "{:<8}  [{}] {:>4}  {:?} -> {:?}",
        short_id(rule),
        if rule.enabled { "x" } else { " " },
        rule.priority,
        rule.trigger,
        rule.output
    )
}

/// Returns true when the store changed
fn run_rules(store: &mut RuleStore, command: RulesCommand) -> Result<bool> {
    match command {
        RulesCommand::List => {
            let rules = store.list();
            if rules.is_empty() {
                println!("No rules. Add one with `ocr-autotyper rules add <trigger> <output>`.");
            }
            for rule in &rules {
                println!("{}", format_rule(rule));
            }
            return Ok(false);
        }
        RulesCommand::Add {
            trigger,
            output,
            priority,
            disabled,
        } => {
            let rule = store.add(&trigger, &output, !disabled, priority)?;
            println!("{}", format_rule(&rule));
        }
        RulesCommand::Edit {
            id,
            trigger,
            output,
            priority,
        } => {
            let id = store.resolve(&id)?;
            let rule = store.update(
                &id,
                RuleEdit {
                    trigger,
                    output,
                    enabled: None,
                    priority,
                },
            )?;
            println!("{}", format_rule(&rule));
        }
        RulesCommand::Remove { id } => {
            let id = store.resolve(&id)?;
            store.remove(&id)?;
            println!("Removed {}", id);
        }
        RulesCommand::Enable { id } => {
            let id = store.resolve(&id)?;
            println!("{}", format_rule(&store.set_enabled(&id, true)?));
        }
        RulesCommand::Disable { id } => {
            let id = store.resolve(&id)?;
            println!("{}", format_rule(&store.set_enabled(&id, false)?));
        }
        RulesCommand::Priority { id, priority } => {
            let id = store.resolve(&id)?;
            println!("{}", format_rule(&store.set_priority(&id, priority)?));
        }
        RulesCommand::Move { id, position } => {
            let id = store.resolve(&id)?;
            store.move_to(&id, position.saturating_sub(1))?;
            for rule in store.list() {
                println!("{}", format_rule(&rule));
            }
        }
    }
    Ok(true)
}

/// First character of the trimmed argument
fn calibration_char(raw: &str) -> Result<char> {
    match raw.trim().chars().next() {
        Some(c) => Ok(c),
        None => bail!("A character is required"),
    }
}

/// Returns true when the store changed
fn run_coords(store: &mut CoordinateStore, command: CoordsCommand) -> Result<bool> {
    match command {
        CoordsCommand::List => {
            let entries = store.get_all();
            if entries.is_empty() {
                println!("No calibrated characters.");
            }
            for entry in entries {
                println!("{:?}  ({:.1}, {:.1})", entry.character, entry.x, entry.y);
            }
            Ok(false)
        }
        CoordsCommand::Set { character, x, y } => {
            let character = calibration_char(&character)?;
            store.save(character, Point::new(x, y))?;
            println!("{:?}  ({:.1}, {:.1})", character, x, y);
            Ok(true)
        }
        CoordsCommand::Remove { character } => {
            let character = calibration_char(&character)?;
            if store.delete(character)? {
                println!("Removed {:?}", character);
                Ok(true)
            } else {
                println!("{:?} was not calibrated", character);
                Ok(false)
            }
        }
        CoordsCommand::Clear => {
            let count = store.len();
            store.clear()?;
            println!("Removed {} calibrated character(s)", count);
            Ok(true)
        }
    }
}

fn run_ctl(command: CtlCommand) -> Result<()> {
    let request = match command {
        CtlCommand::Start => EngineRequest::Start,
        CtlCommand::Stop => EngineRequest::Stop,
        CtlCommand::Reload => EngineRequest::ReloadRules,
        CtlCommand::Status => EngineRequest::Status,
        CtlCommand::Log => EngineRequest::RecentActivity,
        CtlCommand::Test { text } => EngineRequest::TestOutput(text),
        CtlCommand::Ping => EngineRequest::Ping,
        CtlCommand::Shutdown => EngineRequest::Shutdown,
    };

    let mut client = EngineClient::connect()?;
    match client.request(request)? {
        EngineResponse::Ready => println!("ok"),
        EngineResponse::Pong => println!("pong"),
        EngineResponse::Status(status) => print_status(&status),
        EngineResponse::Activity(entries) => print_activity(&entries),
        EngineResponse::Error(message) => bail!("Daemon error: {}", message),
    }
    Ok(())
}

fn print_status(status: &EngineStatus) {
    println!("running:            {}", status.running);
    println!("debounce:           {:?}", status.debounce_state);
    if !status.last_identifier.is_empty() {
        println!("last match:         {}", status.last_identifier);
    }
    println!(
        "empty cycles:       {}/{}",
        status.consecutive_empty, status.empty_threshold
    );
    println!("recognizing:        {}", status.recognition_in_flight);
    println!("pending actions:    {}", status.pending_actions);
    println!(
        "rules:              {} ({} enabled)",
        status.rules_loaded, status.rules_enabled
    );
    println!("calibrated chars:   {}", status.calibrated_characters);
    println!("fire mode:          {:?}", status.fire_mode);
    println!(
        "cycles / fires:     {} / {}",
        status.cycles_completed, status.fires
    );
}

fn print_activity(entries: &[ActivityEntry]) {
    if entries.is_empty() {
        println!("No activity yet.");
    }
    for entry in entries {
        println!("{}  {:<11}  {}", entry.at.format("%H:%M:%S"), entry.tag, entry.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    #[test]
    fn test_cli_parses_rule_commands() {
        let cli = Cli::try_parse_from(["ocr-autotyper", "rules", "add", "OK", "yes", "--priority", "-2"]).unwrap();
        match cli.command {
            Command::Rules(RulesCommand::Add { trigger, output, priority, disabled }) => {
                assert_eq!(trigger, "OK");
                assert_eq!(output, "yes");
                assert_eq!(priority, -2);
                assert!(!disabled);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["ocr-autotyper", "run", "--paused"]).unwrap();
        assert!(matches!(cli.command, Command::Run { paused: true }));
    }

    #[test]
    fn test_calibration_char_takes_first_of_trimmed() {
        assert_eq!(calibration_char("  yes ").unwrap(), 'y');
        assert_eq!(calibration_char("é").unwrap(), 'é');
        assert!(calibration_char("   ").is_err());
    }

    #[test]
    fn test_rules_commands_edit_store() {
        let mut store = RuleStore::open(Arc::new(MemoryStore::new()));
        let changed = run_rules(
            &mut store,
            RulesCommand::Add {
                trigger: "OK".to_string(),
                output: "yes".to_string(),
                priority: 0,
                disabled: true,
            },
        )
        .unwrap();
        assert!(changed);
        let rule = store.list().remove(0);
        assert!(!rule.enabled);

        let prefix = rule.id.as_str()[..4].to_string();
        run_rules(&mut store, RulesCommand::Enable { id: prefix.clone() }).unwrap();
        assert!(store.get(&rule.id).unwrap().enabled);

        assert!(!run_rules(&mut store, RulesCommand::List).unwrap());
        run_rules(&mut store, RulesCommand::Remove { id: prefix }).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_coords_commands_edit_store() {
        let mut store = CoordinateStore::open(Arc::new(MemoryStore::new()));
        run_coords(
            &mut store,
            CoordsCommand::Set {
                character: " yes".to_string(),
                x: 10.0,
                y: -5.0,
            },
        )
        .unwrap();
        assert_eq!(store.get('y'), Some(Point::new(10.0, -5.0)));

        assert!(!run_coords(&mut store, CoordsCommand::Remove { character: "z".to_string() }).unwrap());
        assert!(run_coords(&mut store, CoordsCommand::Clear).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_short_id() {
        let rule = Rule::new("a", "b");
        assert_eq!(short_id(&rule).len(), SHORT_ID_LEN);
        let mut short = Rule::new("a", "b");
        short.id = "abc".into();
        assert_eq!(short_id(&short), "abc");
    }
}

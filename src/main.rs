use anyhow::{Context, Result};
use chordform::analyzer::stability::KeyMode;
use chordform::analyzer::{analyze, AnalysisInput, AnalysisOutput, TheoryContext};
use chordform::config::{AppConfig, EngineConfig};
use chordform::db::models::NewSession;
use chordform::db::Database;
use chordform::form::FormSheet;
use chordform::memory::Memory;
use chordform::recommend::Recommendation;
use chordform::theory::{PitchClass, ScaleType};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "chordform",
    version,
    about = "Live harmony tracker: key, chords and song form from a note stream"
)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append notes to a session and run the engine once per note
    Feed {
        /// Session name (created on first use)
        session: String,

        /// Note names ("C4", "Eb", "f#3") or MIDI numbers
        notes: Vec<String>,

        /// Read notes from a note-log file instead
        #[arg(short, long, conflicts_with = "notes")]
        file: Option<PathBuf>,

        /// Tempo in beats per minute (stored with the session)
        #[arg(long)]
        bpm: Option<f64>,

        /// Simulated milliseconds between notes (defaults to config step_ms)
        #[arg(long)]
        step_ms: Option<u64>,
    },

    /// Show what the engine hears for a session, plus its chart
    Show {
        session: String,

        /// Print context and suggestions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pin the key by hand or hand it back to detection
    Key {
        session: String,

        /// Tonic to pin (e.g. "D", "Bb")
        #[arg(long, value_name = "KEY", conflicts_with = "auto")]
        manual: Option<PitchClass>,

        /// Scale for --manual (major, minor, dorian, ...)
        #[arg(long, requires = "manual")]
        scale: Option<ScaleType>,

        /// Return to automatic key detection
        #[arg(long)]
        auto: bool,

        /// Never switch the detected key on its own
        #[arg(long, conflicts_with = "follow_key")]
        hold_key: bool,

        /// Allow detected key changes again
        #[arg(long)]
        follow_key: bool,
    },

    /// Edit individual bars of the chart (bar numbers start at 1)
    Bar {
        session: String,

        #[command(subcommand)]
        action: BarAction,
    },

    /// Edit compressed sections of the chart
    Section {
        session: String,

        #[command(subcommand)]
        action: SectionAction,
    },

    /// List saved sessions
    Sessions,

    /// Delete a session
    Delete { session: String },

    /// Clear a session's notes and memory
    Reset { session: String },
}

#[derive(Subcommand)]
enum BarAction {
    /// Overwrite a bar (empty text means "N.C.")
    Set { bar: usize, chord: String },
    /// Insert a copy of the previous bar before this position
    Insert { bar: usize },
    /// Remove a bar
    Remove { bar: usize },
}

#[derive(Subcommand)]
enum SectionAction {
    /// Rename a section
    Rename { id: String, label: String },
    /// Replace a section's bars
    Bars {
        id: String,
        #[arg(required = true)]
        bars: Vec<String>,
    },
    /// Split one repeat out of a repeated section (repeats start at 1)
    Unlink { id: String, repeat: usize },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(chordform::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open(&db_path).context("Failed to open database")?;
    let engine = &config.engine;

    match cli.command {
        Commands::Feed { session, notes, file, bpm, step_ms } => {
            let (new_notes, from_file) = match file {
                Some(path) => {
                    let notes = chordform::input::read_note_log(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    (notes, true)
                }
                None => {
                    let notes = notes
                        .iter()
                        .map(|n| {
                            chordform::input::normalize_note(n)
                                .with_context(|| format!("Not a note: {n:?}"))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    (notes, false)
                }
            };
            if new_notes.is_empty() {
                anyhow::bail!("No notes to feed. Pass notes as arguments or use --file.");
            }

            let stored = db
                .find_session(&session, engine)
                .context("Failed to load session")?;
            let (mut history, mut memory, stored_bpm) = match stored {
                Some(s) => (s.note_history, s.memory, s.bpm),
                None => {
                    println!("New session \"{}\"", session);
                    (Vec::new(), Memory::default(), None)
                }
            };
            let bpm = bpm.or(stored_bpm).or(config.default_bpm);
            let step = step_ms.unwrap_or(config.step_ms) as i64;
            let start = session_clock(&memory);

            let pb = if from_file {
                let pb = ProgressBar::new(new_notes.len() as u64);
                pb.set_style(
                    ProgressStyle::with_template(
                        "  [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} notes",
                    )
                    .context("Invalid progress template")?,
                );
                pb
            } else {
                ProgressBar::hidden()
            };

            let mut last = None;
            for (i, note) in new_notes.into_iter().enumerate() {
                history.push(note);
                let out = analyze(
                    &AnalysisInput {
                        note_history: &history,
                        bpm,
                        now_ms: start + i as i64 * step,
                    },
                    &memory,
                    engine,
                );
                memory = out.memory.clone();
                last = Some(out);
                pb.inc(1);
            }
            pb.finish_and_clear();

            db.save_session(&NewSession {
                name: &session,
                bpm,
                note_history: &history,
                memory: &memory,
            })
            .context("Failed to save session")?;

            if let Some(out) = last {
                print_context(&out.context);
                println!();
                print_recommendations(&out.recommendations);
            }
        }

        Commands::Show { session, json } => {
            let s = db
                .load_session(&session, engine)
                .context("Failed to load session")?;
            let out = snapshot(&s.note_history, s.bpm, &s.memory, engine);

            if json {
                let value = serde_json::json!({
                    "context": out.context,
                    "recommendations": out.recommendations,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
                return Ok(());
            }

            println!(
                "Session: {} ({} notes, updated {})",
                s.name,
                s.note_history.len(),
                s.updated_at
            );
            println!();
            print_context(&out.context);
            println!();
            print_patterns(&out.memory);
            println!();
            print_chart(&out.memory.form_sheet);
            println!();
            print_recommendations(&out.recommendations);
        }

        Commands::Key { session, manual, scale, auto, hold_key, follow_key } => {
            let mut s = db
                .load_session(&session, engine)
                .context("Failed to load session")?;
            let control = &mut s.memory.key_control;

            if let Some(key) = manual {
                control.mode = KeyMode::Manual;
                control.manual_key = key;
                control.manual_scale = scale.unwrap_or(ScaleType::Major);
            } else if auto {
                control.mode = KeyMode::Auto;
            }
            if hold_key {
                control.follow_key_changes = false;
            } else if follow_key {
                control.follow_key_changes = true;
            }

            let out = snapshot(&s.note_history, s.bpm, &s.memory, engine);
            db.save_session(&NewSession {
                name: &s.name,
                bpm: s.bpm,
                note_history: &s.note_history,
                memory: &out.memory,
            })
            .context("Failed to save session")?;

            let control = &out.memory.key_control;
            match control.mode {
                KeyMode::Manual => println!(
                    "Key pinned to {} {}",
                    control.manual_key, control.manual_scale
                ),
                KeyMode::Auto => println!(
                    "Key detection: auto ({} changes)",
                    if control.follow_key_changes { "following" } else { "holding" }
                ),
            }
            println!("Current key: {} {}", out.context.key, out.context.scale);
        }

        Commands::Bar { session, action } => {
            let mut s = db
                .load_session(&session, engine)
                .context("Failed to load session")?;
            let sheet = &mut s.memory.form_sheet;
            let tuning = &engine.compression;

            match action {
                BarAction::Set { bar, chord } => {
                    sheet.set_bar(bar_index(bar)?, &chord, tuning);
                }
                BarAction::Insert { bar } => {
                    sheet.insert_bar(bar_index(bar)?, tuning);
                }
                BarAction::Remove { bar } => {
                    if !sheet.remove_bar(bar_index(bar)?, tuning) {
                        anyhow::bail!(
                            "Cannot remove bar {} ({} bars in chart)",
                            bar,
                            sheet.expanded_bars.len()
                        );
                    }
                }
            }

            save_memory(&db, &s.name, s.bpm, &s.note_history, &s.memory)?;
            print_chart(&s.memory.form_sheet);
        }

        Commands::Section { session, action } => {
            let mut s = db
                .load_session(&session, engine)
                .context("Failed to load session")?;
            let sheet = &mut s.memory.form_sheet;

            let (changed, id) = match action {
                SectionAction::Rename { id, label } => (sheet.rename_section(&id, &label), id),
                SectionAction::Bars { id, bars } => (sheet.replace_section_bars(&id, &bars), id),
                SectionAction::Unlink { id, repeat } => {
                    let repeat = repeat.checked_sub(1).context("Repeat numbers start at 1")?;
                    (sheet.unlink_repeat(&id, repeat), id)
                }
            };
            if !changed {
                anyhow::bail!("Section \"{}\" was not changed (unknown id or empty edit)", id);
            }

            save_memory(&db, &s.name, s.bpm, &s.note_history, &s.memory)?;
            print_chart(&s.memory.form_sheet);
        }

        Commands::Sessions => {
            let sessions = db.list_sessions().context("Query failed")?;
            if sessions.is_empty() {
                println!("No sessions yet. Start one with `chordform feed <name> <notes...>`.");
                return Ok(());
            }

            println!("{:<25} {:>7} {:>6}  {}", "Session", "Notes", "BPM", "Updated");
            println!("{}", "-".repeat(70));
            for s in &sessions {
                let name: String = if s.name.len() > 25 {
                    format!("{}...", s.name.chars().take(22).collect::<String>())
                } else {
                    s.name.clone()
                };
                let bpm = s.bpm.map(|b| format!("{:.0}", b)).unwrap_or_else(|| "-".into());
                println!("{:<25} {:>7} {:>6}  {}", name, s.note_count, bpm, s.updated_at);
            }
        }

        Commands::Delete { session } => {
            if db.delete_session(&session).context("Delete failed")? {
                println!("Deleted session \"{}\"", session);
            } else {
                println!("No session named \"{}\".", session);
            }
        }

        Commands::Reset { session } => {
            save_memory(&db, &session, None, &[], &Memory::default())?;
            println!("Session \"{}\" reset", session);
        }
    }

    Ok(())
}

/// Start time for the next simulated note. Never earlier than anything the
/// session memory already recorded, so hold windows see time moving forward.
fn session_clock(memory: &Memory) -> i64 {
    chrono::Utc::now()
        .timestamp_millis()
        .max(memory.stable.last_key_change_at)
        .max(memory.recommendation_cache.refreshed_at)
}

/// Re-run the engine on an unchanged history. Nothing new is voted in.
fn snapshot(
    history: &[String],
    bpm: Option<f64>,
    memory: &Memory,
    engine: &EngineConfig,
) -> AnalysisOutput {
    analyze(
        &AnalysisInput {
            note_history: history,
            bpm,
            now_ms: session_clock(memory),
        },
        memory,
        engine,
    )
}

fn save_memory(
    db: &Database,
    name: &str,
    bpm: Option<f64>,
    history: &[String],
    memory: &Memory,
) -> Result<()> {
    db.save_session(&NewSession {
        name,
        bpm,
        note_history: history,
        memory,
    })
    .context("Failed to save session")?;
    Ok(())
}

fn bar_index(bar: usize) -> Result<usize> {
    bar.checked_sub(1).context("Bar numbers start at 1")
}

fn print_context(ctx: &TheoryContext) {
    println!(
        "Key:      {} {} ({:.0}%)",
        ctx.key,
        ctx.scale,
        ctx.key_confidence * 100.0
    );
    println!("Chord:    {} ({:.0}%)", ctx.chord, ctx.chord_confidence * 100.0);
    if let Some(ref note) = ctx.note {
        println!("Note:     {}", note);
    }
    if let Some(bpm) = ctx.bpm {
        println!("Tempo:    {:.0} bpm", bpm);
    }
    if let Some(ref label) = ctx.form_section_label {
        println!("Section:  {}", label);
    }
    if !ctx.progression_preview.is_empty() {
        println!("Recent:   {}", ctx.progression_preview);
    }
}

fn print_recommendations(items: &[Recommendation]) {
    if items.is_empty() {
        println!("No suggestions.");
        return;
    }
    println!("{:<6} {:<22} {:>5}  {}", "Kind", "Suggestion", "Conf", "Why");
    println!("{}", "-".repeat(80));
    for r in items {
        println!(
            "{:<6} {:<22} {:>4.0}%  {}",
            r.kind.as_str(),
            r.label,
            r.confidence * 100.0,
            r.reason
        );
    }
}

fn print_patterns(memory: &Memory) {
    let chords = &memory.progression.chords;
    if chords.is_empty() {
        println!("Progression: (nothing committed yet)");
        return;
    }
    println!("Progression ({} chords): {}", chords.len(), chords.join(" "));
    for p in &memory.form_patterns {
        println!("  {:<3} x{:<3} {}", p.label, p.occurrences, p.signature);
    }
}

fn print_chart(sheet: &FormSheet) {
    if sheet.sections.is_empty() {
        println!("Chart: (empty)");
        return;
    }

    println!("{:<8} {:<4} {:>3}  {}", "Id", "Sect", "Rep", "Bars");
    println!("{}", "-".repeat(70));
    for section in &sheet.sections {
        println!(
            "{:<8} {:<4} x{:<2}  | {} |",
            section.id,
            section.label,
            section.repeat_count,
            section.bars.join(" | ")
        );
    }

    println!();
    for (row, bars) in sheet.expanded_bars.chunks(4).enumerate() {
        let cells: Vec<String> = bars
            .iter()
            .enumerate()
            .map(|(col, bar)| {
                let index = row * 4 + col;
                let marker = if sheet.current_bar_index == Some(index) { '>' } else { ' ' };
                format!("{}{:>3} {:<8}", marker, index + 1, bar)
            })
            .collect();
        println!("{}", cells.join(" "));
    }
}

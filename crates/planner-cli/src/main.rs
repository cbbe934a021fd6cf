use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use owo_colors::OwoColorize;
use planner_core::adapter::sqlite::SqliteAdapter;
use planner_core::db;
use planner_core::error::CoreError;
use planner_core::models::{
    ConstraintKind, ConstraintTarget, LinkOptions, NewSeriesData, Pattern, PatternRule,
};
use planner_core::planner::Planner;
use planner_core::time::{parse_date, parse_time, weekday_from_name};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::new().unwrap_or_default();
    let cli = cli::Cli::parse();
    if let Err(error) = run(cli, &config).await {
        eprintln!("{} {}", "Error:".red().bold(), error);
        std::process::exit(1);
    }
}

async fn run(cli: cli::Cli, config: &config::Config) -> Result<(), CoreError> {
    let pool = db::establish_connection(&config.database).await?;
    let adapter = Arc::new(SqliteAdapter::new(pool).await?);
    let planner = Planner::new(adapter, &config.timezone)?;
    planner.hydrate().await?;

    match cli.command {
        cli::Commands::Add(command) => {
            let series = planner.create_series(series_data(command)?).await?;
            println!("{} {} ({})", "Added".green().bold(), series.title, series.id);
        }
        cli::Commands::List => {
            for series in planner.get_all_series() {
                let window = match (series.start_date, series.end_date) {
                    (Some(start), Some(end)) => format!(" [{} → {})", start, end),
                    (Some(start), None) => format!(" [{} →)", start),
                    (None, Some(end)) => format!(" [→ {})", end),
                    (None, None) => String::new(),
                };
                let locked = if series.locked { " (locked)" } else { "" };
                println!("{}  {}{}{}", series.id, series.title.bold(), window, locked);
            }
        }
        cli::Commands::Delete { id } => {
            planner.delete_series(id).await?;
            println!("{} {}", "Deleted".green().bold(), id);
        }
        cli::Commands::Lock { id } => {
            planner.lock(id).await?;
            println!("{} {}", "Locked".green().bold(), id);
        }
        cli::Commands::Unlock { id } => {
            planner.unlock(id).await?;
            println!("{} {}", "Unlocked".green().bold(), id);
        }
        cli::Commands::Split { id, date } => {
            let new_id = planner.split_series(id, parse_date(&date)?).await?;
            println!("{} {} → {}", "Split".green().bold(), id, new_id);
        }
        cli::Commands::Schedule(command) => {
            let start = match command.start {
                Some(s) => parse_date(&s)?,
                None => Utc::now().date_naive(),
            };
            let end = match command.end {
                Some(s) => parse_date(&s)?,
                None => start + chrono::Duration::days(config.window_days),
            };
            let schedule = planner.get_schedule(start, end)?;
            for instance in &schedule.instances {
                let marker = if instance.fixed { "*" } else { " " };
                println!(
                    "{} {}  {} ({}m)",
                    marker,
                    instance.time,
                    instance.title.bold(),
                    instance.duration_minutes
                );
            }
            if !schedule.conflicts.is_empty() {
                println!("{}", "Conflicts:".yellow().bold());
                for conflict in &schedule.conflicts {
                    println!("  {} {}", conflict.kind, conflict.message);
                }
            }
        }
        cli::Commands::Conflicts => {
            for conflict in planner.get_conflicts() {
                println!("{} {} {}", conflict.date, conflict.kind, conflict.message);
            }
        }
        cli::Commands::Complete(command) => {
            let start = command.start.as_deref().map(parse_time).transpose()?;
            let end = command.end.as_deref().map(parse_time).transpose()?;
            planner
                .log_completion(command.id, parse_date(&command.date)?, start, end)
                .await?;
            println!("{}", "Logged".green().bold());
        }
        cli::Commands::Cancel { id, date } => {
            planner.cancel_instance(id, parse_date(&date)?).await?;
            println!("{}", "Cancelled".green().bold());
        }
        cli::Commands::Reschedule { id, date, time } => {
            let day = parse_date(&date)?;
            planner
                .reschedule_instance(id, day, day.and_time(parse_time(&time)?))
                .await?;
            println!("{}", "Rescheduled".green().bold());
        }
        cli::Commands::Link(command) => {
            planner
                .link_series(
                    command.parent,
                    command.child,
                    LinkOptions {
                        distance_minutes: command.distance,
                        early_wobble_minutes: command.early,
                        late_wobble_minutes: command.late,
                    },
                )
                .await?;
            println!("{}", "Linked".green().bold());
        }
        cli::Commands::Unlink { child } => {
            planner.unlink_series(child).await?;
            println!("{}", "Unlinked".green().bold());
        }
        cli::Commands::Constraint(command) => match command {
            cli::ConstraintCommands::Before { first, second } => {
                let id = planner
                    .add_constraint(ConstraintKind::MustBeBefore {
                        first_series: first,
                        second_series: second,
                    })
                    .await?;
                println!("{} {}", "Added".green().bold(), id);
            }
            cli::ConstraintCommands::Spread { tag } => {
                let id = planner
                    .add_constraint(ConstraintKind::CantBeNextTo {
                        target: ConstraintTarget::Tag(tag),
                    })
                    .await?;
                println!("{} {}", "Added".green().bold(), id);
            }
            cli::ConstraintCommands::SameDay { series, anchor } => {
                let id = planner
                    .add_constraint(ConstraintKind::MustBeOnSameDay {
                        first_series: series,
                        second_target: ConstraintTarget::Series(anchor),
                    })
                    .await?;
                println!("{} {}", "Added".green().bold(), id);
            }
            cli::ConstraintCommands::List => {
                for constraint in planner.get_constraints() {
                    println!("{}  {:?}", constraint.id, constraint.kind);
                }
            }
            cli::ConstraintCommands::Remove { id } => {
                planner.remove_constraint(id).await?;
                println!("{} {}", "Removed".green().bold(), id);
            }
        },
        cli::Commands::Remind(command) => match command {
            cli::RemindCommands::Add { series, label, offset } => {
                let reminder = planner.create_reminder(series, label, offset).await?;
                println!("{} {}", "Added".green().bold(), reminder.id);
            }
            cli::RemindCommands::List => {
                for pending in planner.get_pending_reminders(Utc::now().naive_utc()) {
                    println!("{}  {} (due {})", pending.reminder_id, pending.label, pending.fire_time);
                }
            }
            cli::RemindCommands::Check => {
                let due = planner.check_reminders(Utc::now().naive_utc());
                println!("{} reminder(s) due", due.len());
            }
            cli::RemindCommands::Ack { id } => {
                planner.acknowledge_reminder(id, Utc::now().naive_utc()).await?;
                println!("{}", "Acknowledged".green().bold());
            }
        },
    }
    Ok(())
}

fn series_data(command: cli::AddCommand) -> Result<NewSeriesData, CoreError> {
    let rule = if let Some(n) = command.every {
        PatternRule::EveryNDays { n }
    } else if let Some(names) = &command.weekly {
        let mut days = BTreeSet::new();
        for name in names {
            days.insert(weekday_from_name(name)?);
        }
        PatternRule::Weekly { days_of_week: days }
    } else if let Some(day) = command.monthly {
        PatternRule::Monthly { day }
    } else {
        PatternRule::Daily
    };
    let mut pattern = Pattern::new(rule);
    pattern.time = command.time.as_deref().map(parse_time).transpose()?;
    pattern.duration_minutes = command.duration;
    pattern.fixed = command.fixed;
    pattern.all_day = command.all_day;
    Ok(NewSeriesData {
        title: command.title,
        start_date: command.start.as_deref().map(parse_date).transpose()?,
        end_date: command.end.as_deref().map(parse_date).transpose()?,
        tags: command.tags,
        patterns: vec![pattern],
        cycling: None,
        adaptive_duration: None,
    })
}
